use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a ledger (chain) known to the coordinator, e.g. "near-mainnet".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Chain-local account address, opaque to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Asset code on a given chain (token contract id, native asset symbol, etc.).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset(pub String);

impl Asset {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Asset {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Value in atomic units (yocto, stroops, wei, ...) plus the asset it denominates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    /// Value in the smallest unit of the asset.
    pub value: u128,
    /// The asset of this amount.
    pub asset: Asset,
}

impl Amount {
    pub fn new(value: u128, asset: Asset) -> Self {
        Self { value, asset }
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.asset)
    }
}

/// Digest function a chain's lock contract verifies preimages with.
///
/// Cross-chain swaps genuinely span hash primitives: NEAR-style contracts
/// check sha256, Stellar/EVM-style contracts check keccak256. The same
/// secret must satisfy a differently-computed hashlock on each leg, so the
/// algorithm is per-chain configuration, never a global assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Keccak256,
    Blake3,
}

impl HashAlgorithm {
    /// Compute the 32-byte digest of `input` under this algorithm.
    pub fn digest(&self, input: &[u8]) -> [u8; 32] {
        match self {
            Self::Sha256 => {
                use sha2::{Digest, Sha256};
                let mut out = [0u8; 32];
                out.copy_from_slice(&Sha256::digest(input));
                out
            }
            Self::Keccak256 => {
                use sha3::{Digest, Keccak256};
                let mut out = [0u8; 32];
                out.copy_from_slice(&Keccak256::digest(input));
                out
            }
            Self::Blake3 => *blake3::hash(input).as_bytes(),
        }
    }
}

impl HashAlgorithm {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Keccak256 => "keccak256",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The committed hash a lock checks a presented secret against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hashlock {
    pub algorithm: HashAlgorithm,
    pub digest: [u8; 32],
}

impl Hashlock {
    pub fn new(algorithm: HashAlgorithm, digest: [u8; 32]) -> Self {
        Self { algorithm, digest }
    }

    /// Commit to a secret under this hashlock's algorithm.
    pub fn commit(algorithm: HashAlgorithm, secret: &[u8]) -> Self {
        Self {
            algorithm,
            digest: algorithm.digest(secret),
        }
    }

    /// Whether `secret` is the preimage of this hashlock.
    pub fn matches(&self, secret: &[u8]) -> bool {
        self.algorithm.digest(secret) == self.digest
    }
}

impl fmt::Display for Hashlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, hex::encode(self.digest))
    }
}

/// A 32-byte hashlock preimage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Preimage(pub [u8; 32]);

impl Preimage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a swap order.
    OrderId
);
uuid_id!(
    /// Unique identifier for a partial fill.
    FillId
);
uuid_id!(
    /// Unique identifier for a safety deposit.
    DepositId
);

/// Identifier of an HTLC lock on some chain.
///
/// Derived deterministically from the lock parameters so a retried create
/// resolves to the same lock instead of double-locking funds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockId(pub String);

impl LockId {
    /// Derive the canonical lock id for a (chain, receiver, amount, hashlock,
    /// timelock) tuple.
    pub fn derive(
        chain: &ChainId,
        receiver: &AccountId,
        amount: &Amount,
        hashlock: &Hashlock,
        timelock_ms: u64,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(chain.0.as_bytes());
        hasher.update(receiver.0.as_bytes());
        hasher.update(&amount.value.to_le_bytes());
        hasher.update(amount.asset.0.as_bytes());
        hasher.update(&hashlock.digest);
        hasher.update(&timelock_ms.to_le_bytes());
        Self(hex::encode(hasher.finalize().as_bytes()))
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_algorithms_disagree() {
        let secret = b"lockstep-secret";
        let sha = HashAlgorithm::Sha256.digest(secret);
        let keccak = HashAlgorithm::Keccak256.digest(secret);
        let blake = HashAlgorithm::Blake3.digest(secret);
        assert_ne!(sha, keccak);
        assert_ne!(sha, blake);
        assert_ne!(keccak, blake);
    }

    #[test]
    fn test_hashlock_matches_only_own_algorithm() {
        let secret = b"preimage";
        let lock = Hashlock::commit(HashAlgorithm::Sha256, secret);
        assert!(lock.matches(secret));

        let wrong_alg = Hashlock::new(HashAlgorithm::Keccak256, lock.digest);
        assert!(!wrong_alg.matches(secret));
    }

    #[test]
    fn test_lock_id_deterministic() {
        let chain = ChainId::from("alpha");
        let receiver = AccountId::from("bob");
        let amount = Amount::new(1_000, Asset::from("USDC"));
        let hashlock = Hashlock::commit(HashAlgorithm::Sha256, b"s");

        let a = LockId::derive(&chain, &receiver, &amount, &hashlock, 42);
        let b = LockId::derive(&chain, &receiver, &amount, &hashlock, 42);
        assert_eq!(a, b);

        let c = LockId::derive(&chain, &receiver, &amount, &hashlock, 43);
        assert_ne!(a, c);
    }

    #[test]
    fn test_order_ids_are_unique() {
        assert_ne!(OrderId::new(), OrderId::new());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", HashAlgorithm::Keccak256), "keccak256");
        let amount = Amount::new(7, Asset::from("XLM"));
        assert_eq!(format!("{}", amount), "7 XLM");
    }
}
