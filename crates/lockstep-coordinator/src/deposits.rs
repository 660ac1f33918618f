use lockstep_core::{
    AccountId, DepositResolution, ForfeitDestination, FillId, SafetyDeposit,
};

use crate::store::OrderRecord;

/// Tracks resolver collateral and resolves each deposit exactly once:
/// released to its poster on fill completion, forfeited when the backing
/// destination lock expires unclaimed.
pub struct SafetyDepositLedger {
    forfeit_destination: ForfeitDestination,
}

impl SafetyDepositLedger {
    pub fn new(forfeit_destination: ForfeitDestination) -> Self {
        Self {
            forfeit_destination,
        }
    }

    /// Release the deposit backing `fill_id` to its poster. Idempotent:
    /// an already-resolved deposit is left untouched.
    pub fn release(&self, record: &mut OrderRecord, fill_id: &FillId) -> Option<AccountId> {
        let deposit = unresolved(record, fill_id)?;
        let poster = deposit.poster.clone();
        deposit.resolution = Some(DepositResolution::ReleasedToPoster);
        tracing::info!(
            order_id = %record.order.id,
            fill_id = %fill_id,
            poster = %poster,
            "safety deposit released to poster"
        );
        Some(poster)
    }

    /// Forfeit the deposit backing `fill_id` to the configured destination.
    /// Idempotent like `release`; a deposit never resolves twice.
    pub fn forfeit(&self, record: &mut OrderRecord, fill_id: &FillId) -> Option<AccountId> {
        let beneficiary = record.order.beneficiary.clone();
        let recipient = match &self.forfeit_destination {
            ForfeitDestination::Beneficiary => beneficiary,
            ForfeitDestination::Treasury(account) => account.clone(),
        };

        let deposit = unresolved(record, fill_id)?;
        deposit.resolution = Some(DepositResolution::Forfeited {
            to: recipient.clone(),
        });
        tracing::warn!(
            order_id = %record.order.id,
            fill_id = %fill_id,
            recipient = %recipient,
            "safety deposit forfeited"
        );
        Some(recipient)
    }
}

fn unresolved<'a>(
    record: &'a mut OrderRecord,
    fill_id: &FillId,
) -> Option<&'a mut SafetyDeposit> {
    record
        .deposits
        .iter_mut()
        .find(|d| &d.fill_id == fill_id && d.resolution.is_none())
}
