use std::sync::Mutex;

use dagbft_consensus::interfaces::{EquivocationEvidence, SlashingReporter};
use dagbft_consensus_core::validator::ValidatorPubkey;

/// Keeps every reported equivocation around for inspection
#[derive(Debug, Default)]
pub struct CollectingSlashingReporter {
    evidence: Mutex<Vec<EquivocationEvidence>>,
}

impl CollectingSlashingReporter {
    pub fn evidence(&self) -> Vec<EquivocationEvidence> {
        self.evidence.lock().expect("Locking failed").clone()
    }

    pub fn reported(&self, voter: ValidatorPubkey) -> bool {
        self.evidence
            .lock()
            .expect("Locking failed")
            .iter()
            .any(|e| e.voter() == voter)
    }
}

impl SlashingReporter for CollectingSlashingReporter {
    fn report_equivocation(&self, evidence: EquivocationEvidence) {
        self.evidence.lock().expect("Locking failed").push(evidence);
    }
}
