// crates/herbtrace-core/src/transitions.rs

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::types::{BatchPhase, QualityGate};

/// Fixed step-type → phase table. Step types outside the table leave the
/// batch phase untouched; that is a no-op, not an error. No predecessor
/// guard is enforced.
static PHASE_TABLE: Lazy<HashMap<&'static str, BatchPhase>> = Lazy::new(|| {
    HashMap::from([
        ("RECEIPT", BatchPhase::ReceiptDone),
        ("DRYING", BatchPhase::DryingDone),
        ("GRINDING", BatchPhase::GrindingDone),
    ])
});

pub fn next_phase(step_type: &str) -> Option<BatchPhase> {
    PHASE_TABLE.get(step_type).copied()
}

/// PASS iff moisture is at or below the configured threshold and the
/// pesticide screen passed. Pure and total.
pub fn evaluate_gate(moisture_pct: f64, pesticide_pass: bool, threshold_pct: f64) -> QualityGate {
    if moisture_pct <= threshold_pct && pesticide_pass {
        QualityGate::Pass
    } else {
        QualityGate::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_step_types_advance_phase() {
        assert_eq!(next_phase("RECEIPT"), Some(BatchPhase::ReceiptDone));
        assert_eq!(next_phase("DRYING"), Some(BatchPhase::DryingDone));
        assert_eq!(next_phase("GRINDING"), Some(BatchPhase::GrindingDone));
    }

    #[test]
    fn unknown_step_type_is_a_no_op() {
        assert_eq!(next_phase("UNKNOWN"), None);
        assert_eq!(next_phase("receipt"), None);
        assert_eq!(next_phase(""), None);
    }

    #[test]
    fn gate_requires_both_conditions() {
        assert_eq!(evaluate_gate(10.5, true, 12.0), QualityGate::Pass);
        assert_eq!(evaluate_gate(15.0, true, 12.0), QualityGate::Fail);
        assert_eq!(evaluate_gate(5.0, false, 12.0), QualityGate::Fail);
    }

    #[test]
    fn gate_threshold_is_inclusive() {
        assert_eq!(evaluate_gate(12.0, true, 12.0), QualityGate::Pass);
    }
}
