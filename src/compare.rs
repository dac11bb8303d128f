//! Register-by-register comparison of two measurement sets

use serde::Serialize;

use crate::attestation::types::{MeasurementSet, RegisterIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Match,
    Mismatch,
    /// Absent from at least one side.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterComparison {
    pub index: RegisterIndex,
    pub sigstore_value: Option<String>,
    pub hardware_value: Option<String>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub registers: Vec<RegisterComparison>,
    pub success: bool,
}

impl Comparison {
    pub fn missing(&self) -> impl Iterator<Item = RegisterIndex> + '_ {
        self.registers
            .iter()
            .filter(|r| r.outcome == Outcome::Missing)
            .map(|r| r.index)
    }
}

/// Compare `registers`, in the order given.
///
/// Succeeds only when every listed register is present on both sides with
/// identical bytes. An empty list proves nothing and does not succeed.
pub fn compare(sigstore: &MeasurementSet, hardware: &MeasurementSet, registers: &[RegisterIndex]) -> Comparison {
    let registers: Vec<RegisterComparison> = registers
        .iter()
        .map(|&index| {
            let expected = sigstore.get(index);
            let actual = hardware.get(index);
            let outcome = match (expected, actual) {
                (Some(a), Some(b)) if a == b => Outcome::Match,
                (Some(_), Some(_)) => Outcome::Mismatch,
                _ => Outcome::Missing,
            };
            RegisterComparison {
                index,
                sigstore_value: expected.map(hex::encode),
                hardware_value: actual.map(hex::encode),
                outcome,
            }
        })
        .collect();

    let success = !registers.is_empty() && registers.iter().all(|r| r.outcome == Outcome::Match);
    Comparison { registers, success }
}
