//! Core types for attestation verification

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a Platform Configuration Register.
pub type RegisterIndex = u32;

/// Registers compared when the caller does not choose otherwise: boot image,
/// kernel/bootstrap, and application image.
pub const DEFAULT_REGISTERS: [RegisterIndex; 3] = [0, 1, 2];

/// Predicate types for the measurement formats this crate understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateType {
    #[serde(rename = "https://tinfoil.sh/predicate/aws-nitro-enclave/v1")]
    AwsNitroEnclaveV1,

    #[serde(other)]
    Unknown,
}

impl PredicateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredicateType::AwsNitroEnclaveV1 => "https://tinfoil.sh/predicate/aws-nitro-enclave/v1",
            PredicateType::Unknown => "unknown",
        }
    }

    /// Parse a predicate type URI, accepting only known values.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "https://tinfoil.sh/predicate/aws-nitro-enclave/v1" => Some(PredicateType::AwsNitroEnclaveV1),
            _ => None,
        }
    }
}

impl fmt::Display for PredicateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PCR values extracted from one attestation.
///
/// Values are held as raw bytes. Hex input is decoded once on insertion, so
/// `ABCD` and `abcd` are the same measurement while `0abcd` is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementSet {
    predicate: PredicateType,
    registers: BTreeMap<RegisterIndex, Vec<u8>>,
}

impl MeasurementSet {
    pub fn new(predicate: PredicateType) -> Self {
        Self {
            predicate,
            registers: BTreeMap::new(),
        }
    }

    pub fn predicate(&self) -> &PredicateType {
        &self.predicate
    }

    pub fn insert(&mut self, index: RegisterIndex, value: impl Into<Vec<u8>>) {
        self.registers.insert(index, value.into());
    }

    /// Insert a hex-encoded register value.
    pub fn insert_hex(&mut self, index: RegisterIndex, value: &str) -> Result<(), hex::FromHexError> {
        let bytes = hex::decode(value)?;
        self.registers.insert(index, bytes);
        Ok(())
    }

    pub fn get(&self, index: RegisterIndex) -> Option<&[u8]> {
        self.registers.get(&index).map(Vec::as_slice)
    }

    /// Canonical lowercase hex of a register.
    pub fn hex(&self, index: RegisterIndex) -> Option<String> {
        self.get(index).map(hex::encode)
    }

    pub fn contains(&self, index: RegisterIndex) -> bool {
        self.registers.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Registers in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (RegisterIndex, &[u8])> {
        self.registers.iter().map(|(i, v)| (*i, v.as_slice()))
    }

    /// SHA-256 over the predicate type and the hex register values in index
    /// order.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.predicate.as_str().as_bytes());
        for (_, value) in self.iter() {
            hasher.update(hex::encode(value).as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for MeasurementSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (index, value) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "PCR{}={}", index, hex::encode(value))?;
            first = false;
        }
        Ok(())
    }
}
