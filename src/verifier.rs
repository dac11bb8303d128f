//! End-to-end verification
//!
//! [`VerificationOrchestrator`] runs the transparency and hardware verifiers
//! concurrently on the blocking pool, waits for both, and only when both
//! produced a measurement set compares them. Every step is recorded in an
//! [`EventLog`] returned next to the result.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::attestation::nitro::HardwareVerifier;
use crate::attestation::types::{MeasurementSet, RegisterIndex, DEFAULT_REGISTERS};
use crate::compare::{compare, Outcome, RegisterComparison};
use crate::error::{Error, ErrorKind, Result};
use crate::event_log::{EventLog, EventLogEntry, Level, Stage};
use crate::sigstore::TransparencyVerifier;

/// Where a run is. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    VerifyingBoth,
    ComparatorRun,
    AbortedOnVerifierFailure,
    Done,
}

/// A failure attributed to the stage that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, error: &Error) -> Self {
        Self {
            stage,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one run.
///
/// `success` is true only when both attestations verified and every compared
/// register matched.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    success: bool,
    registers: Vec<RegisterComparison>,
    errors: Vec<StageError>,
    #[serde(skip)]
    sigstore: Option<MeasurementSet>,
    #[serde(skip)]
    hardware: Option<MeasurementSet>,
}

impl VerificationResult {
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn registers(&self) -> &[RegisterComparison] {
        &self.registers
    }

    pub fn errors(&self) -> &[StageError] {
        &self.errors
    }

    /// Measurements claimed by the transparency bundle, if it verified.
    pub fn sigstore_measurements(&self) -> Option<&MeasurementSet> {
        self.sigstore.as_ref()
    }

    /// Measurements reported by the hardware, if the document verified.
    pub fn hardware_measurements(&self) -> Option<&MeasurementSet> {
        self.hardware.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub result: VerificationResult,
    pub events: Vec<EventLogEntry>,
    /// Phases the run went through, starting at `Idle` and ending at `Done`.
    pub phases: Vec<Phase>,
}

impl VerificationReport {
    /// Whether the comparator ran, i.e. both verifiers produced measurements.
    pub fn compared(&self) -> bool {
        self.phases.contains(&Phase::ComparatorRun)
    }
}

/// Single-use driver of one verification run.
pub struct VerificationOrchestrator {
    transparency: Arc<TransparencyVerifier>,
    hardware: Arc<HardwareVerifier>,
    registers: Vec<RegisterIndex>,
    phases: Vec<Phase>,
    log: EventLog,
}

impl VerificationOrchestrator {
    pub fn new(transparency: Arc<TransparencyVerifier>, hardware: Arc<HardwareVerifier>) -> Self {
        Self {
            transparency,
            hardware,
            registers: DEFAULT_REGISTERS.to_vec(),
            phases: vec![Phase::Idle],
            log: EventLog::new(),
        }
    }

    /// Registers to compare, in reporting order.
    pub fn with_registers(mut self, registers: Vec<RegisterIndex>) -> Self {
        self.registers = registers;
        self
    }

    /// Verify already retrieved attestation bytes.
    pub async fn run(
        self,
        expected_digest: &str,
        bundle_bytes: Vec<u8>,
        document_bytes: Vec<u8>,
        expected_repository: &str,
    ) -> VerificationReport {
        self.run_fetched(expected_digest, Ok(bundle_bytes), Ok(document_bytes), expected_repository)
            .await
    }

    /// Like [`run`](Self::run), but either input may be a retrieval failure.
    /// A failed input is reported under its stage with its own error kind
    /// (usually [`ErrorKind::Transport`]); the other input is still verified.
    pub async fn run_fetched(
        mut self,
        expected_digest: &str,
        bundle_bytes: Result<Vec<u8>>,
        document_bytes: Result<Vec<u8>>,
        expected_repository: &str,
    ) -> VerificationReport {
        self.log.info(
            Stage::Orchestrator,
            format!(
                "Verifying {} at digest {} against hardware attestation",
                expected_repository, expected_digest
            ),
        );
        self.enter(Phase::VerifyingBoth);

        let transparency = {
            let verifier = Arc::clone(&self.transparency);
            let digest = expected_digest.to_string();
            let repository = expected_repository.to_string();
            async move {
                let bytes = bundle_bytes?;
                join_blocking(tokio::task::spawn_blocking(move || {
                    verifier.verify(&digest, &bytes, &repository)
                }))
                .await
            }
        };
        let hardware = {
            let verifier = Arc::clone(&self.hardware);
            async move {
                let bytes = document_bytes?;
                join_blocking(tokio::task::spawn_blocking(move || verifier.verify(&bytes))).await
            }
        };
        let (sigstore, hardware) = tokio::join!(transparency, hardware);

        let mut errors = Vec::new();
        let sigstore = self.settle(Stage::Transparency, "Sigstore", sigstore, &mut errors);
        let hardware = self.settle(Stage::Hardware, "Nitro", hardware, &mut errors);

        let (sigstore, hardware) = match (sigstore, hardware) {
            (Some(sigstore), Some(hardware)) => (sigstore, hardware),
            (sigstore, hardware) => {
                self.enter(Phase::AbortedOnVerifierFailure);
                self.log.error(Stage::Orchestrator, "Verification failed");
                return self.finish(false, Vec::new(), errors, sigstore, hardware);
            }
        };

        self.enter(Phase::ComparatorRun);
        let comparison = compare(&sigstore, &hardware, &self.registers);
        for register in &comparison.registers {
            let message = match register.outcome {
                Outcome::Match => format!("PCR{} match", register.index),
                Outcome::Mismatch => format!("PCR{} mismatch", register.index),
                Outcome::Missing => format!("PCR{} missing", register.index),
            };
            if register.outcome == Outcome::Match {
                self.log.info(Stage::Comparison, message);
            } else {
                self.log.error(Stage::Comparison, message);
            }
        }
        for index in comparison.missing() {
            errors.push(StageError::new(Stage::Comparison, &Error::RegisterMissing(index)));
        }
        if comparison.registers.is_empty() {
            self.log.error(Stage::Comparison, "No registers selected for comparison");
        }

        if comparison.success {
            self.log.info(Stage::Orchestrator, "Verification successful");
        } else {
            self.log.error(Stage::Orchestrator, "Verification failed");
        }
        self.finish(comparison.success, comparison.registers, errors, Some(sigstore), Some(hardware))
    }

    fn enter(&mut self, phase: Phase) {
        self.log
            .record(Stage::Orchestrator, Level::Debug, format!("Entering phase {:?}", phase));
        self.phases.push(phase);
    }

    /// Record the outcome of one verifier.
    fn settle(
        &mut self,
        stage: Stage,
        label: &str,
        outcome: Result<MeasurementSet>,
        errors: &mut Vec<StageError>,
    ) -> Option<MeasurementSet> {
        match outcome {
            Ok(set) => {
                for (index, value) in set.iter() {
                    self.log.info(stage, format!("{} PCR{}: {}", label, index, hex::encode(value)));
                }
                self.log.record(
                    stage,
                    Level::Debug,
                    format!("{} measurement fingerprint {}", label, set.fingerprint()),
                );
                Some(set)
            }
            Err(e) => {
                self.log.error(stage, format!("{} verification failed: {}", label, e));
                errors.push(StageError::new(stage, &e));
                None
            }
        }
    }

    fn finish(
        mut self,
        success: bool,
        registers: Vec<RegisterComparison>,
        errors: Vec<StageError>,
        sigstore: Option<MeasurementSet>,
        hardware: Option<MeasurementSet>,
    ) -> VerificationReport {
        self.enter(Phase::Done);
        VerificationReport {
            result: VerificationResult {
                success,
                registers,
                errors,
                sigstore,
                hardware,
            },
            events: self.log.into_entries(),
            phases: self.phases,
        }
    }
}

/// Await a blocking verifier task; a panic inside it is an internal error.
async fn join_blocking<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(Error::Internal(format!("verification task failed: {}", e))),
    }
}
