//! Startup registry: every pending patch batch, applied exactly once.
//!
//! The registry is the explicit initialization phase of the engine. Batches
//! are registered while the host is loading, `apply_all` consumes the
//! registry, and nothing of it survives afterwards; the patched streams are
//! handed to the host and never written again by this engine.

use crate::patch::applicator::{apply_batch, ApplyError, PatchDescriptor, PatchOutcome};
use crate::patch::version::{
    matches_host, parse_host_range, parse_host_version, VersionError,
};
use crate::stream::{InstructionStream, RoutineId};
use semver::{Version, VersionReq};
use std::fmt;
use tracing::{info, warn};

/// The descriptors destined for one routine, in application order.
///
/// By convention callers list descriptors in descending anchor position so
/// earlier edits never disturb the anchors still to be resolved.
#[derive(Debug, Clone)]
pub struct PatchBatch {
    pub routine: RoutineId,
    pub host_range: Option<String>,
    pub descriptors: Vec<PatchDescriptor>,
}

impl PatchBatch {
    pub fn new(routine: impl Into<RoutineId>, descriptors: Vec<PatchDescriptor>) -> Self {
        PatchBatch {
            routine: routine.into(),
            host_range: None,
            descriptors,
        }
    }

    pub fn with_host_range(mut self, range: impl Into<String>) -> Self {
        self.host_range = Some(range.into());
        self
    }
}

struct RegisteredBatch {
    batch: PatchBatch,
    range: Option<VersionReq>,
}

/// How one batch ended.
#[derive(Debug, PartialEq)]
pub enum BatchStatus {
    /// Every descriptor reached a terminal state (applied or drift-skipped).
    Completed,
    /// An internal inconsistency stopped the batch partway.
    Aborted,
    /// The running host is outside the batch's host range.
    SkippedVersion,
    /// No stream for the batch's routine was supplied.
    MissingRoutine,
}

/// Report for one batch: status plus per-descriptor outcomes.
#[derive(Debug)]
pub struct BatchReport {
    pub routine: RoutineId,
    pub status: BatchStatus,
    pub outcomes: Vec<(String, Result<PatchOutcome, ApplyError>)>,
}

/// Everything that happened during one startup patch pass.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub batches: Vec<BatchReport>,
}

impl StartupReport {
    pub fn applied(&self) -> usize {
        self.count(|outcome| matches!(outcome, Ok(PatchOutcome::Applied { .. })))
    }

    pub fn drifted(&self) -> usize {
        self.count(|outcome| matches!(outcome, Ok(PatchOutcome::SkippedDrift(_))))
    }

    pub fn skipped_version(&self) -> usize {
        self.count(|outcome| matches!(outcome, Ok(PatchOutcome::SkippedVersion { .. })))
    }

    pub fn aborted(&self) -> usize {
        self.count(|outcome| outcome.is_err())
    }

    pub fn missing_routines(&self) -> usize {
        self.batches
            .iter()
            .filter(|batch| batch.status == BatchStatus::MissingRoutine)
            .count()
    }

    /// True when any descriptor drifted, aborted, or had no routine stream.
    pub fn has_failures(&self) -> bool {
        self.drifted() > 0 || self.aborted() > 0 || self.missing_routines() > 0
    }

    fn count(&self, pred: impl Fn(&Result<PatchOutcome, ApplyError>) -> bool) -> usize {
        self.batches
            .iter()
            .flat_map(|batch| batch.outcomes.iter())
            .filter(|(_, outcome)| pred(outcome))
            .count()
    }
}

impl fmt::Display for StartupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} drifted, {} skipped by host version, {} aborted, {} routines missing",
            self.applied(),
            self.drifted(),
            self.skipped_version(),
            self.aborted(),
            self.missing_routines()
        )
    }
}

/// Owns the pending patch batches for one startup pass.
pub struct PatchRegistry {
    host_version: Version,
    batches: Vec<RegisteredBatch>,
}

impl PatchRegistry {
    pub fn new(host_version: &str) -> Result<Self, VersionError> {
        Ok(PatchRegistry {
            host_version: parse_host_version(host_version)?,
            batches: Vec::new(),
        })
    }

    pub fn host_version(&self) -> &Version {
        &self.host_version
    }

    /// Queue a batch; its host range is parsed eagerly so malformed ranges
    /// fail at registration, not mid-startup.
    pub fn register(&mut self, batch: PatchBatch) -> Result<(), VersionError> {
        let range = parse_host_range(batch.host_range.as_deref())?;
        self.batches.push(RegisteredBatch { batch, range });
        Ok(())
    }

    pub fn register_all(
        &mut self,
        batches: impl IntoIterator<Item = PatchBatch>,
    ) -> Result<(), VersionError> {
        for batch in batches {
            self.register(batch)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Apply every registered batch to its routine's stream, consuming the
    /// registry. Streams are matched by routine identity; batches whose
    /// routine has no stream are reported, not applied.
    pub fn apply_all(self, streams: &mut [InstructionStream]) -> StartupReport {
        let mut report = StartupReport::default();

        for RegisteredBatch { batch, range } in self.batches {
            if !matches_host(&self.host_version, range.as_ref()) {
                let reason = format!(
                    "host {} does not satisfy range {}",
                    self.host_version,
                    batch.host_range.as_deref().unwrap_or_default()
                );
                let outcomes = batch
                    .descriptors
                    .iter()
                    .map(|descriptor| {
                        (
                            descriptor.id.clone(),
                            Ok(PatchOutcome::SkippedVersion {
                                reason: reason.clone(),
                            }),
                        )
                    })
                    .collect();
                report.batches.push(BatchReport {
                    routine: batch.routine,
                    status: BatchStatus::SkippedVersion,
                    outcomes,
                });
                continue;
            }

            let Some(stream) = streams
                .iter_mut()
                .find(|stream| stream.routine() == &batch.routine)
            else {
                warn!(routine = %batch.routine, "no stream supplied for patch batch");
                report.batches.push(BatchReport {
                    routine: batch.routine,
                    status: BatchStatus::MissingRoutine,
                    outcomes: Vec::new(),
                });
                continue;
            };

            let outcomes = apply_batch(stream, &batch.descriptors);
            let status = if outcomes.iter().any(|(_, outcome)| outcome.is_err()) {
                BatchStatus::Aborted
            } else {
                BatchStatus::Completed
            };
            report.batches.push(BatchReport {
                routine: batch.routine,
                status,
                outcomes,
            });
        }

        info!(host = %self.host_version, "patch pass finished: {report}");
        report
    }
}
