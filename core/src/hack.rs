use std::{
    collections::HashSet,
    hash::{Hash as _, Hasher as _},
    sync::{Arc, Mutex},
};

use anyhow::{bail, Context as _};
use tokio::task::JoinSet;

use crate::compare::OutputComparator;
use crate::testing::result::{JudgeStatus, RunStatus};
use crate::testing::runner::ProcessRunner;

/// Bounded detector for generators that forgot to seed their RNG.
///
/// Hashes of the first `capacity` generated inputs are kept; a repeated hash
/// triggers a warning. Once the bound is reached, checking turns itself off
/// so memory stays capped on long searches.
pub struct DuplicateGuard {
    seen: HashSet<u64>,
    capacity: usize,
    disabled: bool,
}

impl DuplicateGuard {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            capacity,
            disabled: false,
        }
    }

    /// Record one generated input. Returns `false` when the input was seen
    /// before (and warns); always `true` once checking is disabled.
    pub fn check(&mut self, input: &[u8]) -> bool {
        if self.disabled {
            return true;
        }
        if self.seen.len() >= self.capacity {
            self.disabled = true;
            self.seen = HashSet::new();
            log::info!(
                "Stopped checking for duplicate inputs after {} attempts",
                self.capacity
            );
            return true;
        }
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        input.hash(&mut hasher);
        let fresh = self.seen.insert(hasher.finish());
        if !fresh {
            log::warn!(
                "The generator produced the same input twice; did you seed your random generator?"
            );
        }
        fresh
    }
}

/// One disagreement found by the search: the input plus both sides' output.
#[derive(Debug, Clone)]
pub struct HackAttempt {
    pub index: usize,
    pub input: Vec<u8>,
    pub reference_output: Vec<u8>,
    pub candidate_output: Vec<u8>,
    pub status: JudgeStatus,
}

enum AttemptOutcome {
    /// Generator (and reference, when configured) succeeded; either no
    /// candidate is configured, or the candidate agreed.
    Produced {
        input: Vec<u8>,
        expected: Option<Vec<u8>>,
    },
    Disagreed(HackAttempt),
    /// Generator or reference itself failed. Logged and discarded.
    Aborted,
}

/// Drives a generator -> reference -> candidate pipeline until the candidate
/// disagrees with the reference, or the allowed number of attempts runs out.
pub struct HackSearch {
    runner: ProcessRunner,
    generator: String,
    reference: Option<String>,
    candidate: Option<String>,
    comparator: Box<dyn OutputComparator>,
    jobs: usize,
    guard: Mutex<DuplicateGuard>,
}

impl HackSearch {
    pub fn new(
        runner: ProcessRunner,
        generator: impl Into<String>,
        comparator: Box<dyn OutputComparator>,
    ) -> Self {
        Self {
            runner,
            generator: generator.into(),
            reference: None,
            candidate: None,
            comparator,
            jobs: 1,
            guard: Mutex::new(DuplicateGuard::new(DuplicateGuard::DEFAULT_CAPACITY)),
        }
    }

    pub fn reference(mut self, command: Option<String>) -> Self {
        self.reference = command;
        self
    }

    pub fn candidate(mut self, command: Option<String>) -> Self {
        self.candidate = command;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// One full pipeline pass.
    async fn attempt(&self, index: usize) -> anyhow::Result<AttemptOutcome> {
        let gen_res = self.runner.run(&self.generator, None).await?;
        if stage_failed("generator", &self.generator, &gen_res.status)? {
            return Ok(AttemptOutcome::Aborted);
        }
        let input = gen_res.stdout;
        self.guard
            .lock()
            .expect("duplicate guard lock poisoned")
            .check(&input);

        let expected = match &self.reference {
            Some(command) => {
                let res = self.runner.run(command, Some(&input)).await?;
                if stage_failed("reference solution", command, &res.status)? {
                    return Ok(AttemptOutcome::Aborted);
                }
                Some(res.stdout)
            }
            None => None,
        };

        let Some(candidate) = &self.candidate else {
            return Ok(AttemptOutcome::Produced { input, expected });
        };
        let res = self.runner.run(candidate, Some(&input)).await?;
        let status = match &res.status {
            RunStatus::TimedOut => JudgeStatus::TLE,
            RunStatus::SpawnFailed(reason) => {
                bail!("Failed to spawn the candidate '{}': {}", candidate, reason)
            }
            RunStatus::Exited(code) if *code != 0 => JudgeStatus::RE,
            RunStatus::Exited(_) => {
                let agreed = match &expected {
                    Some(expected) => self.comparator.accepts(&res.stdout, expected),
                    None => true,
                };
                if agreed {
                    JudgeStatus::AC
                } else {
                    JudgeStatus::WA
                }
            }
        };

        if status == JudgeStatus::AC {
            Ok(AttemptOutcome::Produced { input, expected })
        } else {
            Ok(AttemptOutcome::Disagreed(HackAttempt {
                index,
                input,
                reference_output: expected.unwrap_or_default(),
                candidate_output: res.stdout,
                status,
            }))
        }
    }

    /// Hunt for the first disagreement, keeping `jobs` attempts in flight.
    /// Returns `None` when `max_attempts` passes found nothing.
    pub async fn search(self: &Arc<Self>, max_attempts: usize) -> anyhow::Result<Option<HackAttempt>> {
        let mut workers = JoinSet::new();
        let mut next_index = 0usize;
        while next_index < max_attempts && workers.len() < self.jobs {
            let this = Arc::clone(self);
            let index = next_index;
            workers.spawn(async move { this.attempt(index).await });
            next_index += 1;
        }

        while let Some(res) = workers.join_next().await {
            let outcome = res.context("A hack worker panicked")??;
            if let AttemptOutcome::Disagreed(attempt) = outcome {
                workers.abort_all();
                return Ok(Some(attempt));
            }
            // keep exactly `jobs` attempts in flight
            if next_index < max_attempts {
                let this = Arc::clone(self);
                let index = next_index;
                workers.spawn(async move { this.attempt(index).await });
                next_index += 1;
            }
        }
        Ok(None)
    }

    /// Run exactly `count` generator passes (concurrently, like `search`)
    /// and return each produced `(input, reference_output)` pair. Failed
    /// generator/reference passes are logged and skipped.
    pub async fn generate(self: &Arc<Self>, count: usize) -> anyhow::Result<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
        let mut workers = JoinSet::new();
        let mut next_index = 0usize;
        while next_index < count && workers.len() < self.jobs {
            let this = Arc::clone(self);
            workers.spawn(async move { this.attempt(0).await });
            next_index += 1;
        }

        let mut produced = Vec::new();
        while let Some(res) = workers.join_next().await {
            match res.context("A generator worker panicked")?? {
                AttemptOutcome::Produced { input, expected } => produced.push((input, expected)),
                AttemptOutcome::Disagreed(attempt) => {
                    // no candidate is configured in plain generation, but a
                    // candidate-as-reference mismatch still yields data
                    produced.push((attempt.input, Some(attempt.reference_output)));
                }
                AttemptOutcome::Aborted => (),
            }
            if next_index < count {
                let this = Arc::clone(self);
                workers.spawn(async move { this.attempt(0).await });
                next_index += 1;
            }
        }
        Ok(produced)
    }
}

/// Classify a generator/reference sub-step. Failures are warnings, not
/// verdicts; spawn failures are configuration errors and abort everything.
fn stage_failed(stage: &str, command: &str, status: &RunStatus) -> anyhow::Result<bool> {
    match status {
        RunStatus::Exited(0) => Ok(false),
        RunStatus::Exited(code) => {
            log::warn!(
                "The {} exited with code {}; discarding this attempt",
                stage,
                code
            );
            Ok(true)
        }
        RunStatus::TimedOut => {
            log::warn!("The {} timed out; discarding this attempt", stage);
            Ok(true)
        }
        RunStatus::SpawnFailed(reason) => {
            bail!("Failed to spawn the {} '{}': {}", stage, command, reason)
        }
    }
}
