use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context as _};
use colored::Colorize as _;
use tokio::sync::{Mutex, Semaphore};

use super::result::{CaseOutcome, JudgeStatus, RunResult, RunStatus};
use super::runner::ProcessRunner;
use super::testcase::TestCase;
use crate::compare::{JudgeContext, OutputJudge};
use crate::style;

/// Where a finished case's log block goes: straight to stdout in serial
/// mode, or as one atomic block under a mutex when workers run
/// concurrently.
#[derive(Clone)]
enum Console {
    Direct,
    Shared(Arc<Mutex<()>>),
}

impl Console {
    async fn emit(&self, block: &str) {
        match self {
            Console::Direct => print!("{}", block),
            Console::Shared(lock) => {
                let _guard = lock.lock().await;
                print!("{}", block);
            }
        }
    }
}

/// Per-case log buffer. Lines are collected while the case runs and flushed
/// as one block, so concurrent cases never interleave their output.
struct CaseLog {
    buf: String,
}

impl CaseLog {
    fn new() -> Self {
        Self { buf: String::new() }
    }

    fn say(&mut self, line: impl AsRef<str>) {
        self.buf.push_str(line.as_ref());
        self.buf.push('\n');
    }

    async fn flush(self, console: &Console) {
        console.emit(&self.buf).await;
    }
}

/// Runs every discovered test case against one command, serially or over a
/// fixed-size worker pool, and classifies each run into a [`JudgeStatus`].
pub struct TestScheduler {
    runner: ProcessRunner,
    judge: Arc<dyn OutputJudge>,
    memory_limit_mb: Option<f64>,
    jobs: usize,
}

impl TestScheduler {
    pub fn new(runner: ProcessRunner, judge: Arc<dyn OutputJudge>) -> Self {
        Self {
            runner,
            judge,
            memory_limit_mb: None,
            jobs: 1,
        }
    }

    pub fn memory_limit_mb(mut self, limit: Option<f64>) -> Self {
        self.memory_limit_mb = limit;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Run all cases and return one outcome per case, in case order.
    pub async fn run_all(
        &self,
        command: &str,
        cases: &[TestCase],
    ) -> anyhow::Result<Vec<CaseOutcome>> {
        if self.jobs <= 1 {
            self.run_serial(command, cases).await
        } else {
            self.run_concurrent(command, cases).await
        }
    }

    async fn run_serial(
        &self,
        command: &str,
        cases: &[TestCase],
    ) -> anyhow::Result<Vec<CaseOutcome>> {
        let console = Console::Direct;
        let mut outcomes = Vec::with_capacity(cases.len());
        for case in cases {
            let outcome =
                run_one(&self.runner, &*self.judge, self.memory_limit_mb, command, case).await?;
            let mut log = CaseLog::new();
            log.say(status_line(&outcome));
            log.flush(&console).await;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn run_concurrent(
        &self,
        command: &str,
        cases: &[TestCase],
    ) -> anyhow::Result<Vec<CaseOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let console = Console::Shared(Arc::new(Mutex::new(())));

        let mut handles = Vec::with_capacity(cases.len());
        for case in cases.iter().cloned() {
            let semaphore = semaphore.clone();
            let console = console.clone();
            let runner = self.runner.clone();
            let judge = self.judge.clone();
            let memory_limit_mb = self.memory_limit_mb;
            let command = command.to_owned();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("the scheduler never closes its semaphore");
                let outcome = run_one(&runner, &*judge, memory_limit_mb, &command, &case).await?;
                let mut log = CaseLog::new();
                log.say(status_line(&outcome));
                log.flush(&console).await;
                anyhow::Ok(outcome)
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await.context("A test worker panicked")??);
        }
        Ok(outcomes)
    }
}

async fn run_one(
    runner: &ProcessRunner,
    judge: &dyn OutputJudge,
    memory_limit_mb: Option<f64>,
    command: &str,
    case: &TestCase,
) -> anyhow::Result<CaseOutcome> {
    let input = fsutil::read_bytes(&case.input)?;
    let res = runner.run(command, Some(&input)).await?;
    if let RunStatus::SpawnFailed(reason) = &res.status {
        bail!("Failed to spawn '{}': {}", command, reason);
    }
    let expected = case
        .expected
        .as_deref()
        .map(fsutil::read_bytes)
        .transpose()?;

    let (status, lenient_hint) =
        classify(judge, case, &res, expected.as_deref(), memory_limit_mb).await?;
    Ok(CaseOutcome {
        name: case.name.clone(),
        input: case.input.clone(),
        expected: case.expected.clone(),
        status,
        exit_code: res.status.exit_code(),
        elapsed: res.elapsed,
        peak_memory_mb: res.peak_memory_mb,
        stdout: res.stdout,
        lenient_hint,
    })
}

/// Verdict precedence: TLE, then MLE, then RE, then the comparator. The
/// comparator is never consulted for a run that already failed.
async fn classify(
    judge: &dyn OutputJudge,
    case: &TestCase,
    res: &RunResult,
    expected: Option<&[u8]>,
    memory_limit_mb: Option<f64>,
) -> anyhow::Result<(JudgeStatus, bool)> {
    let code = match res.status {
        RunStatus::TimedOut => return Ok((JudgeStatus::TLE, false)),
        RunStatus::SpawnFailed(_) => unreachable!("handled by the caller"),
        RunStatus::Exited(code) => code,
    };
    if let (Some(peak), Some(limit)) = (res.peak_memory_mb, memory_limit_mb) {
        if peak > limit {
            return Ok((JudgeStatus::MLE, false));
        }
    }
    if code != 0 {
        return Ok((JudgeStatus::RE, false));
    }
    let decision = judge
        .judge(&JudgeContext {
            input_path: &case.input,
            expected_path: case.expected.as_deref(),
            actual: &res.stdout,
            expected,
        })
        .await
        .with_context(|| format!("Failed to judge testcase '{}'", case.name))?;
    let status = if decision.accepted {
        JudgeStatus::AC
    } else {
        JudgeStatus::WA
    };
    Ok((status, decision.lenient_hint))
}

fn status_line(outcome: &CaseOutcome) -> String {
    let memory = match outcome.peak_memory_mb {
        Some(mb) => format!(" [{:.1} MB]", mb),
        None => String::new(),
    };
    format!(
        "{}: {} [{} ms]{}",
        outcome.name.bold(),
        style::judge_icon(outcome.status),
        outcome.elapsed.as_millis(),
        memory,
    )
}

/// Post-run aggregate for the one-line summary.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total: usize,
    pub accepted: usize,
    pub slowest: Option<(String, Duration)>,
    pub heaviest: Option<(String, f64)>,
}

impl RunSummary {
    pub fn collect(outcomes: &[CaseOutcome]) -> Self {
        let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
        let slowest = outcomes
            .iter()
            .max_by_key(|o| o.elapsed)
            .map(|o| (o.name.clone(), o.elapsed));
        let heaviest = outcomes
            .iter()
            .filter_map(|o| o.peak_memory_mb.map(|mb| (o.name.clone(), mb)))
            .max_by(|(_, x), (_, y)| x.total_cmp(y));
        Self {
            total: outcomes.len(),
            accepted,
            slowest,
            heaviest,
        }
    }

    pub fn all_accepted(&self) -> bool {
        self.accepted == self.total
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compare::{BuiltinJudge, CompareMode};

    fn make_case(dir: &std::path::Path, name: &str, input: &str, expected: Option<&str>) -> TestCase {
        let input_path = dir.join(format!("{}.in", name));
        fsutil::write(&input_path, input).unwrap();
        let expected_path = expected.map(|data| {
            let path = dir.join(format!("{}.out", name));
            fsutil::write(&path, data).unwrap();
            path
        });
        TestCase {
            name: name.to_owned(),
            input: input_path,
            expected: expected_path,
        }
    }

    fn exact_judge() -> Arc<dyn OutputJudge> {
        Arc::new(BuiltinJudge::new(CompareMode::ExactMatch, None))
    }

    #[tokio::test]
    async fn classifies_ac_and_wa() {
        let dir = tempfile::tempdir().unwrap();
        let cases = vec![
            make_case(dir.path(), "ok", "foo\n", Some("foo\n")),
            make_case(dir.path(), "bad", "foo\n", Some("bar\n")),
        ];
        let scheduler = TestScheduler::new(ProcessRunner::new(), exact_judge());
        let outcomes = scheduler.run_all("cat", &cases).await.unwrap();
        assert_eq!(outcomes[0].status, JudgeStatus::AC);
        assert_eq!(outcomes[1].status, JudgeStatus::WA);

        let summary = RunSummary::collect(&outcomes);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.accepted, 1);
        assert!(!summary.all_accepted());
    }

    #[tokio::test]
    async fn nonzero_exit_is_re_even_with_correct_output() {
        let dir = tempfile::tempdir().unwrap();
        let cases = vec![make_case(dir.path(), "a", "x\n", Some("x\n"))];
        let scheduler = TestScheduler::new(ProcessRunner::new(), exact_judge());
        let outcomes = scheduler.run_all("cat; exit 3", &cases).await.unwrap();
        assert_eq!(outcomes[0].status, JudgeStatus::RE);
        assert_eq!(outcomes[0].exit_code, Some(3));
        assert_eq!(outcomes[0].stdout, b"x\n");
    }

    #[tokio::test]
    async fn timeout_is_tle() {
        let dir = tempfile::tempdir().unwrap();
        let cases = vec![make_case(dir.path(), "slow", "x\n", Some("x\n"))];
        let runner = ProcessRunner::new().time_limit(Some(Duration::from_millis(200)));
        let scheduler = TestScheduler::new(runner, exact_judge());
        let outcomes = scheduler.run_all("sleep 5", &cases).await.unwrap();
        assert_eq!(outcomes[0].status, JudgeStatus::TLE);

        let summary = RunSummary::collect(&outcomes);
        assert!(!summary.all_accepted());
    }

    #[tokio::test]
    async fn display_only_case_passes_on_exit_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cases = vec![make_case(dir.path(), "show", "whatever\n", None)];
        let scheduler = TestScheduler::new(ProcessRunner::new(), exact_judge());
        let outcomes = scheduler.run_all("cat", &cases).await.unwrap();
        assert_eq!(outcomes[0].status, JudgeStatus::AC);
    }

    #[tokio::test]
    async fn missing_command_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let cases = vec![make_case(dir.path(), "a", "x\n", None)];
        let runner = ProcessRunner::new().shell("/no/such/shell");
        let scheduler = TestScheduler::new(runner, exact_judge());
        assert!(scheduler.run_all("cat", &cases).await.is_err());
    }

    #[tokio::test]
    async fn worker_pool_preserves_case_order() {
        let dir = tempfile::tempdir().unwrap();
        let cases: Vec<TestCase> = (0..8)
            .map(|i| {
                make_case(
                    dir.path(),
                    &format!("case-{}", i),
                    &format!("{}\n", i),
                    Some(&format!("{}\n", i)),
                )
            })
            .collect();
        let scheduler = TestScheduler::new(ProcessRunner::new(), exact_judge()).jobs(4);
        let outcomes = scheduler.run_all("cat", &cases).await.unwrap();
        assert_eq!(outcomes.len(), 8);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.name, format!("case-{}", i));
            assert_eq!(outcome.status, JudgeStatus::AC);
        }
    }

    #[tokio::test]
    async fn lenient_hint_survives_into_the_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let cases = vec![make_case(dir.path(), "spacing", "1  2\n", Some("1 2\n"))];
        let scheduler = TestScheduler::new(ProcessRunner::new(), exact_judge());
        let outcomes = scheduler.run_all("cat", &cases).await.unwrap();
        assert_eq!(outcomes[0].status, JudgeStatus::WA);
        assert!(outcomes[0].lenient_hint);
    }
}
