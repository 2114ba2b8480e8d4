pub mod error {
    #[allow(unused_imports)]
    pub(crate) use anyhow::{anyhow, bail, ensure, Context as _};
    pub use anyhow::{Error, Result};
}
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use colored::{Color, Colorize};
use error::*;

use crate::caseformat::{CaseExt, CaseFormat};
use crate::compare::{BuiltinJudge, CompareMode, OutputJudge, SpecialJudge, Tolerance};
use crate::diff::{self, DiffLimits, SnipLimits};
use crate::hack::HackSearch;
use crate::style;
use crate::testing::{
    CaseOutcome, JudgeStatus, ProcessRunner, RunSummary, TestCase, TestScheduler,
};

#[derive(Debug, Clone)]
pub struct TestOpts {
    pub command: String,
    pub directory: PathBuf,
    pub format: CaseFormat,
    /// Empty = run every discovered case.
    pub case_names: Vec<String>,
    pub mode: CompareMode,
    pub tolerance: Option<Tolerance>,
    pub special_judge: Option<String>,
    pub shell: PathBuf,
    pub time_limit: Option<Duration>,
    pub memory_limit_mb: Option<f64>,
    pub measure_memory: bool,
    pub jobs: usize,
    pub keep_junk_files: bool,
    pub json_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct TestReport {
    pub outcomes: Vec<CaseOutcome>,
    pub summary: RunSummary,
}

impl TestReport {
    pub fn all_accepted(&self) -> bool {
        self.summary.all_accepted()
    }
}

pub async fn do_test(opts: &TestOpts) -> Result<TestReport> {
    let cases = TestCase::discover(&opts.directory, &opts.format, opts.keep_junk_files)
        .context("Failed to discover testcases")?;
    let cases = TestCase::filter_by_names(cases, &opts.case_names);
    if cases.is_empty() {
        bail!("No testcase found in {}", opts.directory.display());
    }

    let judge: Arc<dyn OutputJudge> = match &opts.special_judge {
        Some(command) => Arc::new(SpecialJudge::new(command, &opts.shell)),
        None => Arc::new(BuiltinJudge::new(opts.mode, opts.tolerance)),
    };
    let runner = ProcessRunner::new()
        .shell(&opts.shell)
        .time_limit(opts.time_limit)
        .measure_memory(opts.measure_memory || opts.memory_limit_mb.is_some());

    log::info!("Running: {}", opts.command);
    let scheduler = TestScheduler::new(runner, judge)
        .memory_limit_mb(opts.memory_limit_mb)
        .jobs(opts.jobs);
    let outcomes = scheduler.run_all(&opts.command, &cases).await?;

    let mut printer = DetailPrinter::new(opts.mode, opts.tolerance);
    for outcome in outcomes.iter().filter(|o| !o.is_accepted()) {
        printer.print(outcome);
    }

    let summary = RunSummary::collect(&outcomes);
    print_test_result_summary(&outcomes, &summary);

    if let Some(path) = &opts.json_path {
        write_json_summary(path, &outcomes)?;
        log::info!("Wrote the JSON summary to {}", path.display());
    }

    Ok(TestReport { outcomes, summary })
}

/// Prints the per-case failure details. The blank separator line before the
/// first detail block is printed exactly once, tracked by an explicit field.
struct DetailPrinter {
    mode: CompareMode,
    tolerance: Option<Tolerance>,
    printed_header: bool,
}

impl DetailPrinter {
    fn new(mode: CompareMode, tolerance: Option<Tolerance>) -> Self {
        Self {
            mode,
            tolerance,
            printed_header: false,
        }
    }

    fn print(&mut self, outcome: &CaseOutcome) {
        if !self.printed_header {
            self.printed_header = true;
            println!();
        }

        let cols = style::terminal_cols();
        const BOLD_LINE: &str = "━";
        const THIN_LINE: &str = "─";
        let bold_bar = BOLD_LINE.repeat(cols).blue().bold();

        println!(
            "{}: {} [{} ms]\n{}",
            outcome.name.color(Color::BrightYellow).bold(),
            style::judge_icon(outcome.status),
            outcome.elapsed.as_millis(),
            bold_bar,
        );

        fn print_sub_title(s: &str, cols: usize) {
            println!(
                "{}{}",
                s.cyan().bold(),
                THIN_LINE.repeat(cols.saturating_sub(s.len() + 1)).bright_black(),
            )
        }

        match (&outcome.expected, outcome.status) {
            (Some(expected_path), JudgeStatus::WA) => {
                print_sub_title("[diff: expected vs actual]", cols);
                let expected = fsutil::read_bytes(expected_path).unwrap_or_default();
                let tokens = diff::render_diff(
                    &outcome.stdout,
                    &expected,
                    self.mode,
                    self.tolerance,
                    &DiffLimits::default(),
                );
                print!("{}", style::render_tokens(&tokens, true));
            }
            _ => {
                print_sub_title("[stdout]", cols);
                let tokens = diff::render_content(&outcome.stdout, &SnipLimits::default());
                print!("{}", style::render_tokens(&tokens, true));
            }
        }

        if outcome.lenient_hint {
            println!(
                "{}",
                "This output would be accepted with --mode ignore-spaces-and-newlines"
                    .yellow()
            );
        }
        println!("{}", bold_bar);
    }
}

fn print_test_result_summary(outcomes: &[CaseOutcome], summary: &RunSummary) {
    if let Some((name, elapsed)) = &summary.slowest {
        println!("slowest: {} ms (testcase {})", elapsed.as_millis(), name);
    }
    if let Some((name, mb)) = &summary.heaviest {
        println!("max memory: {:.1} MB (testcase {})", mb, name);
    }

    let bar = "-".repeat(5);
    print!("{} ", bar);

    let count: HashMap<JudgeStatus, usize> =
        outcomes.iter().fold(HashMap::new(), |mut count, o| {
            *count.entry(o.status).or_default() += 1;
            count
        });

    let num_total = summary.total;
    let num_passed = summary.accepted;
    let num_failed = num_total - num_passed;

    if num_passed == num_total {
        let msg = format!("All {} tests passed ✨", num_total);
        print!("{}", msg.green());
    } else {
        let summary_msg = if num_passed > 0 {
            format!("{}/{} tests failed 💣", num_failed, num_total)
        } else {
            format!("All {} tests failed 💀", num_total)
        };

        let detail_msg = count
            .iter()
            .filter(|(&status, _)| status != JudgeStatus::AC)
            .map(|(&status, &cnt)| {
                format!(
                    "{}{}{}",
                    style::judge_icon(status),
                    "x".dimmed(),
                    cnt.to_string().bold().bright_white(),
                )
            })
            .collect::<Vec<String>>()
            .join(", ");

        print!("{} ({})", summary_msg.bright_red(), detail_msg);
    }

    println!(" {}", bar);
}

#[derive(Debug, serde::Serialize)]
struct JsonCaseRow<'a> {
    name: &'a str,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exitcode: Option<i32>,
    elapsed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<f64>,
    stdout: String,
}

fn write_json_summary(path: &Path, outcomes: &[CaseOutcome]) -> Result<()> {
    let rows: Vec<JsonCaseRow> = outcomes
        .iter()
        .map(|o| JsonCaseRow {
            name: &o.name,
            input: o.input.to_string_lossy().into_owned(),
            output: o.expected.as_ref().map(|p| p.to_string_lossy().into_owned()),
            status: o.status.to_string(),
            exitcode: o.exit_code,
            elapsed: o.elapsed.as_secs_f64(),
            memory: o.peak_memory_mb,
            stdout: String::from_utf8_lossy(&o.stdout).into_owned(),
        })
        .collect();
    fsutil::write_json_with_mkdir(path, &rows)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GenOpts {
    pub generator: String,
    pub reference: Option<String>,
    /// Candidate-under-test; its presence switches from plain generation to
    /// hack search.
    pub hack: Option<String>,
    pub count: usize,
    pub jobs: usize,
    pub directory: PathBuf,
    pub format: CaseFormat,
    pub name_prefix: String,
    pub shell: PathBuf,
    pub time_limit: Option<Duration>,
    pub mode: CompareMode,
    pub tolerance: Option<Tolerance>,
}

pub async fn do_generate_input(opts: &GenOpts) -> Result<()> {
    let runner = ProcessRunner::new()
        .shell(&opts.shell)
        .time_limit(opts.time_limit);
    let comparator = opts.mode.build(opts.tolerance);
    let search = Arc::new(
        HackSearch::new(runner, &opts.generator, comparator)
            .reference(opts.reference.clone())
            .candidate(opts.hack.clone())
            .jobs(opts.jobs),
    );

    if opts.hack.is_some() {
        log::info!(
            "Searching for a disagreement (at most {} attempts)",
            opts.count
        );
        let Some(attempt) = search.search(opts.count).await? else {
            bail!("No disagreement found within {} attempts", opts.count);
        };
        let name = next_free_case_name(&opts.directory, &opts.format, &opts.name_prefix);
        let input_path = save_case_file(opts, &name, CaseExt::In, &attempt.input)?;
        println!(
            "{}: found a {} case on attempt {} -> {}",
            name.bold(),
            attempt.status,
            attempt.index + 1,
            input_path.display(),
        );
        if opts.reference.is_some() {
            let output_path =
                save_case_file(opts, &name, CaseExt::Out, &attempt.reference_output)?;
            println!("{}: expected output -> {}", name.bold(), output_path.display());
        }
        return Ok(());
    }

    let produced = search.generate(opts.count).await?;
    if produced.is_empty() {
        bail!("The generator '{}' produced nothing usable", opts.generator);
    }
    if produced.len() < opts.count {
        log::warn!(
            "Only {} of {} generator passes succeeded",
            produced.len(),
            opts.count
        );
    }
    for (input, expected) in &produced {
        let name = next_free_case_name(&opts.directory, &opts.format, &opts.name_prefix);
        let input_path = save_case_file(opts, &name, CaseExt::In, input)?;
        println!("{}: input -> {}", name.bold(), input_path.display());
        if let Some(expected) = expected {
            save_case_file(opts, &name, CaseExt::Out, expected)?;
        }
    }
    Ok(())
}

fn save_case_file(opts: &GenOpts, name: &str, ext: CaseExt, data: &[u8]) -> Result<PathBuf> {
    let path = opts.directory.join(opts.format.fill(name, ext));
    fsutil::write_with_mkdir(&path, data)?;
    Ok(path)
}

/// First `prefix-NNN` (zero-padded) with neither an input nor an output file
/// on disk.
fn next_free_case_name(dir: &Path, format: &CaseFormat, prefix: &str) -> String {
    let mut index = 0usize;
    loop {
        let name = format!("{}-{:03}", prefix, index);
        let input = dir.join(format.fill(&name, CaseExt::In));
        let output = dir.join(format.fill(&name, CaseExt::Out));
        if !input.exists() && !output.exists() {
            return name;
        }
        index += 1;
    }
}
