use std::path::PathBuf;
use std::time::Duration;

use cpjudge_core::action::{self, TestOpts};
use cpjudge_core::caseformat::CaseFormat;
use cpjudge_core::compare::Tolerance;
use cpjudge_core::testing::ProcessRunner;

use crate::{config::Config, util};

use super::{ArgCompareMode, GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Names of the cases to run (default: every discovered case)
    #[arg()]
    pub case_names: Vec<String>,

    /// Command to test, run through the shell
    #[arg(short = 'c', long)]
    pub command: Option<String>,

    /// Directory holding the testcase files
    #[arg(short = 'd', long)]
    pub directory: Option<PathBuf>,

    /// Case file naming format (%s = case name, %e = in/out)
    #[arg(short = 'f', long)]
    pub format: Option<String>,

    /// Output equivalence policy
    #[arg(short = 'm', long, value_enum)]
    pub mode: Option<ArgCompareMode>,

    /// Accept numeric tokens within this relative/absolute error
    #[arg(short = 'e', long)]
    pub error: Option<f64>,

    /// Wall clock limit per case, in seconds
    #[arg(short = 't', long)]
    pub tle: Option<f64>,

    /// Peak memory limit per case, in megabytes
    #[arg(long)]
    pub mle: Option<f64>,

    /// Report peak memory even without a limit
    #[arg(long)]
    pub memory: bool,

    /// Worker pool size (1 = serial)
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// External judge command for problems with multiple valid outputs
    #[arg(long)]
    pub judge: Option<String>,

    /// Also look at dotfiles and editor backup files during discovery
    #[arg(long)]
    pub keep_junk_files: bool,

    /// Write a JSON summary of every case to this path
    #[arg(long)]
    pub json: Option<PathBuf>,
}

pub async fn exec(args: &Args, _global_args: &GlobalArgs) -> SubcmdResult {
    let cfg = Config::from_file_finding_in_ancestors(util::current_dir())?;

    let format = CaseFormat::parse(
        args.format
            .as_deref()
            .or(cfg.test.format.as_deref())
            .unwrap_or(CaseFormat::DEFAULT),
    )?;
    let mode = args.mode.or(cfg.test.mode).unwrap_or(ArgCompareMode::ExactMatch);

    let opts = TestOpts {
        command: args
            .command
            .clone()
            .or_else(|| cfg.test.command.clone())
            .unwrap_or_else(|| "./a.out".to_owned()),
        directory: args
            .directory
            .clone()
            .or_else(|| cfg.test.directory.clone())
            .unwrap_or_else(|| "test".into()),
        format,
        case_names: args.case_names.clone(),
        mode: mode.into(),
        tolerance: args.error.map(|e| Tolerance { rel: e, abs: e }),
        special_judge: args.judge.clone(),
        shell: cfg
            .test
            .shell
            .clone()
            .unwrap_or_else(|| ProcessRunner::DEFAULT_SHELL.into()),
        time_limit: args.tle.or(cfg.test.tle).map(Duration::from_secs_f64),
        memory_limit_mb: args.mle.or(cfg.test.mle),
        measure_memory: args.memory,
        jobs: args.jobs.or(cfg.test.jobs).unwrap_or(1),
        keep_junk_files: args.keep_junk_files,
        json_path: args.json.clone(),
    };

    let report = action::do_test(&opts).await?;
    Ok(if report.all_accepted() { 0 } else { 1 })
}
