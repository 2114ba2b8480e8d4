use std::path::PathBuf;
use std::time::Duration;

use cpjudge_core::action::{self, GenOpts};
use cpjudge_core::caseformat::CaseFormat;
use cpjudge_core::compare::Tolerance;
use cpjudge_core::testing::ProcessRunner;

use crate::{config::Config, util};

use super::{ArgCompareMode, GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Input generator command, run through the shell
    #[arg()]
    pub generator: String,

    /// Trusted reference solution; its output becomes the expected output
    #[arg(short = 'r', long)]
    pub reference: Option<String>,

    /// Candidate command to hack; switches to adversarial search
    #[arg(long)]
    pub hack: Option<String>,

    /// Number of inputs to generate, or the maximum number of hack attempts
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Worker pool size (1 = serial)
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Directory the generated case files are written to
    #[arg(short = 'd', long)]
    pub directory: Option<PathBuf>,

    /// Case file naming format (%s = case name, %e = in/out)
    #[arg(short = 'f', long)]
    pub format: Option<String>,

    /// Prefix for generated case names (default: "hack" when hacking,
    /// "random" otherwise)
    #[arg(long)]
    pub name: Option<String>,

    /// Output equivalence policy for candidate-vs-reference comparison
    #[arg(short = 'm', long, value_enum)]
    pub mode: Option<ArgCompareMode>,

    /// Accept numeric tokens within this relative/absolute error
    #[arg(short = 'e', long)]
    pub error: Option<f64>,

    /// Wall clock limit per generator/reference/candidate run, in seconds
    #[arg(short = 't', long)]
    pub tle: Option<f64>,
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
    let name_prefix = args.name.clone().unwrap_or_else(|| {
        if args.hack.is_some() { "hack" } else { "random" }.to_owned()
    });

    let opts = GenOpts {
        generator: args.generator.clone(),
        reference: args.reference.clone(),
        hack: args.hack.clone(),
        count: args.count.or(cfg.generate.count).unwrap_or(100),
        jobs: args.jobs.or(cfg.generate.jobs).unwrap_or(1),
        directory: args
            .directory
            .clone()
            .or_else(|| cfg.test.directory.clone())
            .unwrap_or_else(|| "test".into()),
        format,
        name_prefix,
        shell: cfg
            .test
            .shell
            .clone()
            .unwrap_or_else(|| ProcessRunner::DEFAULT_SHELL.into()),
        time_limit: args.tle.or(cfg.test.tle).map(Duration::from_secs_f64),
        mode: mode.into(),
        tolerance: args.error.map(|e| Tolerance { rel: e, abs: e }),
    };

    action::do_generate_input(&opts).await?;
    Ok(0)
}
