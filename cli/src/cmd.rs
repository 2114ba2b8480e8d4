pub mod genin;
pub mod test;

use cpjudge_core::compare::CompareMode;

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct GlobalArgs {
    #[command(subcommand)]
    pub subcmd: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    #[command(alias("t"))]
    Test(test::Args),

    #[command(name = "generate-input", alias("g"))]
    GenerateInput(genin::Args),
}

pub type SubcmdResult = anyhow::Result<i32>;

impl GlobalArgs {
    pub async fn exec_subcmd(&self) -> SubcmdResult {
        use Subcommand::*;
        match &self.subcmd {
            Test(args) => test::exec(args, self).await,
            GenerateInput(args) => genin::exec(args, self).await,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, serde::Deserialize,
)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ArgCompareMode {
    ExactMatch,
    CrlfInsensitiveExactMatch,
    IgnoreSpaces,
    IgnoreSpacesAndNewlines,
}

impl From<ArgCompareMode> for CompareMode {
    fn from(value: ArgCompareMode) -> Self {
        use ArgCompareMode::*;
        match value {
            ExactMatch => CompareMode::ExactMatch,
            CrlfInsensitiveExactMatch => CompareMode::CrlfInsensitiveExactMatch,
            IgnoreSpaces => CompareMode::IgnoreSpaces,
            IgnoreSpacesAndNewlines => CompareMode::IgnoreSpacesAndNewlines,
        }
    }
}

impl From<&ArgCompareMode> for CompareMode {
    fn from(&value: &ArgCompareMode) -> Self {
        value.into()
    }
}
