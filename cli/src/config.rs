use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

use crate::cmd::ArgCompareMode;

/// Optional per-project defaults, searched for in the current directory and
/// its ancestors. Command-line flags always win over file values, and a
/// missing file simply means all defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub test: TestSection,
    pub generate: GenerateSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestSection {
    pub shell: Option<PathBuf>,
    pub command: Option<String>,
    pub directory: Option<PathBuf>,
    pub format: Option<String>,
    pub mode: Option<ArgCompareMode>,
    pub jobs: Option<usize>,
    /// Wall clock limit in seconds.
    pub tle: Option<f64>,
    /// Peak memory limit in megabytes.
    pub mle: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerateSection {
    pub count: Option<usize>,
    pub jobs: Option<usize>,
}

impl Config {
    pub const FILENAME: &str = "cpjudge.toml";

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Find the config file in `cur_dir` or any ancestor dir.
    pub fn find_file_in_ancestors(cur_dir: impl AsRef<Path>) -> Option<PathBuf> {
        cur_dir
            .as_ref()
            .ancestors()
            .map(|dir| dir.join(Self::FILENAME))
            .find(|path| path.is_file())
    }

    pub fn from_file_finding_in_ancestors(cur_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let Some(path) = Self::find_file_in_ancestors(cur_dir) else {
            return Ok(Self::default());
        };
        let toml = fsutil::read_to_string(&path)?;
        Self::from_toml(&toml).with_context(|| format!("Invalid config TOML: {:?}", path))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let toml = r#"
            [test]
            shell = "/bin/bash"
            command = "./a.out"
            directory = "tests"
            format = "%s.%e"
            mode = "ignore-spaces"
            jobs = 4
            tle = 2.0
            mle = 256.0

            [generate]
            count = 50
            jobs = 2
        "#;
        let cfg = Config::from_toml(toml).unwrap();
        assert_eq!(cfg.test.shell.as_deref(), Some(Path::new("/bin/bash")));
        assert_eq!(cfg.test.mode, Some(ArgCompareMode::IgnoreSpaces));
        assert_eq!(cfg.test.jobs, Some(4));
        assert_eq!(cfg.generate.count, Some(50));
    }

    #[test]
    fn empty_config_is_all_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("[test]\ntimelimit = 3\n").is_err());
    }

    #[test]
    fn found_in_an_ancestor_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fsutil::mkdir_all(&nested).unwrap();
        fsutil::write(dir.path().join(Config::FILENAME), "[test]\njobs = 2\n").unwrap();

        let found = Config::find_file_in_ancestors(&nested).unwrap();
        assert_eq!(found, dir.path().join(Config::FILENAME));

        let cfg = Config::from_file_finding_in_ancestors(&nested).unwrap();
        assert_eq!(cfg.test.jobs, Some(2));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::from_file_finding_in_ancestors(dir.path()).unwrap();
        assert_eq!(cfg, Config::default());
    }
}
