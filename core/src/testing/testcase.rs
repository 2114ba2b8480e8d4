use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::caseformat::{CaseExt, CaseFormat};

/// One named test case. Discovery guarantees the input file exists; the
/// expected-output file is optional (such cases are "print only, no
/// judgement").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub input: PathBuf,
    pub expected: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Testcase file name does not follow the naming format: '{}'", .0.display())]
    UnrecognizedFile(PathBuf),

    #[error("Two files resolve to the same case '{name}.{ext}': '{}'", .path.display())]
    DuplicateCaseFile {
        name: String,
        ext: CaseExt,
        path: PathBuf,
    },

    #[error("Testcase '{0}' has an output file but no input file")]
    ExpectedWithoutInput(String),

    #[error(transparent)]
    Io(#[from] fsutil::Error),
}

/// A file we silently skip during discovery: editor junk and dotfiles.
fn is_junk_file_name(name: &str) -> bool {
    name.starts_with('.')
        || name.ends_with('~')
        || (name.starts_with('#') && name.ends_with('#') && name.len() >= 2)
}

impl TestCase {
    /// Scan `dir` and group every file matching `format` into test cases,
    /// sorted by name.
    ///
    /// Every non-junk file must match the format, every case must have an
    /// input, and no two files may resolve to the same `(name, ext)`;
    /// anything else is a configuration error, not a skippable one.
    pub fn discover(
        dir: impl AsRef<Path>,
        format: &CaseFormat,
        keep_junk_files: bool,
    ) -> Result<Vec<Self>, DiscoveryError> {
        let mut inputs: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut expecteds: BTreeMap<String, PathBuf> = BTreeMap::new();

        for entry in fsutil::read_dir(&dir)?.filter_map(Result::ok) {
            let Ok(file_type) = entry.file_type() else {
                continue
            };
            if file_type.is_dir() {
                continue;
            }
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if !keep_junk_files && is_junk_file_name(&file_name) {
                log::debug!("Skipping junk file: {}", path.display());
                continue;
            }

            let Some((name, ext)) = format.match_file_name(&file_name) else {
                return Err(DiscoveryError::UnrecognizedFile(path));
            };
            let side = match ext {
                CaseExt::In => &mut inputs,
                CaseExt::Out => &mut expecteds,
            };
            if side.insert(name.clone(), path.clone()).is_some() {
                return Err(DiscoveryError::DuplicateCaseFile { name, ext, path });
            }
        }

        if let Some(name) = expecteds.keys().find(|name| !inputs.contains_key(*name)) {
            return Err(DiscoveryError::ExpectedWithoutInput(name.clone()));
        }

        let cases = inputs
            .into_iter()
            .map(|(name, input)| {
                let expected = expecteds.remove(&name);
                TestCase {
                    name,
                    input,
                    expected,
                }
            })
            .collect();
        Ok(cases)
    }

    /// Keep only the cases whose name is listed in `names` (empty = all).
    pub fn filter_by_names(cases: Vec<Self>, names: &[String]) -> Vec<Self> {
        if names.is_empty() {
            return cases;
        }
        cases
            .into_iter()
            .filter(|c| names.iter().any(|n| *n == c.name))
            .collect()
    }
}
