use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;

use crate::testing::runner::ProcessRunner;
use crate::testing::result::RunStatus;

/// An output-equivalence predicate. Comparators compose by decoration: the
/// whitespace splitters wrap a token-level comparator, CRLF normalization
/// wraps anything.
pub trait OutputComparator: Send + Sync {
    fn accepts(&self, actual: &[u8], expected: &[u8]) -> bool;
}

/// Byte-identical.
pub struct ExactComparator;

impl OutputComparator for ExactComparator {
    fn accepts(&self, actual: &[u8], expected: &[u8]) -> bool {
        actual == expected
    }
}

/// Normalizes `\r\n` to `\n` on both sides before delegating.
pub struct CrlfInsensitiveComparator(pub Box<dyn OutputComparator>);

fn strip_cr(bytes: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        res.push(b);
    }
    res
}

impl OutputComparator for CrlfInsensitiveComparator {
    fn accepts(&self, actual: &[u8], expected: &[u8]) -> bool {
        self.0.accepts(&strip_cr(actual), &strip_cr(expected))
    }
}

/// Splits both sides on runs of whitespace and compares token-wise.
/// Token counts must agree.
pub struct SplitComparator(pub Box<dyn OutputComparator>);

fn tokens(bytes: &[u8]) -> Vec<&[u8]> {
    bytes
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
        .collect()
}

impl OutputComparator for SplitComparator {
    fn accepts(&self, actual: &[u8], expected: &[u8]) -> bool {
        let (xs, ys) = (tokens(actual), tokens(expected));
        xs.len() == ys.len()
            && xs
                .iter()
                .zip(&ys)
                .all(|(x, y)| self.0.accepts(x, y))
    }
}

/// Splits both sides on newlines (tolerating exactly one trailing empty
/// line, so `"foo\n"` is equivalent to `"foo"`) and compares line-wise.
/// Line counts must agree.
pub struct SplitLinesComparator(pub Box<dyn OutputComparator>);

fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = bytes.split(|&b| b == b'\n').collect();
    if lines.last() == Some(&&b""[..]) {
        lines.pop();
    }
    lines
}

impl OutputComparator for SplitLinesComparator {
    fn accepts(&self, actual: &[u8], expected: &[u8]) -> bool {
        let (xs, ys) = (split_lines(actual), split_lines(expected));
        xs.len() == ys.len()
            && xs
                .iter()
                .zip(&ys)
                .all(|(x, y)| self.0.accepts(x, y))
    }
}

/// Accepts two tokens when both parse as reals within a relative/absolute
/// tolerance; falls back to exact equality when either does not parse.
pub struct FloatTolerantComparator {
    rel: f64,
    abs: f64,
}

impl FloatTolerantComparator {
    pub fn new(rel: f64, abs: f64) -> Self {
        if rel > 1.0 || abs > 1.0 {
            log::warn!(
                "The tolerance (rel={}, abs={}) is larger than 1.0; did you mean that?",
                rel,
                abs
            );
        }
        Self { rel, abs }
    }
}

impl OutputComparator for FloatTolerantComparator {
    fn accepts(&self, actual: &[u8], expected: &[u8]) -> bool {
        let parse = |t: &[u8]| std::str::from_utf8(t).ok()?.trim().parse::<f64>().ok();
        match (parse(actual), parse(expected)) {
            (Some(a), Some(b)) => {
                let scale = f64::max(a.abs(), b.abs());
                (a - b).abs() <= f64::max(self.rel * scale, self.abs)
            }
            _ => actual == expected,
        }
    }
}

/// Relative/absolute tolerance for numeric tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rel: f64,
    pub abs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CompareMode {
    ExactMatch,
    CrlfInsensitiveExactMatch,
    IgnoreSpaces,
    IgnoreSpacesAndNewlines,
}

impl CompareMode {
    /// The exact-match family is the only one that gets the "a looser mode
    /// would accept this" diagnostic hint.
    pub fn is_exact_family(self) -> bool {
        matches!(
            self,
            CompareMode::ExactMatch | CompareMode::CrlfInsensitiveExactMatch
        )
    }

    /// Assemble the standard comparator stack for this mode. A tolerance
    /// swaps the token-level comparator from exact to float-tolerant.
    pub fn build(self, tolerance: Option<Tolerance>) -> Box<dyn OutputComparator> {
        let token_cmp = || -> Box<dyn OutputComparator> {
            match tolerance {
                Some(Tolerance { rel, abs }) => Box::new(FloatTolerantComparator::new(rel, abs)),
                None => Box::new(ExactComparator),
            }
        };
        match (self, tolerance) {
            (CompareMode::ExactMatch, None) => Box::new(ExactComparator),
            (CompareMode::CrlfInsensitiveExactMatch, None) => {
                Box::new(CrlfInsensitiveComparator(Box::new(ExactComparator)))
            }
            // a tolerance forces token-level comparison even for the exact family
            (CompareMode::ExactMatch | CompareMode::CrlfInsensitiveExactMatch, Some(_))
            | (CompareMode::IgnoreSpaces, _) => Box::new(SplitLinesComparator(Box::new(
                SplitComparator(token_cmp()),
            ))),
            (CompareMode::IgnoreSpacesAndNewlines, _) => Box::new(SplitComparator(token_cmp())),
        }
    }
}

/// The loosest built-in comparator; used only for the diagnostic re-check.
pub fn lenient_comparator() -> Box<dyn OutputComparator> {
    Box::new(SplitComparator(Box::new(ExactComparator)))
}

/// The decision for one case, made by an [`OutputJudge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JudgeDecision {
    pub accepted: bool,
    /// Strict comparison failed but a whitespace-insensitive one would pass.
    pub lenient_hint: bool,
}

/// Everything a judge may look at for one case.
pub struct JudgeContext<'a> {
    pub input_path: &'a Path,
    pub expected_path: Option<&'a Path>,
    pub actual: &'a [u8],
    pub expected: Option<&'a [u8]>,
}

/// Decides whether a candidate's output is acceptable. Implemented by the
/// built-in comparator stack and by the external special judge.
#[async_trait]
pub trait OutputJudge: Send + Sync {
    async fn judge(&self, ctx: &JudgeContext<'_>) -> anyhow::Result<JudgeDecision>;
}

/// Judges with an in-process comparator against the stored expected output.
pub struct BuiltinJudge {
    comparator: Box<dyn OutputComparator>,
    exact_family: bool,
}

impl BuiltinJudge {
    pub fn new(mode: CompareMode, tolerance: Option<Tolerance>) -> Self {
        Self {
            comparator: mode.build(tolerance),
            exact_family: mode.is_exact_family(),
        }
    }
}

#[async_trait]
impl OutputJudge for BuiltinJudge {
    async fn judge(&self, ctx: &JudgeContext<'_>) -> anyhow::Result<JudgeDecision> {
        let Some(expected) = ctx.expected else {
            // display-only case: nothing to compare against
            return Ok(JudgeDecision {
                accepted: true,
                lenient_hint: false,
            });
        };
        let accepted = self.comparator.accepts(ctx.actual, expected);
        let lenient_hint = !accepted
            && self.exact_family
            && lenient_comparator().accepts(ctx.actual, expected);
        Ok(JudgeDecision {
            accepted,
            lenient_hint,
        })
    }
}

/// Delegates the decision to an external judge program, invoked as
/// `command <input> <actual> <expected>`; exit code zero means accepted.
pub struct SpecialJudge {
    command: String,
    shell: PathBuf,
}

impl SpecialJudge {
    pub fn new(command: impl Into<String>, shell: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            shell: shell.into(),
        }
    }
}

fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

#[async_trait]
impl OutputJudge for SpecialJudge {
    async fn judge(&self, ctx: &JudgeContext<'_>) -> anyhow::Result<JudgeDecision> {
        let actual_file = tempfile::NamedTempFile::new()
            .context("Failed to create a file for the actual output")?;
        std::fs::write(actual_file.path(), ctx.actual)
            .context("Failed to write the actual output")?;

        // the judge contract wants three paths even when no expected file exists
        let empty_expected;
        let expected_path = match ctx.expected_path {
            Some(path) => path,
            None => {
                empty_expected = tempfile::NamedTempFile::new()
                    .context("Failed to create an empty expected-output file")?;
                empty_expected.path()
            }
        };

        let command = format!(
            "{} {} {} {}",
            self.command,
            sh_quote(&ctx.input_path.to_string_lossy()),
            sh_quote(&actual_file.path().to_string_lossy()),
            sh_quote(&expected_path.to_string_lossy()),
        );
        let res = ProcessRunner::new()
            .shell(&self.shell)
            .run(&command, None)
            .await
            .context("Failed to run the special judge")?;

        let accepted = match res.status {
            RunStatus::Exited(code) => code == 0,
            RunStatus::TimedOut => anyhow::bail!("The special judge timed out"),
            RunStatus::SpawnFailed(reason) => {
                anyhow::bail!("Failed to spawn the special judge '{}': {}", self.command, reason)
            }
        };
        let explanation = String::from_utf8_lossy(&res.stdout);
        if !explanation.trim().is_empty() {
            log::info!("Special judge says: {}", explanation.trim_end());
        }
        Ok(JudgeDecision {
            accepted,
            lenient_hint: false,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn exact() -> Box<dyn OutputComparator> {
        Box::new(ExactComparator)
    }

    #[test]
    fn exact_is_byte_identical() {
        assert!(exact().accepts(b"foo\n", b"foo\n"));
        assert!(!exact().accepts(b"foo\n", b"foo"));
        assert!(!exact().accepts(b"foo\r\n", b"foo\n"));
    }

    #[test]
    fn crlf_insensitive_normalizes_both_sides() {
        let cmp = CrlfInsensitiveComparator(exact());
        assert!(cmp.accepts(b"foo\r\n", b"foo\n"));
        assert!(cmp.accepts(b"a\r\nb\r\n", b"a\nb\n"));
        // a lone \r is not a line terminator
        assert!(!cmp.accepts(b"foo\r", b"foo"));
    }

    #[test]
    fn crlf_insensitive_is_reflexive_modulo_crlf() {
        let cmp = CrlfInsensitiveComparator(exact());
        for s in [&b"a\r\nb\r\n"[..], b"", b"x", b"x\r\n\r\n"] {
            let normalized: Vec<u8> = strip_cr(s);
            assert!(cmp.accepts(s, &normalized));
        }
    }

    #[test]
    fn split_requires_equal_token_count() {
        let cmp = SplitComparator(exact());
        assert!(cmp.accepts(b"1 2  3\n", b"1\n2\n3"));
        assert!(!cmp.accepts(b"1 2 3", b"1 2"));
        assert!(!cmp.accepts(b"1 2 3", b"1 2 4"));
    }

    #[test]
    fn split_lines_tolerates_one_trailing_newline() {
        let cmp = SplitLinesComparator(exact());
        assert!(cmp.accepts(b"foo\n", b"foo"));
        assert!(!cmp.accepts(b"foo\n\n", b"foo"));
        assert!(!cmp.accepts(b"foo\nbar\n", b"foo"));
    }

    #[test]
    fn split_lines_of_split_is_reflexive() {
        let cmp = SplitLinesComparator(Box::new(SplitComparator(exact())));
        for s in [&b""[..], b"a", b"a b\nc\n", b"  x \n y\n"] {
            assert!(cmp.accepts(s, s));
        }
    }

    #[test]
    fn float_within_tolerance() {
        let cmp = FloatTolerantComparator::new(0.001, 0.001);
        assert!(cmp.accepts(b"3.14159", b"3.14160"));
        assert!(!cmp.accepts(b"3.1", b"3.2"));
    }

    #[test]
    fn float_zero_tolerance_falls_back_to_exact() {
        let cmp = FloatTolerantComparator::new(0.0, 0.0);
        assert!(!cmp.accepts(b"3.14159", b"3.14160"));
        // both non-numeric: plain string equality
        assert!(cmp.accepts(b"hello", b"hello"));
        assert!(!cmp.accepts(b"hello", b"world"));
    }

    #[test]
    fn mode_build_scenarios() {
        // crlf output against lf expected
        let actual = &b"foo\r\n"[..];
        let expected = &b"foo\n"[..];
        assert!(!CompareMode::ExactMatch.build(None).accepts(actual, expected));
        assert!(CompareMode::CrlfInsensitiveExactMatch
            .build(None)
            .accepts(actual, expected));

        // whitespace differences
        let actual = &b"1  2\n3\n"[..];
        let expected = &b"1 2\n3\n"[..];
        assert!(CompareMode::IgnoreSpaces.build(None).accepts(actual, expected));
        assert!(!CompareMode::IgnoreSpaces
            .build(None)
            .accepts(b"1 2 3\n", b"1 2\n3\n"));
        assert!(CompareMode::IgnoreSpacesAndNewlines
            .build(None)
            .accepts(b"1 2 3\n", b"1 2\n3\n"));

        // tolerance forces token-wise comparison
        let tol = Some(Tolerance {
            rel: 0.001,
            abs: 0.001,
        });
        assert!(CompareMode::ExactMatch
            .build(tol)
            .accepts(b"3.14159\n", b"3.14160\n"));
        assert!(!CompareMode::ExactMatch
            .build(Some(Tolerance { rel: 0.0, abs: 0.0 }))
            .accepts(b"3.14159\n", b"3.14160\n"));
    }

    #[tokio::test]
    async fn builtin_judge_emits_lenient_hint_for_exact_family_only() {
        let input = Path::new("/dev/null");
        let ctx = JudgeContext {
            input_path: input,
            expected_path: None,
            actual: b"1  2\n",
            expected: Some(b"1 2\n"),
        };
        let strict = BuiltinJudge::new(CompareMode::ExactMatch, None);
        let decision = strict.judge(&ctx).await.unwrap();
        assert!(!decision.accepted);
        assert!(decision.lenient_hint);

        // the ignore-spaces family never hints, even on rejection
        let ctx = JudgeContext {
            input_path: input,
            expected_path: None,
            actual: b"1 2\n",
            expected: Some(b"1 3\n"),
        };
        let loose = BuiltinJudge::new(CompareMode::IgnoreSpaces, None);
        let decision = loose.judge(&ctx).await.unwrap();
        assert!(!decision.accepted);
        assert!(!decision.lenient_hint);
    }

    #[tokio::test]
    async fn builtin_judge_accepts_display_only_cases() {
        let ctx = JudgeContext {
            input_path: Path::new("/dev/null"),
            expected_path: None,
            actual: b"anything\n",
            expected: None,
        };
        let judge = BuiltinJudge::new(CompareMode::ExactMatch, None);
        assert!(judge.judge(&ctx).await.unwrap().accepted);
    }

    #[tokio::test]
    async fn special_judge_exit_code_decides() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.in");
        fsutil::write(&input, "7\n").unwrap();

        // accepts iff the actual output echoes the input
        let script = r#"import sys; sys.exit(0 if open(sys.argv[2]).read() == open(sys.argv[1]).read() else 1)"#;
        let command = format!("python3 -c '{}'", script);
        let judge = SpecialJudge::new(&command, ProcessRunner::DEFAULT_SHELL);

        let accepted = judge
            .judge(&JudgeContext {
                input_path: &input,
                expected_path: None,
                actual: b"7\n",
                expected: None,
            })
            .await
            .unwrap();
        assert!(accepted.accepted);

        let rejected = judge
            .judge(&JudgeContext {
                input_path: &input,
                expected_path: None,
                actual: b"8\n",
                expected: None,
            })
            .await
            .unwrap();
        assert!(!rejected.accepted);
    }
}
