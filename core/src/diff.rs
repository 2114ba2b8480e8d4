//! Tokenized diff production.
//!
//! This module only produces [`DiffToken`] sequences. Turning tokens into a
//! colored or plain string lives in [`crate::style`], so the whole algorithm
//! is testable without a terminal. Diffs are for human display only, never
//! for judging.

use std::collections::HashMap;
use std::hash::Hash;

use crate::compare::{
    CompareMode, ExactComparator, FloatTolerantComparator, OutputComparator, SplitComparator,
    Tolerance,
};

/// Sentinel hint emitted when the two contents are equivalent.
pub const NO_DIFF: &str = "(no diff)";
/// Sentinel hint for empty content in display-only mode.
pub const EMPTY: &str = "(empty)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Actual,
    Expected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Body,
    Whitespace,
    Newline,
    Hint,
    LineNumber,
    Highlight(Side),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffToken {
    pub kind: TokenKind,
    pub text: String,
}

impl DiffToken {
    pub fn body(text: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Body,
            text: text.into(),
        }
    }

    pub fn whitespace(text: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Whitespace,
            text: text.into(),
        }
    }

    pub fn newline() -> Self {
        Self {
            kind: TokenKind::Newline,
            text: "\n".to_owned(),
        }
    }

    pub fn hint(text: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Hint,
            text: text.into(),
        }
    }

    /// `marker` is `' '` for context, `'-'` for the expected side and `'+'`
    /// for the actual side.
    pub fn line_number(n: usize, marker: char) -> Self {
        Self {
            kind: TokenKind::LineNumber,
            text: format!("{:>4}{} ", n, marker),
        }
    }

    pub fn highlight(side: Side, text: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Highlight(side),
            text: text.into(),
        }
    }
}

/// Bounds for diff output.
#[derive(Debug, Clone, Copy)]
pub struct DiffLimits {
    /// Context lines kept on both sides of each differing line.
    pub context_radius: usize,
    /// Hard cap on emitted diff rows.
    pub max_rows: usize,
}

impl Default for DiffLimits {
    fn default() -> Self {
        Self {
            context_radius: 2,
            max_rows: 40,
        }
    }
}

/// Bounds for display-only snipping.
#[derive(Debug, Clone, Copy)]
pub struct SnipLimits {
    pub max_lines: usize,
    pub max_chars: usize,
}

impl Default for SnipLimits {
    fn default() -> Self {
        Self {
            max_lines: 40,
            max_chars: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// difflib-style sequence matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpTag {
    Equal,
    Replace,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct Opcode {
    tag: OpTag,
    a1: usize,
    a2: usize,
    b1: usize,
    b2: usize,
}

fn find_longest_match<T: Eq + Hash>(
    a: &[T],
    b2j: &HashMap<&T, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0usize);
    let mut j2len: HashMap<usize, usize> = HashMap::new();
    for (i, x) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut new_j2len = HashMap::new();
        if let Some(js) = b2j.get(x) {
            for &j in js {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| j2len.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                new_j2len.insert(j, k);
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            }
        }
        j2len = new_j2len;
    }
    (best_i, best_j, best_size)
}

/// Classic longest-common-subsequence opcodes over two sequences, in the
/// manner of difflib's `SequenceMatcher.get_opcodes` (without the junk
/// heuristics).
fn diff_opcodes<T: Eq + Hash>(a: &[T], b: &[T]) -> Vec<Opcode> {
    let mut b2j: HashMap<&T, Vec<usize>> = HashMap::new();
    for (j, x) in b.iter().enumerate() {
        b2j.entry(x).or_default().push(j);
    }

    let mut queue = vec![(0usize, a.len(), 0usize, b.len())];
    let mut blocks: Vec<(usize, usize, usize)> = Vec::new();
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = find_longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k > 0 {
            blocks.push((i, j, k));
            if alo < i && blo < j {
                queue.push((alo, i, blo, j));
            }
            if i + k < ahi && j + k < bhi {
                queue.push((i + k, ahi, j + k, bhi));
            }
        }
    }
    blocks.sort_unstable();
    blocks.push((a.len(), b.len(), 0)); // terminal sentinel

    let mut opcodes = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    for &(ai, bj, size) in &blocks {
        let tag = match (i < ai, j < bj) {
            (true, true) => Some(OpTag::Replace),
            (true, false) => Some(OpTag::Delete),
            (false, true) => Some(OpTag::Insert),
            (false, false) => None,
        };
        if let Some(tag) = tag {
            opcodes.push(Opcode {
                tag,
                a1: i,
                a2: ai,
                b1: j,
                b2: bj,
            });
        }
        if size > 0 {
            opcodes.push(Opcode {
                tag: OpTag::Equal,
                a1: ai,
                a2: ai + size,
                b1: bj,
                b2: bj + size,
            });
        }
        i = ai + size;
        j = bj + size;
    }
    opcodes
}

// ---------------------------------------------------------------------------
// diff rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowKind {
    Context,
    /// A differing row shown from the expected side.
    Removed,
    /// A differing row shown from the actual side.
    Added,
}

#[derive(Debug, Clone)]
struct DiffRow {
    kind: RowKind,
    tokens: Vec<DiffToken>,
}

impl DiffRow {
    fn context(line_no: usize, text: &str) -> Self {
        Self {
            kind: RowKind::Context,
            tokens: vec![
                DiffToken::line_number(line_no, ' '),
                DiffToken::body(text),
                DiffToken::newline(),
            ],
        }
    }

    fn whole_line(kind: RowKind, line_no: usize, text: &str) -> Self {
        let (marker, side) = match kind {
            RowKind::Removed => ('-', Side::Expected),
            _ => ('+', Side::Actual),
        };
        Self {
            kind,
            tokens: vec![
                DiffToken::line_number(line_no, marker),
                DiffToken::highlight(side, text),
                DiffToken::newline(),
            ],
        }
    }
}

fn decode(bytes: &[u8], what: &str, tokens: &mut Vec<DiffToken>) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(e) => {
            tokens.push(DiffToken::hint(format!(
                "({} is not valid utf-8: {}; shown lossily)",
                what, e
            )));
            tokens.push(DiffToken::newline());
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

fn split_text_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Per-line equivalence under the active policy, used to decide which line
/// pairs deserve a fine-grained diff.
fn line_comparator(mode: CompareMode, tolerance: Option<Tolerance>) -> Box<dyn OutputComparator> {
    match (mode, tolerance) {
        (CompareMode::ExactMatch | CompareMode::CrlfInsensitiveExactMatch, None) => {
            Box::new(ExactComparator)
        }
        (_, tol) => {
            let token_cmp: Box<dyn OutputComparator> = match tol {
                Some(Tolerance { rel, abs }) => Box::new(FloatTolerantComparator::new(rel, abs)),
                None => Box::new(ExactComparator),
            };
            Box::new(SplitComparator(token_cmp))
        }
    }
}

/// Word-level rows for a differing line pair; `None` when the word counts
/// differ or no single word differs (then the char-level diff does better).
fn word_rows(line_no: usize, actual: &str, expected: &str) -> Option<[DiffRow; 2]> {
    let a_words: Vec<&str> = actual.split_whitespace().collect();
    let e_words: Vec<&str> = expected.split_whitespace().collect();
    if a_words.len() != e_words.len() || a_words == e_words {
        return None;
    }

    let mut expected_tokens = vec![DiffToken::line_number(line_no, '-')];
    let mut actual_tokens = vec![DiffToken::line_number(line_no, '+')];
    for (i, (a, e)) in a_words.iter().zip(&e_words).enumerate() {
        if i > 0 {
            expected_tokens.push(DiffToken::whitespace(" "));
            actual_tokens.push(DiffToken::whitespace(" "));
        }
        if a == e {
            expected_tokens.push(DiffToken::body(*e));
            actual_tokens.push(DiffToken::body(*a));
        } else {
            expected_tokens.push(DiffToken::highlight(Side::Expected, *e));
            actual_tokens.push(DiffToken::highlight(Side::Actual, *a));
        }
    }
    expected_tokens.push(DiffToken::newline());
    actual_tokens.push(DiffToken::newline());
    Some([
        DiffRow {
            kind: RowKind::Removed,
            tokens: expected_tokens,
        },
        DiffRow {
            kind: RowKind::Added,
            tokens: actual_tokens,
        },
    ])
}

/// Char-level LCS rows for a differing line pair.
fn char_rows(line_no: usize, actual: &str, expected: &str) -> [DiffRow; 2] {
    let a_chars: Vec<char> = actual.chars().collect();
    let e_chars: Vec<char> = expected.chars().collect();
    let opcodes = diff_opcodes(&e_chars, &a_chars);

    let substr = |chars: &[char], lo: usize, hi: usize| chars[lo..hi].iter().collect::<String>();
    let mut expected_tokens = vec![DiffToken::line_number(line_no, '-')];
    let mut actual_tokens = vec![DiffToken::line_number(line_no, '+')];
    for op in &opcodes {
        match op.tag {
            OpTag::Equal => {
                expected_tokens.push(DiffToken::body(substr(&e_chars, op.a1, op.a2)));
                actual_tokens.push(DiffToken::body(substr(&a_chars, op.b1, op.b2)));
            }
            OpTag::Replace => {
                expected_tokens
                    .push(DiffToken::highlight(Side::Expected, substr(&e_chars, op.a1, op.a2)));
                actual_tokens
                    .push(DiffToken::highlight(Side::Actual, substr(&a_chars, op.b1, op.b2)));
            }
            OpTag::Delete => expected_tokens
                .push(DiffToken::highlight(Side::Expected, substr(&e_chars, op.a1, op.a2))),
            OpTag::Insert => actual_tokens
                .push(DiffToken::highlight(Side::Actual, substr(&a_chars, op.b1, op.b2))),
        }
    }
    expected_tokens.push(DiffToken::newline());
    actual_tokens.push(DiffToken::newline());
    [
        DiffRow {
            kind: RowKind::Removed,
            tokens: expected_tokens,
        },
        DiffRow {
            kind: RowKind::Added,
            tokens: actual_tokens,
        },
    ]
}

/// Line-by-line structural diff for texts with equal line counts.
fn structural_rows(
    a_lines: &[&str],
    e_lines: &[&str],
    line_cmp: &dyn OutputComparator,
) -> Vec<DiffRow> {
    let mut rows = Vec::new();
    for (i, (a, e)) in a_lines.iter().zip(e_lines).enumerate() {
        let line_no = i + 1;
        if line_cmp.accepts(a.as_bytes(), e.as_bytes()) {
            rows.push(DiffRow::context(line_no, e));
        } else if let Some(pair) = word_rows(line_no, a, e) {
            rows.extend(pair);
        } else {
            rows.extend(char_rows(line_no, a, e));
        }
    }
    rows
}

/// Whole-file LCS diff for texts with different line counts. Removed and
/// added rows are keyed to their own side's line numbers.
fn lcs_rows(a_lines: &[&str], e_lines: &[&str]) -> Vec<DiffRow> {
    let mut rows = Vec::new();
    for op in diff_opcodes(e_lines, a_lines) {
        match op.tag {
            OpTag::Equal => {
                for (off, line) in e_lines[op.a1..op.a2].iter().enumerate() {
                    rows.push(DiffRow::context(op.a1 + off + 1, line));
                }
            }
            OpTag::Delete | OpTag::Replace | OpTag::Insert => {
                if op.tag != OpTag::Insert {
                    for (off, line) in e_lines[op.a1..op.a2].iter().enumerate() {
                        rows.push(DiffRow::whole_line(RowKind::Removed, op.a1 + off + 1, line));
                    }
                }
                if op.tag != OpTag::Delete {
                    for (off, line) in a_lines[op.b1..op.b2].iter().enumerate() {
                        rows.push(DiffRow::whole_line(RowKind::Added, op.b1 + off + 1, line));
                    }
                }
            }
        }
    }
    rows
}

/// Keep rows within `context_radius` of a differing row, collapse the rest
/// into `… (n lines) …` hints, cap the total and summarize the overflow.
fn window_rows(rows: Vec<DiffRow>, limits: &DiffLimits, tokens: &mut Vec<DiffToken>) {
    let keep: Vec<bool> = {
        let mut keep = vec![false; rows.len()];
        for (i, row) in rows.iter().enumerate() {
            if row.kind != RowKind::Context {
                let lo = i.saturating_sub(limits.context_radius);
                let hi = (i + limits.context_radius + 1).min(rows.len());
                keep[lo..hi].iter_mut().for_each(|k| *k = true);
            }
        }
        keep
    };

    let mut emitted = 0usize;
    let (mut overflow_removed, mut overflow_added) = (0usize, 0usize);
    let mut skipped_run = 0usize;
    for (row, keep) in rows.into_iter().zip(keep) {
        if !keep {
            skipped_run += 1;
            continue;
        }
        if skipped_run > 0 {
            tokens.push(DiffToken::hint(format!("... ({} lines) ...", skipped_run)));
            tokens.push(DiffToken::newline());
            skipped_run = 0;
        }
        if emitted >= limits.max_rows {
            match row.kind {
                RowKind::Removed => overflow_removed += 1,
                RowKind::Added => overflow_added += 1,
                RowKind::Context => (),
            }
            continue;
        }
        tokens.extend(row.tokens);
        emitted += 1;
    }
    if skipped_run > 0 {
        tokens.push(DiffToken::hint(format!("... ({} lines) ...", skipped_run)));
        tokens.push(DiffToken::newline());
    }
    if overflow_removed + overflow_added > 0 {
        tokens.push(DiffToken::hint(format!(
            "... also {} line(s) removed, {} line(s) added ...",
            overflow_removed, overflow_added
        )));
        tokens.push(DiffToken::newline());
    }
}

/// Produce a bounded, human-oriented diff of `actual` against `expected`.
///
/// Equivalent contents (under `mode`/`tolerance`) yield the [`NO_DIFF`]
/// sentinel. This function never fails: undecodable bytes degrade to a
/// lossy decode plus an explanatory hint.
pub fn render_diff(
    actual: &[u8],
    expected: &[u8],
    mode: CompareMode,
    tolerance: Option<Tolerance>,
    limits: &DiffLimits,
) -> Vec<DiffToken> {
    let mut tokens = Vec::new();
    let mut actual_text = decode(actual, "the actual output", &mut tokens);
    let mut expected_text = decode(expected, "the expected output", &mut tokens);
    if mode == CompareMode::CrlfInsensitiveExactMatch {
        actual_text = actual_text.replace("\r\n", "\n");
        expected_text = expected_text.replace("\r\n", "\n");
    }

    let a_lines = split_text_lines(&actual_text);
    let e_lines = split_text_lines(&expected_text);

    let rows = if a_lines.len() == e_lines.len() {
        let line_cmp = line_comparator(mode, tolerance);
        structural_rows(&a_lines, &e_lines, &*line_cmp)
    } else {
        lcs_rows(&a_lines, &e_lines)
    };

    if rows.iter().all(|r| r.kind == RowKind::Context) {
        tokens.push(DiffToken::hint(NO_DIFF));
        tokens.push(DiffToken::newline());
        return tokens;
    }
    window_rows(rows, limits, &mut tokens);
    tokens
}

// ---------------------------------------------------------------------------
// display-only snipping
// ---------------------------------------------------------------------------

fn lines_to_tokens(lines: &[&str], tokens: &mut Vec<DiffToken>) {
    for line in lines {
        tokens.push(DiffToken::body(*line));
        tokens.push(DiffToken::newline());
    }
}

fn token_len(tokens: &[DiffToken]) -> usize {
    tokens.iter().map(|t| t.text.chars().count()).sum()
}

/// Bounded display of content we are not judging (no expected output, or
/// nothing to diff against). Chooses the shortest of {no snip, head/tail by
/// line count, head/tail by char count}, so even a single multi-megabyte
/// line stays bounded.
pub fn render_content(content: &[u8], limits: &SnipLimits) -> Vec<DiffToken> {
    let mut tokens = Vec::new();
    if content.is_empty() {
        tokens.push(DiffToken::hint(EMPTY));
        tokens.push(DiffToken::newline());
        return tokens;
    }
    let text = decode(content, "the output", &mut tokens);
    let lines = split_text_lines(&text);

    let whole = {
        let mut t = Vec::new();
        lines_to_tokens(&lines, &mut t);
        t
    };

    let by_lines = (lines.len() > limits.max_lines).then(|| {
        let head = limits.max_lines / 2;
        let tail = limits.max_lines - head;
        let mut t = Vec::new();
        lines_to_tokens(&lines[..head], &mut t);
        t.push(DiffToken::hint(format!(
            "... ({} lines) ...",
            lines.len() - head - tail
        )));
        t.push(DiffToken::newline());
        lines_to_tokens(&lines[lines.len() - tail..], &mut t);
        t
    });

    let by_chars = (text.chars().count() > limits.max_chars).then(|| {
        let head = limits.max_chars / 2;
        let tail = limits.max_chars - head;
        let total = text.chars().count();
        let head_str: String = text.chars().take(head).collect();
        let tail_str: String = text
            .chars()
            .skip(total - tail)
            .collect();
        let mut t = Vec::new();
        lines_to_tokens(&split_text_lines(&head_str), &mut t);
        t.push(DiffToken::hint(format!("... ({} chars) ...", total - head - tail)));
        t.push(DiffToken::newline());
        lines_to_tokens(&split_text_lines(&tail_str), &mut t);
        t
    });

    let shortest = [by_lines, by_chars]
        .into_iter()
        .flatten()
        .fold(whole, |best, candidate| {
            if token_len(&candidate) < token_len(&best) {
                candidate
            } else {
                best
            }
        });
    tokens.extend(shortest);
    tokens
}
