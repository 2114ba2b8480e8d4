use std::path::Path;

pub type Result<T> = std::result::Result<T, CaseFormatError>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CaseFormatError {
    #[error("Unknown placeholder '%{0}' at {}", .1 + 1)]
    UnknownPlaceholder(char, usize),

    #[error("Dangling '%' at the end of format")]
    DanglingPercent,

    #[error("Missing placeholder '%{0}' (format needs both %s and %e)")]
    MissingPlaceholder(char),

    #[error("Placeholder '%{0}' appears more than once")]
    DuplicatePlaceholder(char),
}

/// File extension of a test case file. The naming convention only knows
/// these two kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum CaseExt {
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "out")]
    Out,
}

impl CaseExt {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseExt::In => "in",
            CaseExt::Out => "out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Name,
    Ext,
}

/// Percent-escaped micro-template for test case file names.
///
/// `%s` is the case name, `%e` is the extension (`in` or `out`), `%%` is a
/// literal percent. Both placeholders must appear exactly once, e.g. the
/// default `"%s.%e"` matches `sample-1.in` / `sample-1.out`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseFormat {
    segments: Vec<Segment>,
}

impl CaseFormat {
    pub const DEFAULT: &str = "%s.%e";

    pub fn parse(fmt: &str) -> Result<Self> {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum State {
            Normal,
            Percent,
        }
        use State::*;

        let mut state = Normal;
        let mut segments = Vec::new();
        let mut literal = String::new();

        for (i, c) in fmt.chars().enumerate() {
            match (c, state) {
                ('%', Normal) => {
                    state = Percent;
                }
                ('%', Percent) => {
                    state = Normal;
                    literal.push('%');
                }
                ('s', Percent) => {
                    state = Normal;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Name);
                }
                ('e', Percent) => {
                    state = Normal;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Ext);
                }
                (c, Percent) => return Err(CaseFormatError::UnknownPlaceholder(c, i)),
                (c, Normal) => literal.push(c),
            }
        }
        if state == Percent {
            return Err(CaseFormatError::DanglingPercent);
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        for placeholder in ['s', 'e'] {
            let seg = match placeholder {
                's' => Segment::Name,
                _ => Segment::Ext,
            };
            match segments.iter().filter(|&s| *s == seg).count() {
                0 => return Err(CaseFormatError::MissingPlaceholder(placeholder)),
                1 => (),
                _ => return Err(CaseFormatError::DuplicatePlaceholder(placeholder)),
            }
        }
        Ok(Self { segments })
    }

    /// Substitute both placeholders, yielding a concrete file name.
    pub fn fill(&self, name: &str, ext: CaseExt) -> String {
        let mut res = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => res.push_str(s),
                Segment::Name => res.push_str(name),
                Segment::Ext => res.push_str(ext.as_str()),
            }
        }
        res
    }

    /// Match a file name back to `(name, ext)`. Returns `None` when the file
    /// does not follow the convention. The name never matches empty.
    pub fn match_file_name(&self, file_name: &str) -> Option<(String, CaseExt)> {
        use strum::IntoEnumIterator as _;
        CaseExt::iter().find_map(|ext| {
            self.match_with_ext(file_name, ext)
                .map(|name| (name, ext))
        })
    }

    pub fn match_path(&self, path: &Path) -> Option<(String, CaseExt)> {
        let file_name = path.file_name()?.to_str()?;
        self.match_file_name(file_name)
    }

    fn match_with_ext(&self, file_name: &str, ext: CaseExt) -> Option<String> {
        // With %e fixed, the pattern is literal prefix + %s + literal suffix.
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut before_name = true;
        for seg in &self.segments {
            let out = if before_name { &mut prefix } else { &mut suffix };
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Ext => out.push_str(ext.as_str()),
                Segment::Name => before_name = false,
            }
        }

        let rest = file_name.strip_prefix(&prefix)?;
        let name = rest.strip_suffix(&suffix)?;
        (!name.is_empty()).then(|| name.to_owned())
    }
}
