use colored::{Color, ColoredString, Colorize};
use crossterm::terminal;

use crate::diff::{DiffToken, Side, TokenKind};
use crate::testing::result::JudgeStatus;

pub fn is_truecolor_supported() -> bool {
    let Ok(v) = std::env::var("COLORTERM") else {
        return false
    };
    matches!(v.as_str(), "truecolor" | "24bit")
}

pub trait ColorTheme {
    fn color(&self) -> Color;
}

impl ColorTheme for JudgeStatus {
    fn color(&self) -> Color {
        use JudgeStatus::*;
        if !self::is_truecolor_supported() {
            return match self {
                AC => Color::Green,
                WA => Color::Yellow,
                TLE => Color::Red,
                RE => Color::Magenta,
                MLE => Color::Blue,
            };
        }

        match self {
            AC => Color::TrueColor {
                r: 30,
                g: 180,
                b: 40,
            },
            WA => Color::TrueColor {
                r: 210,
                g: 138,
                b: 4,
            },
            TLE => Color::TrueColor {
                r: 220,
                g: 42,
                b: 42,
            },
            RE => Color::TrueColor {
                r: 171,
                g: 40,
                b: 200,
            },
            MLE => Color::TrueColor {
                r: 52,
                g: 114,
                b: 230,
            },
        }
    }
}

pub fn judge_icon(status: JudgeStatus) -> ColoredString {
    let fg = if is_truecolor_supported() {
        Color::TrueColor {
            r: 255,
            g: 255,
            b: 255,
        }
    } else {
        Color::BrightBlack
    };
    format!(" {} ", status)
        .on_color(status.color())
        .bold()
        .color(fg)
}

pub fn terminal_cols() -> usize {
    let (cols, _) = terminal::size().unwrap_or((40, 40));
    cols as usize
}

/// Pure token-sequence renderer. Independent of how the tokens were
/// produced, so diff output is testable without a terminal.
pub fn render_tokens(tokens: &[DiffToken], use_color: bool) -> String {
    let mut out = String::new();
    for token in tokens {
        if !use_color {
            out.push_str(&token.text);
            continue;
        }
        let styled = match &token.kind {
            TokenKind::Body | TokenKind::Whitespace | TokenKind::Newline => {
                out.push_str(&token.text);
                continue;
            }
            TokenKind::Hint => token.text.cyan().italic(),
            TokenKind::LineNumber => token.text.bright_black(),
            TokenKind::Highlight(Side::Actual) => token.text.black().on_red(),
            TokenKind::Highlight(Side::Expected) => token.text.black().on_green(),
        };
        out.push_str(&styled.to_string());
    }
    out
}
