//! ANSI terminal colors for status messages.

use std::fmt::{Display, Formatter};

/// Terminal text color or style.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    Default,
    Bold,
    Underline,
    Reset,
}

impl Color {
    /// Return the ANSI escape sequence which selects this color.
    pub fn code(self) -> &'static str {
        match self {
            Self::Black => "\x1b[30m",
            Self::Red => "\x1b[31m",
            Self::Green => "\x1b[32m",
            Self::Yellow => "\x1b[33m",
            Self::Blue => "\x1b[34m",
            Self::Magenta => "\x1b[35m",
            Self::Cyan => "\x1b[36m",
            Self::White => "\x1b[37m",
            Self::Default => "\x1b[39m",
            Self::Bold => "\x1b[1m",
            Self::Underline => "\x1b[4m",
            Self::Reset => "\x1b[0m",
        }
    }

    /// Return `text` wrapped in this color and a reset.
    pub fn paint(self, text: &str) -> String {
        format!("{}{}{}", self.code(), text, Color::Reset.code())
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Format a message with a green `INFO:` prefix.
pub fn info_message(message: &str) -> String {
    format!("{} {}", Color::Green.paint("INFO:"), message)
}

/// Format a message with a red `ERROR:` prefix.
pub fn error_message(message: &str) -> String {
    format!("{} {}", Color::Red.paint("ERROR:"), message)
}

#[cfg(test)]
mod tests {
    use super::{Color, error_message, info_message};

    #[test]
    fn test_messages() {
        assert_eq!(info_message("Finish!"), "\x1b[32mINFO:\x1b[0m Finish!");
        assert_eq!(
            error_message("bad input"),
            "\x1b[31mERROR:\x1b[0m bad input"
        );
        assert_eq!(format!("{}x{}", Color::Bold, Color::Reset), "\x1b[1mx\x1b[0m");
    }
}
