use std::str::FromStr;

/// Display color for a program's `[name]` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogColor {
    #[default]
    Plain,
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl LogColor {
    fn ansi_code(self) -> Option<u8> {
        match self {
            LogColor::Plain => None,
            LogColor::Black => Some(30),
            LogColor::Red => Some(31),
            LogColor::Green => Some(32),
            LogColor::Yellow => Some(33),
            LogColor::Blue => Some(34),
            LogColor::Magenta => Some(35),
            LogColor::Cyan => Some(36),
            LogColor::White => Some(37),
        }
    }

    pub fn paint(self, text: &str) -> String {
        match self.ansi_code() {
            Some(code) => format!("\x1b[{}m{}\x1b[0m", code, text),
            None => text.to_string(),
        }
    }

    /// `[name] ` prefix, name colored when a color is set.
    pub fn tag(self, name: &str) -> String {
        format!("[{}] ", self.paint(name))
    }
}

impl FromStr for LogColor {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(match raw.trim().to_lowercase().as_str() {
            "black" => LogColor::Black,
            "red" => LogColor::Red,
            "green" => LogColor::Green,
            "yellow" => LogColor::Yellow,
            "blue" => LogColor::Blue,
            "magenta" => LogColor::Magenta,
            "cyan" => LogColor::Cyan,
            "white" => LogColor::White,
            _ => LogColor::Plain,
        })
    }
}

impl From<Option<&str>> for LogColor {
    fn from(value: Option<&str>) -> Self {
        value
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }
}
