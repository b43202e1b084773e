use std::fmt;
use std::str::FromStr;

/// Recognised plot settings. Each has an intrinsic default; plots only
/// store values that differ from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlotFlag {
    Entry,
    Build,
    Pvp,
    Pve,
    Damage,
}

impl PlotFlag {
    pub const ALL: [PlotFlag; 5] = [Self::Entry, Self::Build, Self::Pvp, Self::Pve, Self::Damage];

    pub const fn key(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Build => "build",
            Self::Pvp => "pvp",
            Self::Pve => "pve",
            Self::Damage => "damage",
        }
    }

    pub const fn default_value(self) -> bool {
        !matches!(self, Self::Build)
    }
}

impl fmt::Display for PlotFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plot flag {0:?}")]
pub struct ParseFlagError(String);

impl FromStr for PlotFlag {
    type Err = ParseFlagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        PlotFlag::ALL
            .into_iter()
            .find(|f| f.key().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseFlagError(s.to_string()))
    }
}

/// Lenient boolean parsing for flag values typed by players.
pub fn parse_flag_value(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "allow" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "deny" | "0" => Some(false),
        _ => None,
    }
}

/// Words that mean "go back to the default" when setting a flag.
pub fn is_reset_keyword(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "default" | "reset" | "unset" | "remove" | "clear"
    )
}

pub const fn format_flag_value(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
