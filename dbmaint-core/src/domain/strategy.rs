use serde::{Deserialize, Serialize};

use super::result::{Error, Result};

/// Maintenance strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Run the engine's in-place compaction primitive
    CompactInPlace,
    /// Dump the logical content, restore into a fresh file, rename over
    Rebuild,
}

/// Accepted strategy tokens. Matching is case-sensitive.
pub const STRATEGY_ALIASES: &[(&str, Strategy)] = &[
    ("", Strategy::CompactInPlace),
    ("dump", Strategy::Rebuild),
    ("Dump", Strategy::Rebuild),
    ("DUMP", Strategy::Rebuild),
];

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::CompactInPlace, Strategy::Rebuild];

    /// Parse the second positional argument. A missing argument means
    /// compact-in-place.
    pub fn from_arg(arg: Option<&str>) -> Result<Self> {
        let token = arg.unwrap_or("");
        STRATEGY_ALIASES
            .iter()
            .find(|(alias, _)| *alias == token)
            .map(|(_, strategy)| *strategy)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "unknown strategy '{}' (expected nothing or one of: dump, Dump, DUMP)",
                    token
                ))
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CompactInPlace => "compact",
            Strategy::Rebuild => "rebuild",
        }
    }
}
