use serde::{Deserialize, Serialize};

/// Token that selects the alternate (totals) database
pub const ALTERNATE_TOKEN: &str = "totals";

/// Which database file a run operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// The raw database, used when no variant token is given
    Primary,
    /// The totals database
    Alternate,
}

impl Variant {
    /// Resolve the variant from the first positional argument.
    ///
    /// Only the exact alternate token switches variants; anything else,
    /// including an empty or missing argument, keeps the primary one.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            Some(ALTERNATE_TOKEN) => Variant::Alternate,
            _ => Variant::Primary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Primary => "primary",
            Variant::Alternate => "alternate",
        }
    }
}
