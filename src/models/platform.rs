use serde::{Deserialize, Serialize};
use std::fmt;

/// Target mobile platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    Android,
    Ios,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Android => write!(f, "ANDROID"),
            Self::Ios => write!(f, "IOS"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ANDROID" => Ok(Self::Android),
            "IOS" => Ok(Self::Ios),
            _ => Err(format!("Invalid platform: {s}")),
        }
    }
}
