use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Preferred unit system for a user's pantry quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureType {
    #[default]
    Metric,
    Imperial,
}

impl fmt::Display for MeasureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureType::Metric => write!(f, "metric"),
            MeasureType::Imperial => write!(f, "imperial"),
        }
    }
}

impl FromStr for MeasureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metric" => Ok(MeasureType::Metric),
            "imperial" => Ok(MeasureType::Imperial),
            _ => Err(format!(
                "Invalid measure type '{}'. Valid options: metric, imperial",
                s
            )),
        }
    }
}
