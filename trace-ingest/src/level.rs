use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity filter of a provider registration, and the declared level of an
/// event. Higher values are more verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    LogAlways = 0,
    Critical = 1,
    Error = 2,
    Warning = 3,
    Informational = 4,
    Verbose = 5,
}

impl TraceLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TraceLevel::LogAlways => "logalways",
            TraceLevel::Critical => "critical",
            TraceLevel::Error => "error",
            TraceLevel::Warning => "warning",
            TraceLevel::Informational => "informational",
            TraceLevel::Verbose => "verbose",
        }
    }
}

/// Levels above 5 are vendor-defined and treated as verbose.
impl From<u8> for TraceLevel {
    fn from(value: u8) -> Self {
        match value {
            0 => TraceLevel::LogAlways,
            1 => TraceLevel::Critical,
            2 => TraceLevel::Error,
            3 => TraceLevel::Warning,
            4 => TraceLevel::Informational,
            _ => TraceLevel::Verbose,
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseTraceLevelError(pub String);

impl fmt::Display for ParseTraceLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown trace level: {}", self.0)
    }
}

impl std::error::Error for ParseTraceLevelError {}

impl FromStr for TraceLevel {
    type Err = ParseTraceLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "0" | "logalways" => Ok(TraceLevel::LogAlways),
            "1" | "critical" => Ok(TraceLevel::Critical),
            "2" | "error" => Ok(TraceLevel::Error),
            "3" | "warning" => Ok(TraceLevel::Warning),
            "4" | "informational" | "info" => Ok(TraceLevel::Informational),
            "5" | "verbose" => Ok(TraceLevel::Verbose),
            _ => Err(ParseTraceLevelError(s.to_owned())),
        }
    }
}
