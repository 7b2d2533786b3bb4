use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Severity of a shipped record.
///
/// Variants are declared in rank order so the derived `Ord` matches the
/// numeric ranks in [`SEVERITY_TABLE`]. This is distinct from the tracing
/// level used for the shipper's own diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Success,
    Warning,
    Error,
    Failure,
    Critical,
}

/// Name <-> rank table, fixed at compile time.
pub const SEVERITY_TABLE: [(Severity, &str, u8); 7] = [
    (Severity::Debug, "DEBUG", 10),
    (Severity::Info, "INFO", 20),
    (Severity::Success, "SUCCESS", 25),
    (Severity::Warning, "WARNING", 30),
    (Severity::Error, "ERROR", 40),
    (Severity::Failure, "FAILURE", 45),
    (Severity::Critical, "CRITICAL", 50),
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid severity level: {0}")]
pub struct InvalidSeverity(pub String);

impl Severity {
    pub const ALL: [Severity; 7] = [
        Severity::Debug,
        Severity::Info,
        Severity::Success,
        Severity::Warning,
        Severity::Error,
        Severity::Failure,
        Severity::Critical,
    ];

    fn entry(self) -> &'static (Severity, &'static str, u8) {
        // ALL and SEVERITY_TABLE share ordering, so the discriminant indexes both.
        &SEVERITY_TABLE[self as usize]
    }

    /// Wire name, e.g. `"WARNING"`.
    pub fn name(self) -> &'static str {
        self.entry().1
    }

    pub fn rank(self) -> u8 {
        self.entry().2
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        SEVERITY_TABLE
            .iter()
            .find(|(_, _, r)| *r == rank)
            .map(|(level, _, _)| *level)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        if upper == "WARN" {
            return Some(Severity::Warning);
        }
        SEVERITY_TABLE
            .iter()
            .find(|(_, n, _)| *n == upper)
            .map(|(level, _, _)| *level)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts a level name (case-insensitive) or a numeric rank.
impl FromStr for Severity {
    type Err = InvalidSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(level) = Severity::from_name(s) {
            return Ok(level);
        }
        s.trim()
            .parse::<u8>()
            .ok()
            .and_then(Severity::from_rank)
            .ok_or_else(|| InvalidSeverity(s.to_string()))
    }
}

impl TryFrom<u8> for Severity {
    type Error = InvalidSeverity;

    fn try_from(rank: u8) -> Result<Self, InvalidSeverity> {
        Severity::from_rank(rank).ok_or_else(|| InvalidSeverity(rank.to_string()))
    }
}
