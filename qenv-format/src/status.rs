//! Request status enumeration

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Status reported by the query service in the `status` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Request completed and every row was produced
    Success,
    /// Request is still executing
    Running,
    /// Request finished with errors
    Errors,
    /// Request completed (deferred or asynchronous flows)
    Completed,
    /// Request was stopped before completion
    Stopped,
    /// Request exceeded its time budget
    Timeout,
    /// Request failed irrecoverably
    Fatal,
}

impl Status {
    /// All variants in declaration order
    pub const ALL: [Status; 7] = [
        Status::Success,
        Status::Running,
        Status::Errors,
        Status::Completed,
        Status::Stopped,
        Status::Timeout,
        Status::Fatal,
    ];

    /// Wire spelling of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Running => "running",
            Status::Errors => "errors",
            Status::Completed => "completed",
            Status::Stopped => "stopped",
            Status::Timeout => "timeout",
            Status::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a status string matches no known variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for Status {
    type Err = UnknownStatus;

    /// Case-insensitive match against the wire spellings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
