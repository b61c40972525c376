//! Header attributes carried by a response envelope

use crate::status::Status;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One entry of the `warnings` or `errors` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Service-specific diagnostic code
    pub code: i64,
    /// Human-readable description (`msg` on the wire)
    #[serde(default, alias = "msg")]
    pub message: String,
}

impl Diagnostic {
    /// Create a diagnostic entry
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Execution metrics reported in the `metrics` object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Total elapsed time as reported by the service (e.g. `"1.2ms"`)
    pub elapsed_time: String,
    /// Execution time as reported by the service
    pub execution_time: String,
    /// Number of rows in `results`
    pub result_count: u64,
    /// Size of `results` in bytes
    pub result_size: u64,
    /// Number of entries in `errors`
    pub error_count: u64,
    /// Number of entries in `warnings`
    pub warning_count: u64,
    /// Documents mutated by the statement
    pub mutation_count: u64,
    /// Rows sorted by the statement
    pub sort_count: u64,
}

/// Every envelope field outside of the row array.
///
/// All fields start empty and are filled in as the envelope is read; a field
/// that fails to parse keeps its previous value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderAttributes {
    /// Request identifier; nil until a valid `requestID` is read
    pub request_id: Uuid,
    /// Client context identifier echoed by the service
    pub client_context_id: Option<String>,
    /// Opaque schema descriptor
    pub signature: Option<Value>,
    /// Opaque execution profile
    pub profile: Option<Value>,
    /// Parsed request status
    pub status: Option<Status>,
    /// Set together with `status`: true iff the status is `Success`
    pub success: bool,
    /// Warnings in envelope order
    pub warnings: Vec<Diagnostic>,
    /// Errors in envelope order
    pub errors: Vec<Diagnostic>,
    /// Execution metrics
    pub metrics: Metrics,
}

impl HeaderAttributes {
    /// Record a parsed status and the derived success flag.
    pub fn set_status(&mut self, status: Status) {
        self.status = Some(status);
        self.success = status == Status::Success;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diagnostic_accepts_wire_and_long_names() {
        let wire: Diagnostic = serde_json::from_value(json!({"code": 1, "msg": "bad"})).unwrap();
        let long: Diagnostic =
            serde_json::from_value(json!({"code": 1, "message": "bad"})).unwrap();
        assert_eq!(wire, long);
        assert_eq!(wire, Diagnostic::new(1, "bad"));
    }

    #[test]
    fn test_diagnostic_requires_code() {
        assert!(serde_json::from_value::<Diagnostic>(json!({"msg": "bad"})).is_err());
        assert!(serde_json::from_value::<Diagnostic>(json!("bad")).is_err());
    }

    #[test]
    fn test_set_status_derives_success() {
        let mut header = HeaderAttributes::default();
        assert!(!header.success);
        assert!(header.request_id.is_nil());

        header.set_status(Status::Success);
        assert!(header.success);

        header.set_status(Status::Errors);
        assert!(!header.success);
        assert_eq!(header.status, Some(Status::Errors));
    }
}
