//! Envelope field names

/// Request identifier (UUID string).
pub const FIELD_REQUEST_ID: &str = "requestID";
/// Client-supplied context identifier.
pub const FIELD_CLIENT_CONTEXT_ID: &str = "clientContextID";
/// Final or current request status.
pub const FIELD_STATUS: &str = "status";
/// Opaque schema descriptor.
pub const FIELD_SIGNATURE: &str = "signature";
/// Opaque execution profile.
pub const FIELD_PROFILE: &str = "profile";
/// Metrics object.
pub const FIELD_METRICS: &str = "metrics";
/// Warning diagnostics array.
pub const FIELD_WARNINGS: &str = "warnings";
/// Error diagnostics array.
pub const FIELD_ERRORS: &str = "errors";
/// Row array.
pub const FIELD_RESULTS: &str = "results";

/// `metrics.elapsedTime`
pub const METRIC_ELAPSED_TIME: &str = "elapsedTime";
/// `metrics.executionTime`
pub const METRIC_EXECUTION_TIME: &str = "executionTime";
/// `metrics.resultCount`
pub const METRIC_RESULT_COUNT: &str = "resultCount";
/// `metrics.resultSize`
pub const METRIC_RESULT_SIZE: &str = "resultSize";
/// `metrics.errorCount`
pub const METRIC_ERROR_COUNT: &str = "errorCount";
/// `metrics.warningCount`
pub const METRIC_WARNING_COUNT: &str = "warningCount";
/// `metrics.mutationCount`
pub const METRIC_MUTATION_COUNT: &str = "mutationCount";
/// `metrics.sortCount`
pub const METRIC_SORT_COUNT: &str = "sortCount";

/// Depth of a top-level envelope field.
pub const HEADER_DEPTH: usize = 1;
/// Depth of an element inside a top-level array (rows, warnings, errors).
pub const ELEMENT_DEPTH: usize = 2;

/// Highest transport status code still treated as "no HTTP error returned".
pub const MAX_NON_ERROR_STATUS_CODE: u16 = 399;
