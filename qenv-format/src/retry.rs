//! Retry classification

use crate::constants::MAX_NON_ERROR_STATUS_CODE;
use crate::status::Status;

/// Decide whether a finished request is worth retrying.
///
/// Only `Timeout` and `Fatal` qualify, and only when the transport did not
/// return an explicit HTTP error code (`transport_status_code <= 399`, with 0
/// meaning no response code at all). Scheduling, attempt counting and
/// idempotency checks belong to the caller.
pub fn should_retry(status: Status, transport_status_code: u16) -> bool {
    match status {
        Status::Timeout | Status::Fatal => transport_status_code <= MAX_NON_ERROR_STATUS_CODE,
        Status::Success
        | Status::Running
        | Status::Errors
        | Status::Completed
        | Status::Stopped => false,
    }
}
