//! Pure domain rules for spot-image generation jobs.
//!
//! Constants, identifier validation, and key derivation shared by the
//! job store, the dispatcher, and both execution paths. Lives in `core`
//! to maintain the zero internal dependency constraint.

use sha2::{Digest, Sha256};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default retry ceiling for a spot-image job.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// A lease older than this is presumed abandoned and becomes claimable
/// by another holder. Must safely exceed the true maximum processing
/// time of one image (prompt + generation + upload).
pub const DEFAULT_STALE_AFTER_SECS: i64 = 600;

/// How long the polling worker sleeps between empty poll cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default number of jobs a polling worker leases and executes at once.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Maximum length of a plan identifier.
const MAX_PLAN_ID_LEN: usize = 128;

/// Maximum length of a spot name.
const MAX_SPOT_NAME_LEN: usize = 256;

/// Prefix for task names submitted to the push queue.
const TASK_NAME_PREFIX: &str = "spot-image";

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a travel-plan identifier.
///
/// Rules:
/// - Must not be empty or whitespace-only.
/// - Must not exceed `MAX_PLAN_ID_LEN` characters.
pub fn validate_plan_id(plan_id: &str) -> Result<(), CoreError> {
    if plan_id.trim().is_empty() {
        return Err(CoreError::Validation(
            "Plan id must not be empty".to_string(),
        ));
    }
    if plan_id.len() > MAX_PLAN_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Plan id must not exceed {MAX_PLAN_ID_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate a point-of-interest name.
///
/// Rules:
/// - Must not be empty or whitespace-only.
/// - Must not exceed `MAX_SPOT_NAME_LEN` characters.
pub fn validate_spot_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation(
            "Spot name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_SPOT_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Spot name must not exceed {MAX_SPOT_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate a retry ceiling.
pub fn validate_max_attempts(max_attempts: i32) -> Result<(), CoreError> {
    if max_attempts < 1 {
        return Err(CoreError::Validation(
            "max_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Input de-duplication
// ---------------------------------------------------------------------------

/// Drop duplicate spot names, preserving first-seen order.
pub fn dedupe_spot_names(names: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::with_capacity(names.len());
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Keys and identity
// ---------------------------------------------------------------------------

/// Deterministic idempotency key for the initial dispatch of one job.
///
/// Two dispatches of the same (plan, spot) pair collapse to one task at
/// the queue. The push handler uses [`fresh_idempotency_key`] instead
/// when it re-dispatches a job, so the new task is not deduplicated
/// against the exhausted one.
pub fn job_idempotency_key(plan_id: &str, spot_name: &str) -> String {
    format!("{plan_id}/{spot_name}")
}

/// Random idempotency key for a re-dispatch.
pub fn fresh_idempotency_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Derive the queue-visible task name from an idempotency key.
///
/// The key itself may contain characters the queue rejects in task
/// names, so it is hashed and hex-encoded. The first 32 hex characters
/// are enough to make collisions implausible.
pub fn derive_task_name(idempotency_key: &str) -> String {
    let digest = Sha256::digest(idempotency_key.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{TASK_NAME_PREFIX}-{}", &hex[..32])
}

/// Label for leases taken by this process.
///
/// Observability only: it tells an operator which holder last touched a
/// row, and carries no correctness weight.
pub fn worker_identity() -> String {
    format!("spotgen-{}", uuid::Uuid::new_v4())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
