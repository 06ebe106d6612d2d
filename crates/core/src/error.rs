//! Error types for Meridian
//!
//! This module defines the unified error type used across the gateway,
//! shard runtime, cache layer, routing store, event queue, and split
//! orchestrator. We use `thiserror` for automatic `Display`/`Error` impls.
//!
//! ## Error taxonomy
//!
//! `MeridianError` is the single error type returned by every public
//! operation in this workspace. Call sites branch on behavior via the
//! classification methods (`is_retryable`, `is_client_fault`,
//! `is_serious`) rather than matching every variant by name.
//!
//! ### Usage
//!
//! ```ignore
//! match result {
//!     Err(e) if e.is_retryable() => { /* retry with backoff */ }
//!     Err(e) if e.is_client_fault() => { /* surface to caller as-is */ }
//!     Err(e) => { /* log and surface */ }
//!     Ok(value) => { /* success */ }
//! }
//! ```

use thiserror::Error;

/// Result type alias for Meridian operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all Meridian APIs.
#[derive(Debug, Error)]
pub enum Error {
    /// SQL rejected by the transpiler or the shard's parser.
    #[error("invalid SQL: {0}")]
    InvalidSql(String),

    /// Auth context missing or invalid.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Query touches rows outside the caller's tenant.
    #[error("tenant mismatch: query for tenant {requested} touches rows owned by {owner}")]
    TenantMismatch {
        /// Tenant the caller authenticated as.
        requested: String,
        /// Tenant that actually owns the touched rows.
        owner: String,
    },

    /// Store integrity error (e.g. a UNIQUE or FOREIGN KEY violation).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Shard size probe exceeded `max_bytes` before a write was applied.
    #[error("shard {shard_id} capacity exceeded: {size_bytes} bytes >= {max_bytes} byte limit")]
    ShardCapacityExceeded {
        /// Shard that rejected the write.
        shard_id: String,
        /// Probed size at rejection time.
        size_bytes: u64,
        /// Configured capacity limit.
        max_bytes: u64,
    },

    /// The embedded store signaled overload (busy/locked/timeout).
    #[error("shard {shard_id} store busy: {message}")]
    TransientStoreBusy {
        /// Shard whose store reported overload.
        shard_id: String,
        /// Underlying store message.
        message: String,
    },

    /// Gateway request quota exhausted.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested backoff before retrying.
        retry_after_ms: u64,
    },

    /// A cached entry failed to decode.
    #[error("cache decode error for key {key}: {message}")]
    CacheDecodeError {
        /// The offending cache key (never the payload).
        key: String,
        /// Decode failure message.
        message: String,
    },

    /// An event handler failed while processing a queue message.
    #[error("queue handler error for message {msg_id}: {message}")]
    QueueHandlerError {
        /// Message that failed processing.
        msg_id: String,
        /// Handler failure message.
        message: String,
    },

    /// An operator action was attempted while the split plan was in an
    /// illegal phase for that action.
    #[error("split precondition failed: {0}")]
    SplitPreconditionFailed(String),

    /// A backfill or tail-replay apply failed against the target shard.
    #[error("split data error: {0}")]
    SplitDataError(String),

    /// A routing policy failed validation at publish time.
    #[error("invalid routing config: {0}")]
    ConfigInvalid(String),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying I/O error (file operations, store file access, etc).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The requesting operation exceeded its deadline.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
}

impl Error {
    /// Shard capacity constructor.
    pub fn shard_capacity_exceeded(
        shard_id: impl Into<String>,
        size_bytes: u64,
        max_bytes: u64,
    ) -> Self {
        Error::ShardCapacityExceeded {
            shard_id: shard_id.into(),
            size_bytes,
            max_bytes,
        }
    }

    /// Transient store busy constructor.
    pub fn transient_store_busy(shard_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::TransientStoreBusy {
            shard_id: shard_id.into(),
            message: message.into(),
        }
    }

    /// Tenant mismatch constructor.
    pub fn tenant_mismatch(requested: impl Into<String>, owner: impl Into<String>) -> Self {
        Error::TenantMismatch {
            requested: requested.into(),
            owner: owner.into(),
        }
    }

    /// Cache decode error constructor.
    pub fn cache_decode_error(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::CacheDecodeError {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Queue handler error constructor.
    pub fn queue_handler_error(msg_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::QueueHandlerError {
            msg_id: msg_id.into(),
            message: message.into(),
        }
    }

    /// Whether this error is safe to retry with backoff.
    ///
    /// Only transient, external-overload conditions are retryable. A
    /// caller must not retry client-fault or data-integrity errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientStoreBusy { .. } | Error::RateLimited { .. }
        )
    }

    /// Whether this error is the caller's fault (bad SQL, auth, tenant
    /// scoping, or an invalid config submission) rather than a system
    /// condition.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Error::InvalidSql(_)
                | Error::Unauthorized(_)
                | Error::TenantMismatch { .. }
                | Error::ConfigInvalid(_)
        )
    }

    /// Whether this error indicates a serious, non-routine condition
    /// worth escalated logging (constraint violations, split data
    /// corruption).
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            Error::ConstraintViolation(_) | Error::SplitDataError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let busy = Error::transient_store_busy("shard_0", "database is locked");
        assert!(busy.is_retryable());
        assert!(!busy.is_client_fault());

        let rate = Error::RateLimited { retry_after_ms: 100 };
        assert!(rate.is_retryable());
    }

    #[test]
    fn client_fault_classification() {
        let e = Error::tenant_mismatch("t1", "t2");
        assert!(e.is_client_fault());
        assert!(!e.is_retryable());
    }

    #[test]
    fn serious_classification() {
        let e = Error::SplitDataError("backfill page 3 failed".into());
        assert!(e.is_serious());
        assert!(!e.is_retryable());
        assert!(!e.is_client_fault());
    }

    #[test]
    fn capacity_error_display() {
        let e = Error::shard_capacity_exceeded("shard_0", 1_048_576, 1_048_576);
        let msg = e.to_string();
        assert!(msg.contains("shard_0"));
        assert!(msg.contains("capacity exceeded"));
    }
}
