//! Shared types for Meridian: the error taxonomy, scalar value model,
//! identifiers, timestamps, and size limits every other crate builds on.

pub mod error;
pub mod ids;
pub mod limits;
pub mod time;
pub mod value;

pub use error::{Error, Result};
pub use ids::{PlanId, RequestId, SessionId, ShardId, TenantId, TransactionId};
pub use limits::Limits;
pub use time::Timestamp;
pub use value::Value;
