//! Gateway core (spec component E): the per-request pipeline binding
//! routing, cache, shard runtime, event queue, and the split
//! orchestrator's resolver overlay behind one entry point, plus the
//! session/transaction manager and consistency-hint parser it uses.

pub mod gateway;
pub mod hints;
pub mod session;

pub use gateway::{Gateway, GatewayRequest, GatewayResponse, ResponseMeta, TablePolicy};
pub use hints::{parse_inline, resolve_consistency, Hints};
pub use session::{new_session_id, Session, SessionId, SessionManager, SessionState};
