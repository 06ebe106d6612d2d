//! # Meridian
//!
//! Edge-deployed, MySQL-compatible distributed database core: a
//! sharded SQL runtime, tenant cache coherence, versioned routing,
//! live resharding, and a durable event pipeline.
//!
//! This crate is a thin facade over the workspace's component crates;
//! each is independently usable, but most callers will want the
//! pieces re-exported here.
//!
//! # Architecture
//!
//! | Component | Crate | Role |
//! |---|---|---|
//! | Core types | [`meridian_core`] | Ids, errors, `Value`, `Timestamp`, `Limits` |
//! | Shard storage | [`meridian_storage`] | Embedded SQLite connection, PITR backup |
//! | Routing | [`meridian_routing`] | Versioned tenant -> shard policy |
//! | Cache | [`meridian_cache`] | Tenant-scoped cache with bounded/cached/strong reads |
//! | Queue | [`meridian_queue`] | Durable change-event dispatch, DLQ, retry |
//! | Shard runtime | [`meridian_shard`] | Single-writer SQL execution, transactions, PITR |
//! | Split | [`meridian_split`] | Live resharding: backfill, tail replay, cutover |
//! | Gateway | [`meridian_gateway`] | Per-request pipeline tying the above together |
//!
//! A binary or test harness typically constructs a [`meridian_routing::RoutingStore`],
//! one [`meridian_shard::ShardRuntime`] per shard, a [`meridian_cache::Cache`],
//! and wires them into a [`meridian_gateway::Gateway`].

pub use meridian_cache as cache;
pub use meridian_core as core;
pub use meridian_gateway as gateway;
pub use meridian_queue as queue;
pub use meridian_routing as routing;
pub use meridian_shard as shard;
pub use meridian_split as split;
pub use meridian_storage as storage;

pub use meridian_core::{Error, Result};
pub use meridian_gateway::{Gateway, GatewayRequest, GatewayResponse};
