//! Durable backing for split plans, the same pluggable-storage shape
//! the routing store uses so tests and production share one interface.

use parking_lot::RwLock;
use std::collections::HashMap;

pub trait PlanStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn put(&self, key: &str, value: Vec<u8>);
}

#[derive(Default)]
pub struct InMemoryPlanStorage {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl PlanStorage for InMemoryPlanStorage {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: Vec<u8>) {
        self.inner.write().insert(key.to_string(), value);
    }
}
