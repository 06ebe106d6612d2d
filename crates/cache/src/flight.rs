//! Single-flight fill deduplication: at most one concurrent fill per
//! `(tenant, key)`. Other readers either block on the in-flight fill's
//! result (this module) or the caller chooses to return a stale value
//! immediately and kick off an async refresh (the `cached` consistency
//! mode in `meridian-gateway`, which doesn't call into this module at
//! all).
//!
//! Modeled as a registry of waiters per key, broadcasting to every
//! waiter once the fetch completes — the same shape as edge-cache
//! single-flight registries, adapted from async tasks to OS threads via
//! `parking_lot::Condvar`.

use meridian_core::TenantId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

type FillResult = Result<Vec<u8>, String>;

struct Flight {
    result: Mutex<Option<FillResult>>,
    ready: Condvar,
}

/// Registry of in-flight fills, keyed by `(tenant, key)`.
#[derive(Default)]
pub struct FlightRegistry {
    inner: Mutex<HashMap<(TenantId, String), Arc<Flight>>>,
}

impl FlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fill` if no fill for `(tenant, key)` is in flight, or
    /// await the in-flight fill's result otherwise. The underlying
    /// fill is never cancelled by a waiter dropping out; it always
    /// runs to completion once started.
    pub fn run(
        &self,
        tenant: &TenantId,
        key: &str,
        fill: impl FnOnce() -> FillResult,
    ) -> FillResult {
        let map_key = (tenant.clone(), key.to_string());

        let (flight, is_leader) = {
            let mut map = self.inner.lock();
            if let Some(existing) = map.get(&map_key) {
                (existing.clone(), false)
            } else {
                let flight = Arc::new(Flight {
                    result: Mutex::new(None),
                    ready: Condvar::new(),
                });
                map.insert(map_key.clone(), flight.clone());
                (flight, true)
            }
        };

        if is_leader {
            let result = fill();
            *flight.result.lock() = Some(result.clone());
            flight.ready.notify_all();
            self.inner.lock().remove(&map_key);
            result
        } else {
            let mut guard = flight.result.lock();
            while guard.is_none() {
                flight.ready.wait(&mut guard);
            }
            guard.clone().expect("result set before notify")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn concurrent_fills_for_same_key_run_once() {
        let registry = Arc::new(FlightRegistry::new());
        let fill_count = Arc::new(AtomicUsize::new(0));
        let tenant = TenantId::from("t1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let fill_count = fill_count.clone();
                let tenant = tenant.clone();
                thread::spawn(move || {
                    registry.run(&tenant, "key", || {
                        fill_count.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                        Ok(b"value".to_vec())
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap().unwrap(), b"value".to_vec());
        }
        assert_eq!(fill_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_keys_do_not_share_a_flight() {
        let registry = FlightRegistry::new();
        let tenant = TenantId::from("t1");
        let a = registry.run(&tenant, "a", || Ok(b"a".to_vec()));
        let b = registry.run(&tenant, "b", || Ok(b"b".to_vec()));
        assert_eq!(a.unwrap(), b"a".to_vec());
        assert_eq!(b.unwrap(), b"b".to_vec());
    }
}
