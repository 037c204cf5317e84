//! Fake of the lock port: process-local named leases.

use arena_core::{LockError, LockLease, LockPort, LockResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
pub struct FakeLock {
    held: Mutex<HashMap<String, String>>,
}

impl FakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// simulate another process holding the key
    pub fn hold(&self, key: &str) {
        self.held
            .lock()
            .unwrap()
            .insert(key.to_string(), "foreign".to_string());
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl LockPort for FakeLock {
    async fn acquire(&self, key: &str, _ttl: Duration) -> LockResult<LockLease> {
        let mut held = self.held.lock().unwrap();
        if held.contains_key(key) {
            return Err(LockError::Held(key.to_string()));
        }
        let token = Uuid::new_v4().to_string();
        held.insert(key.to_string(), token.clone());
        Ok(LockLease {
            key: key.to_string(),
            token,
        })
    }

    async fn release(&self, lease: LockLease) -> LockResult<()> {
        let mut held = self.held.lock().unwrap();
        if held.get(&lease.key) == Some(&lease.token) {
            held.remove(&lease.key);
        }
        Ok(())
    }
}
