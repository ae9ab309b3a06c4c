//! A minimal async key-value store abstraction.
//!
//! The broker persists a handful of small, independent facts this way:
//! whether a dynamically added provider is enabled (`mcp:server:enabled:
//! {name}`), PKCE login state, and cached group policy. None of it needs a
//! real database; any backend that can get/set/delete a string by key
//! works.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> crate::error::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> crate::error::Result<()>;
    async fn delete(&self, key: &str) -> crate::error::Result<()>;
}

/// Fallback store used when no external backend is configured. State does
/// not survive a restart.
#[derive(Default)]
pub struct InMemoryKvStore {
    data: Mutex<HashMap<String, String>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> crate::error::Result<Option<String>> {
        Ok(self.data.lock().expect("kv store mutex poisoned").get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> crate::error::Result<()> {
        self.data
            .lock()
            .expect("kv store mutex poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> crate::error::Result<()> {
        self.data.lock().expect("kv store mutex poisoned").remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = InMemoryKvStore::new();
        store.set("mcp:server:enabled:widget", "true").await.unwrap();
        assert_eq!(
            store.get("mcp:server:enabled:widget").await.unwrap(),
            Some("true".to_string())
        );
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = InMemoryKvStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = InMemoryKvStore::new();
        store.set("k", "v").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
