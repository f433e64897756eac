// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Persistent storage for refresh tokens.

use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The key used when the application does not configure one.
pub const DEFAULT_REFRESH_TOKEN_KEY: &str = concat!(env!("CARGO_PKG_NAME"), ".refresh_token");

/// A key-value store for values that must outlive the process.
///
/// Keys are namespaced by the caller, see [StorageKey]. Readers must treat
/// values as snapshots: the owner of a key may replace it at any time.
#[async_trait::async_trait]
pub trait Storage: std::fmt::Debug + Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value`, or removes the key if `value` is `None`.
    async fn set(&self, key: &str, value: Option<String>) -> Result<()>;
}

/// A namespaced storage key.
///
/// # Example
/// ```
/// # use identity_kit::storage::StorageKey;
/// let key = StorageKey::new("com.example.app").with_name("refresh_token");
/// assert_eq!(key.as_str(), "com.example.app.refresh_token");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new<S: Into<String>>(namespace: S) -> Self {
        Self(namespace.into())
    }

    pub fn with_name(self, name: &str) -> Self {
        Self(format!("{}.{name}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StorageKey {
    fn default() -> Self {
        Self(DEFAULT_REFRESH_TOKEN_KEY.to_string())
    }
}

impl From<&str> for StorageKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StorageKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An in-memory [Storage], useful for tests and short-lived processes.
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // The map is always left in a consistent state, so a poisoned lock is
        // still usable.
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self.values().keys().cloned().collect::<Vec<_>>();
        f.debug_struct("MemoryStorage").field("keys", &keys).finish()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Option<String>) -> Result<()> {
        let mut values = self.values();
        match value {
            Some(v) => values.insert(key.to_string(), v),
            None => values.remove(key),
        };
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    mockall::mock! {
        #[derive(Debug)]
        pub Storage { }

        #[async_trait::async_trait]
        impl Storage for Storage {
            async fn get(&self, key: &str) -> Result<Option<String>>;
            async fn set(&self, key: &str, value: Option<String>) -> Result<()>;
        }
    }

    #[tokio::test]
    async fn memory_storage() -> anyhow::Result<()> {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("a").await?, None);

        storage.set("a", Some("v1".into())).await?;
        assert_eq!(storage.get("a").await?.as_deref(), Some("v1"));

        // Clones share state.
        let clone = storage.clone();
        clone.set("a", Some("v2".into())).await?;
        assert_eq!(storage.get("a").await?.as_deref(), Some("v2"));

        storage.set("a", None).await?;
        assert_eq!(clone.get("a").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn debug_hides_values() -> anyhow::Result<()> {
        let storage = MemoryStorage::new();
        storage.set("key-test-only", Some("secret-test-only".into())).await?;
        let fmt = format!("{storage:?}");
        assert!(fmt.contains("key-test-only"), "{fmt}");
        assert!(!fmt.contains("secret-test-only"), "{fmt}");
        Ok(())
    }

    #[test]
    fn keys() {
        assert_eq!(StorageKey::default().as_str(), "identity-kit.refresh_token");
        assert_eq!(StorageKey::from("custom").as_str(), "custom");
        assert_eq!(
            StorageKey::new("ns").with_name("refresh_token").as_str(),
            "ns.refresh_token"
        );
    }
}
