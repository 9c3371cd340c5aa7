use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use narcissus_core::error::{NarcissusError, Result};

/// Shared state for one workflow run.
///
/// Keys are strings; values are JSON. Every operation takes the same async
/// lock, so a read-modify-write done through [`merge_into`](Self::merge_into)
/// or [`update`](Self::update) cannot interleave with another writer.
/// Cloning is cheap and yields a handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct Context {
    data: Arc<Mutex<HashMap<String, Value>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Context from initial data.
    pub fn from_map(data: HashMap<String, Value>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// Get a value by key.
    pub async fn get(&self, key: &str) -> Result<Value> {
        self.data
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| NarcissusError::MissingKey(key.to_string()))
    }

    /// Get a value and deserialize it.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.get(key).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Get a value as a string, if it's a string.
    pub async fn get_str(&self, key: &str) -> Result<String> {
        match self.get(key).await? {
            Value::String(s) => Ok(s),
            _ => Err(NarcissusError::TypeMismatch {
                key: key.to_string(),
                expected: "a string",
            }),
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.data.lock().await.contains_key(key)
    }

    /// Set a value, replacing whatever was stored.
    pub async fn set(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.data.lock().await.insert(key.into(), value);
        Ok(())
    }

    /// Insert every entry of `partial` into the mapping stored under `key`.
    ///
    /// Creates the mapping when the key is absent. Entries already present
    /// with the same name are overwritten; all others are kept.
    pub async fn merge_into(&self, key: &str, partial: Map<String, Value>) -> Result<()> {
        let mut data = self.data.lock().await;
        let slot = data
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(existing) = slot else {
            return Err(NarcissusError::TypeMismatch {
                key: key.to_string(),
                expected: "a mapping",
            });
        };
        existing.extend(partial);
        Ok(())
    }

    /// Run `f` over the whole store inside one critical section.
    pub async fn update<R>(&self, f: impl FnOnce(&mut HashMap<String, Value>) -> R) -> R {
        let mut data = self.data.lock().await;
        f(&mut data)
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.data.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_basic_operations() {
        let ctx = Context::new();
        ctx.set("name", "Alice").await.unwrap();
        ctx.set("count", 42).await.unwrap();

        assert_eq!(ctx.get_str("name").await.unwrap(), "Alice");
        assert_eq!(ctx.get_as::<u64>("count").await.unwrap(), 42);
        assert!(ctx.contains("count").await);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let ctx = Context::new();
        match ctx.get("plan").await {
            Err(NarcissusError::MissingKey(key)) => assert_eq!(key, "plan"),
            other => panic!("expected MissingKey, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_str_type_mismatch() {
        let ctx = Context::new();
        ctx.set("count", 1).await.unwrap();
        assert!(matches!(
            ctx.get_str("count").await,
            Err(NarcissusError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_merge_into_creates_and_extends() {
        let ctx = Context::new();
        let mut first = Map::new();
        first.insert("a".into(), json!(1));
        ctx.merge_into("research", first).await.unwrap();

        let mut second = Map::new();
        second.insert("b".into(), json!(2));
        ctx.merge_into("research", second).await.unwrap();

        assert_eq!(ctx.get("research").await.unwrap(), json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn test_merge_into_non_mapping() {
        let ctx = Context::new();
        ctx.set("research", "oops").await.unwrap();
        let err = ctx.merge_into("research", Map::new()).await.unwrap_err();
        assert!(matches!(err, NarcissusError::TypeMismatch { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges_keep_every_entry() {
        let ctx = Context::new();
        ctx.set("research", json!({})).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..64 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let mut partial = Map::new();
                partial.insert(format!("query-{}", i), json!([i]));
                ctx.merge_into("research", partial).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let research = ctx.get("research").await.unwrap();
        assert_eq!(research.as_object().unwrap().len(), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_is_atomic() {
        let ctx = Context::new();
        ctx.set("counter", 0).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                ctx.update(|data| {
                    let n = data["counter"].as_u64().unwrap();
                    data.insert("counter".into(), json!(n + 1));
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ctx.get_as::<u64>("counter").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_from_map_and_snapshot() {
        let mut map = HashMap::new();
        map.insert("topic".into(), json!("AI"));
        let ctx = Context::from_map(map);
        ctx.set("text", "").await.unwrap();

        let snap = ctx.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["topic"], json!("AI"));
    }
}
