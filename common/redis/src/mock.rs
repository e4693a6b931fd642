use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Client, CustomRedisError};

/// In-process stand-in for redis.
///
/// Explicitly configured return values (`get_ret`, `set_ret`) win. When a key
/// has no configured return value, writes land in a shared in-memory map that later
/// reads see, so a set-then-get sequence behaves like the real backend.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    get_ret: HashMap<String, Result<String, CustomRedisError>>,
    set_ret: HashMap<String, Result<(), CustomRedisError>>,
    unavailable: Option<CustomRedisError>,
    data: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockRedisValue {
    None,
    StringWithTTL(String, u64),
}

#[derive(Debug, Clone)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_ret(&mut self, key: &str, ret: Result<String, CustomRedisError>) -> Self {
        self.get_ret.insert(key.to_owned(), ret);
        self.clone()
    }

    pub fn set_ret(&mut self, key: &str, ret: Result<(), CustomRedisError>) -> Self {
        self.set_ret.insert(key.to_owned(), ret);
        self.clone()
    }

    /// Every command fails with `err`, simulating a backend outage.
    pub fn unavailable(&mut self, err: CustomRedisError) -> Self {
        self.unavailable = Some(err);
        self.clone()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    /// Raw view of what has been written so far.
    pub fn stored(&self, key: &str) -> Option<String> {
        lock(&self.data).get(key).cloned()
    }

    fn record(&self, op: &str, key: &str, value: MockRedisValue) {
        lock(&self.calls).push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });
    }

    fn write(&self, key: String, value: String) -> Result<(), CustomRedisError> {
        if let Some(err) = &self.unavailable {
            return Err(err.clone());
        }
        if let Some(result) = self.set_ret.get(&key) {
            return result.clone();
        }
        lock(&self.data).insert(key, value);
        Ok(())
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, key: String) -> Result<String, CustomRedisError> {
        self.record("get", &key, MockRedisValue::None);

        if let Some(err) = &self.unavailable {
            return Err(err.clone());
        }
        if let Some(result) = self.get_ret.get(&key) {
            return result.clone();
        }
        lock(&self.data)
            .get(&key)
            .cloned()
            .ok_or(CustomRedisError::NotFound)
    }

    async fn setex(
        &self,
        key: String,
        value: String,
        seconds: u64,
    ) -> Result<(), CustomRedisError> {
        self.record(
            "setex",
            &key,
            MockRedisValue::StringWithTTL(value.clone(), seconds),
        );
        self.write(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let client = MockRedisClient::new();
        client
            .setex("key".to_string(), "value".to_string(), 60)
            .await
            .unwrap();
        assert_eq!(client.get("key".to_string()).await.unwrap(), "value");

        let calls = client.get_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].value,
            MockRedisValue::StringWithTTL("value".to_string(), 60)
        );
    }

    #[tokio::test]
    async fn test_configured_get_wins_over_stored_data() {
        let client = MockRedisClient::new().get_ret("key", Err(CustomRedisError::Timeout));
        client
            .setex("key".to_string(), "value".to_string(), 60)
            .await
            .unwrap();
        assert!(matches!(
            client.get("key".to_string()).await,
            Err(CustomRedisError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_configured_write_failure_stores_nothing() {
        let client = MockRedisClient::new().set_ret("key", Err(CustomRedisError::Timeout));
        assert!(client
            .setex("key".to_string(), "value".to_string(), 60)
            .await
            .is_err());
        assert!(client.stored("key").is_none());
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_command() {
        let client = MockRedisClient::new().unavailable(CustomRedisError::from_redis_kind(
            crate::RedisErrorKind::IoError,
            "connection refused",
        ));
        assert!(client
            .setex("k".to_string(), "v".to_string(), 60)
            .await
            .is_err());
        assert!(client.get("k".to_string()).await.is_err());
        assert!(client.stored("k").is_none());
    }
}
