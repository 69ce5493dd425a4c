//! External service façade.
//!
//! Validates request payloads, marshals values to JSON bytes and
//! delegates to the [Coordinator]. The core below this layer only ever
//! sees opaque bytes.

use std::sync::Arc;

use crate::proto::GetResult;
use crate::replication::{Coordinator, ReadPreference};
use crate::{KvError, Result};

/// Status string returned for an accepted write.
pub const SET_SUCCESS: &str = "Set key successfully";

/// The key/value service exposed to external clients.
pub struct KvService {
    coordinator: Arc<Coordinator>,
}

impl KvService {
    /// Build the façade over a coordinator.
    pub fn new(coordinator: Arc<Coordinator>) -> KvService {
        KvService { coordinator }
    }

    /// Store `value` under `key`.
    ///
    /// Keys must be non-negative; values must be non-null and marshal to
    /// a non-empty JSON document. Returns [SET_SUCCESS] on acceptance.
    pub fn set(&self, key: i64, value: &serde_json::Value) -> Result<String> {
        let key = validate_key(key)?;
        if value.is_null() {
            return Err(KvError::InvalidArgument("value is nil".to_string()));
        }

        let bytes = serde_json::to_vec(value)?;
        if bytes.is_empty() {
            return Err(KvError::InvalidArgument("value is empty".to_string()));
        }

        self.coordinator.set(key, &bytes)?;
        Ok(SET_SUCCESS.to_string())
    }

    /// Fetch the value under `key`, preferring the leader's copy.
    pub fn get(&self, key: i64) -> Result<GetResult> {
        let key = validate_key(key)?;
        self.coordinator.get(key, ReadPreference::FromLeader)
    }
}

fn validate_key(key: i64) -> Result<u64> {
    u64::try_from(key)
        .map_err(|_| KvError::InvalidArgument(format!("key={}, key should be positive", key)))
}
