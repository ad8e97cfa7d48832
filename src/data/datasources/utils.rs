use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::errors::EntitlementError;

use super::key_value_datasource::KeyValueDatasource;

/// Reads and decodes a JSON value. Undecodable entries (e.g. written by an
/// older schema) are treated as absent.
pub(crate) fn load_json<T: DeserializeOwned>(
    storage: &dyn KeyValueDatasource,
    key: &str,
) -> Result<Option<T>, EntitlementError> {
    let Some(bytes) = storage.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("Discarding undecodable cache entry '{}': {}", key, e);
            Ok(None)
        }
    }
}

pub(crate) fn store_json<T: Serialize + ?Sized>(
    storage: &dyn KeyValueDatasource,
    key: &str,
    value: &T,
) -> Result<(), EntitlementError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| EntitlementError::storage_with_debug("failed to encode cache entry", &e))?;
    storage.set(key, bytes)
}
