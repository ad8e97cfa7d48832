use std::collections::HashMap;

use parking_lot::RwLock;

use crate::errors::EntitlementError;

/// Durable key-value storage provided by the host application.
pub trait KeyValueDatasource: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EntitlementError>;

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), EntitlementError>;

    fn remove(&self, key: &str) -> Result<(), EntitlementError>;
}

/// Process-lifetime storage, for hosts without persistence and for tests.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueDatasource {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryKeyValueDatasource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueDatasource for InMemoryKeyValueDatasource {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EntitlementError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), EntitlementError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), EntitlementError> {
        self.values.write().remove(key);
        Ok(())
    }
}
