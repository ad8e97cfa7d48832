use std::path::Path;

use crate::{domain::entities::launch_result::FallbackSnapshot, errors::EntitlementError};

/// Reads the products/permissions snapshot bundled with the application.
pub(crate) fn read_fallback_snapshot(path: &Path) -> Result<FallbackSnapshot, EntitlementError> {
    let contents = std::fs::read(path).map_err(|e| {
        EntitlementError::Configuration(format!(
            "fallback file {} could not be read: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_slice(&contents).map_err(|e| {
        EntitlementError::Configuration(format!(
            "fallback file {} could not be parsed: {}",
            path.display(),
            e
        ))
    })
}
