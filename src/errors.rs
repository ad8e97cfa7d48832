use thiserror::Error;

use crate::domain::entities::product::{ProductId, StoreId};

/// Request categories known to the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Init,
    Purchase,
    Restore,
    Identify,
    Attribution,
    Properties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// The user backed out of the billing flow.
    Canceled,
    /// The purchase was made but is awaiting payment (e.g. cash payments).
    Pending,
    /// The store reported a purchase in an unknown state.
    Unspecified,
    ServiceUnavailable,
    ItemUnavailable,
    Other,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntitlementError {
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Backend returned server error {status}: {message}")]
    BackendServerError { status: u16, message: String },

    #[error("Backend rejected the request with {status}: {message}")]
    BackendClientError { status: u16, message: String },

    #[error("Store error ({code:?}): {message}")]
    StoreError {
        code: StoreErrorCode,
        message: String,
    },

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Purchase of store product {0} is already in progress.")]
    AlreadyInProgress(StoreId),

    #[error("Rate limit exceeded for {0:?} request.")]
    RateLimitExceeded(RequestType),

    #[error("Failed to parse backend response: {0}")]
    ResponseParsingFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EntitlementError {
    /// Network failures (no HTTP response) and 5xx responses. Everything else
    /// would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EntitlementError::NetworkUnreachable(_) | EntitlementError::BackendServerError { .. }
        )
    }

    /// Errors after which entitlements may be computed locally. Currently the
    /// same set as the retryable ones.
    pub fn is_fallback_eligible(&self) -> bool {
        self.is_retryable()
    }

    pub(crate) fn store(code: StoreErrorCode, message: &str) -> Self {
        EntitlementError::StoreError {
            code,
            message: message.to_string(),
        }
    }

    pub(crate) fn storage_with_debug(message: &str, debug: &impl std::fmt::Debug) -> Self {
        EntitlementError::Storage(format!("{message}: {debug:?}"))
    }

    pub(crate) fn parsing_with_debug(message: &str, debug: &impl std::fmt::Debug) -> Self {
        EntitlementError::ResponseParsingFailed(format!("{message}: {debug:?}"))
    }

    /// Maps an HTTP status outside the 2xx range onto the taxonomy.
    pub fn from_status(status: u16, message: String) -> Self {
        if status >= 500 {
            EntitlementError::BackendServerError { status, message }
        } else {
            EntitlementError::BackendClientError { status, message }
        }
    }
}
