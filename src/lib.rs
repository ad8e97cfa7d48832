pub(crate) mod data {
    pub(crate) mod caches {
        pub(crate) mod deduplication_cache;
        pub(crate) mod entitlement_cache;
        pub(crate) mod pending_purchases_cache;
    }
    pub(crate) mod datasources {
        pub mod backend_api_datasource;
        pub(crate) mod fallback_file_datasource;
        pub mod key_value_datasource;
        pub mod store_datasource;
        pub(crate) mod utils;
    }
    pub(crate) mod models {
        pub(crate) mod backend_api {
            pub(crate) mod common;
            pub(crate) mod launch_result_model;
            pub(crate) mod request_models;
        }
    }
    pub(crate) mod network {
        pub(crate) mod backoff_calculator;
        pub mod rate_limiter;
        pub(crate) mod retry_coordinator;
    }
    pub(crate) mod repositories {
        pub mod entitlements_repository_impl;
        pub(crate) mod local_fallback_granter;
    }
}

pub mod domain {
    pub mod entities {
        pub mod entitlement;
        pub mod launch_result;
        pub mod product;
        pub mod purchase;
        pub mod session_context;
    }
    pub mod repositories {
        pub mod entitlements_repository;
    }
}

pub mod config;
pub mod errors;
pub mod util;

pub use data::{
    datasources::{
        backend_api_datasource::{BackendApiDatasource, BackendApiDatasourceImpl},
        key_value_datasource::{InMemoryKeyValueDatasource, KeyValueDatasource},
        store_datasource::StoreDatasource,
    },
    network::rate_limiter::{RateLimiter, SlidingWindowRateLimiter},
    repositories::entitlements_repository_impl::EntitlementsRepositoryImpl,
};
