use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn anonymous() -> Self {
        UserId(format!("anon_{}", Uuid::new_v4().simple()))
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Per-session state shared by every component of the engine. One instance
/// per user session; nothing in the crate is global.
pub struct SessionContext {
    config: EngineConfig,
    install_date: DateTime<Utc>,
    uid: RwLock<UserId>,
    app_state: RwLock<AppState>,
    clock: Arc<dyn Clock>,
}

impl SessionContext {
    pub fn new(
        config: EngineConfig,
        uid: UserId,
        install_date: DateTime<Utc>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            install_date,
            uid: RwLock::new(uid),
            app_state: RwLock::new(AppState::Foreground),
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn install_date(&self) -> DateTime<Utc> {
        self.install_date
    }

    pub fn uid(&self) -> UserId {
        self.uid.read().clone()
    }

    pub(crate) fn set_uid(&self, uid: UserId) {
        *self.uid.write() = uid;
    }

    pub fn app_state(&self) -> AppState {
        *self.app_state.read()
    }

    pub(crate) fn set_app_state(&self, state: AppState) {
        *self.app_state.write() = state;
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_analytics_mode(&self) -> bool {
        self.config.analytics_mode
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("uid", &self.uid())
            .field("app_state", &self.app_state())
            .field("install_date", &self.install_date)
            .finish()
    }
}
