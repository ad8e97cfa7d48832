use std::{
    collections::{hash_map::DefaultHasher, HashMap, VecDeque},
    hash::{Hash, Hasher},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::errors::RequestType;

/// Throttles repeated identical requests. Identity is the request type plus a
/// hash of its arguments.
pub trait RateLimiter: Send + Sync {
    fn is_exceeded(&self, request_type: RequestType, argument_hash: u64) -> bool;

    fn record_attempt(&self, request_type: RequestType, argument_hash: u64);
}

/// Allows at most `max_requests` identical requests within any `window`.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    max_requests: usize,
    window: Duration,
    attempts: Mutex<HashMap<(RequestType, u64), VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

impl SlidingWindowRateLimiter {
    /// Drops attempts older than the window. Returns whether any remain.
    fn prune(&self, history: &mut VecDeque<Instant>, now: Instant) -> bool {
        while history
            .front()
            .is_some_and(|at| now.duration_since(*at) >= self.window)
        {
            history.pop_front();
        }
        !history.is_empty()
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn is_exceeded(&self, request_type: RequestType, argument_hash: u64) -> bool {
        let mut attempts = self.attempts.lock();
        let key = (request_type, argument_hash);
        let Some(history) = attempts.get_mut(&key) else {
            return false;
        };
        if !self.prune(history, Instant::now()) {
            attempts.remove(&key);
            return false;
        }
        history.len() >= self.max_requests
    }

    fn record_attempt(&self, request_type: RequestType, argument_hash: u64) {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        attempts.retain(|_, history| self.prune(history, now));
        attempts
            .entry((request_type, argument_hash))
            .or_default()
            .push_back(now);
    }
}

/// Hash identifying a request's arguments for rate limiting.
pub(crate) fn argument_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
