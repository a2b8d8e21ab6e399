//! Tunables for the evaluation service.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interval used when `StartEvaluation` does not name one.
pub const DEFAULT_INTERVAL_MINUTES: u32 = 5;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub default_interval_minutes: u32,

    /// Capacity of the queue between job tickers and the dispatcher.
    pub dispatch_queue_capacity: usize,

    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            dispatch_queue_capacity: 64,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl ServiceConfig {
    /// Resolve a requested interval; zero or absent falls back to the default.
    pub fn interval(&self, requested_minutes: Option<u32>) -> Duration {
        let minutes = match requested_minutes {
            Some(m) if m > 0 => m,
            _ => self.default_interval_minutes.max(1),
        };
        Duration::from_secs(u64::from(minutes) * 60)
    }

    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.default_page_size.min(self.max_page_size)
        } else {
            requested.min(self.max_page_size)
        }
    }
}
