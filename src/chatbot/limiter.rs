//! Per-user cooldown and per-guild daily quota checks.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::chatbot::quota::GuildCounterStore;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The user's previous admitted message is too recent.
    UserTooFast,
    /// The guild has used up its daily quota.
    GuildQuotaExceeded,
}

/// Rate limiter owning the cooldown table and the quota store.
///
/// The cooldown table lives in memory for the process lifetime and is never
/// evicted. The guild counters are persisted through [`GuildCounterStore`].
pub struct RateLimiter {
    min_interval: Duration,
    daily_max: u32,
    last_sent: HashMap<u64, Instant>,
    store: GuildCounterStore,
}

impl RateLimiter {
    pub fn new<P: AsRef<Path>>(min_interval: Duration, daily_max: u32, data_dir: P) -> Self {
        Self {
            min_interval,
            daily_max,
            last_sent: HashMap::new(),
            store: GuildCounterStore::new(data_dir),
        }
    }

    /// Decide whether a message may proceed to completion.
    ///
    /// The user check runs first so a throttled user never consumes guild
    /// quota. On admission the user's timestamp is recorded and the guild
    /// counter is incremented and persisted.
    pub fn admit(&mut self, user_id: u64, guild_id: u64) -> Admission {
        self.admit_on(user_id, guild_id, &GuildCounterStore::today())
    }

    pub(crate) fn admit_on(&mut self, user_id: u64, guild_id: u64, date: &str) -> Admission {
        if !self.user_check(user_id) {
            return Admission::UserTooFast;
        }

        let count = self.store.count(guild_id, date);
        let remaining = self.daily_max.saturating_sub(count);
        info!("Remaining requests for guild {guild_id}: {}-{count}={remaining}", self.daily_max);

        if count >= self.daily_max {
            return Admission::GuildQuotaExceeded;
        }

        // Persisted synchronously as part of admission. If the write fails
        // the increment is lost but the message still goes through.
        if let Err(e) = self.store.increment(guild_id, date) {
            warn!("Failed to persist guild counter for {guild_id}: {e}");
        }

        Admission::Allowed
    }

    /// True if the user may send now; records the send time when they may.
    /// A never-seen user is always admitted.
    fn user_check(&mut self, user_id: u64) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_sent.get(&user_id)
            && now.duration_since(*last) < self.min_interval
        {
            return false;
        }
        self.last_sent.insert(user_id, now);
        true
    }
}
