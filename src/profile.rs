use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{KeelraceError, Result};
use crate::metrics::{self, SlowWord};
use crate::statistics::RoundStatistic;

/// Aggregated per-player record kept by the profile store: one row per
/// player, updated after every saved round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub coins: u32,
    pub last_unlocked_level: u32,
    pub wpm_buckets: Vec<u32>,
    pub accuracy_buckets: Vec<u32>,
    pub last_round_wpm: Vec<f64>,
    pub last_round_gross_wpm: Vec<f64>,
    pub games_played: u32,
    pub time_played_ms: i64,
    pub all_time_slow_words: Vec<SlowWord>,
    pub last_slow_words: Vec<SlowWord>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            coins: 0,
            last_unlocked_level: 1,
            wpm_buckets: vec![0; metrics::BUCKET_COUNT],
            accuracy_buckets: vec![0; metrics::BUCKET_COUNT],
            last_round_wpm: Vec::new(),
            last_round_gross_wpm: Vec::new(),
            games_played: 0,
            time_played_ms: 0,
            all_time_slow_words: Vec::new(),
            last_slow_words: Vec::new(),
        }
    }
}

/// Partial profile update with upsert semantics: only the set fields change.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub coins: Option<u32>,
    pub last_unlocked_level: Option<u32>,
    pub wpm_buckets: Option<Vec<u32>>,
    pub accuracy_buckets: Option<Vec<u32>>,
    pub last_round_wpm: Option<Vec<f64>>,
    pub last_round_gross_wpm: Option<Vec<f64>>,
    pub games_played: Option<u32>,
    pub time_played_ms: Option<i64>,
    pub all_time_slow_words: Option<Vec<SlowWord>>,
    pub last_slow_words: Option<Vec<SlowWord>>,
}

impl ProfilePatch {
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(v) = self.coins {
            profile.coins = v;
        }
        if let Some(v) = self.last_unlocked_level {
            profile.last_unlocked_level = v;
        }
        if let Some(v) = &self.wpm_buckets {
            profile.wpm_buckets = v.clone();
        }
        if let Some(v) = &self.accuracy_buckets {
            profile.accuracy_buckets = v.clone();
        }
        if let Some(v) = &self.last_round_wpm {
            profile.last_round_wpm = v.clone();
        }
        if let Some(v) = &self.last_round_gross_wpm {
            profile.last_round_gross_wpm = v.clone();
        }
        if let Some(v) = self.games_played {
            profile.games_played = v;
        }
        if let Some(v) = self.time_played_ms {
            profile.time_played_ms = v;
        }
        if let Some(v) = &self.all_time_slow_words {
            profile.all_time_slow_words = v.clone();
        }
        if let Some(v) = &self.last_slow_words {
            profile.last_slow_words = v.clone();
        }
    }
}

/// How many per-round entries the store retains before an insert: the
/// oldest rows beyond this are deleted, so the table holds at most one
/// hundred after the new row lands.
pub const ROUND_STAT_RETENTION: usize = 99;

/// Persistence collaborator. Implementations are remote services or the
/// local guest store; all calls are suspension points and must never be
/// awaited from the keystroke path.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Profile>;
    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> Result<()>;
    /// Append one round statistic, trimming the player's history to
    /// [`ROUND_STAT_RETENTION`] entries first.
    async fn append_round_stat(&self, user_id: &str, stat: &RoundStatistic) -> Result<()>;
    /// Most recent round statistics, oldest first.
    async fn get_recent_round_stats(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RoundStatistic>>;
}

/// In-process store used in tests and as a stand-in for the remote service.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, (Profile, Vec<RoundStatistic>)>>,
    // Failure injection: the next N update_profile calls error out.
    update_failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` profile updates fail, for exercising the
    /// optimistic error paths.
    pub fn fail_next_updates(&self, count: u32) {
        self.update_failures.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.update_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, user_id: &str) -> Result<Profile> {
        let records = self.records.lock().expect("store poisoned");
        Ok(records
            .get(user_id)
            .map(|(profile, _)| profile.clone())
            .unwrap_or_default())
    }

    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> Result<()> {
        if self.take_failure() {
            return Err(KeelraceError::storage("injected update failure"));
        }
        let mut records = self.records.lock().expect("store poisoned");
        let entry = records.entry(user_id.to_string()).or_default();
        patch.apply_to(&mut entry.0);
        Ok(())
    }

    async fn append_round_stat(&self, user_id: &str, stat: &RoundStatistic) -> Result<()> {
        let mut records = self.records.lock().expect("store poisoned");
        let entry = records.entry(user_id.to_string()).or_default();
        let rounds = &mut entry.1;
        let excess = rounds.len().saturating_sub(ROUND_STAT_RETENTION);
        if excess > 0 {
            rounds.drain(..excess);
        }
        rounds.push(stat.clone());
        Ok(())
    }

    async fn get_recent_round_stats(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RoundStatistic>> {
        let records = self.records.lock().expect("store poisoned");
        let rounds = records
            .get(user_id)
            .map(|(_, rounds)| rounds.clone())
            .unwrap_or_default();
        let tail_start = rounds.len().saturating_sub(limit);
        Ok(rounds[tail_start..].to_vec())
    }
}

/// Persist a finished round: append the per-round record, then fold it into
/// the profile aggregates (buckets, play counters, last-round series, slow
/// words). Each remote call is independent and best-effort; a failure is
/// logged and the rest still runs, leaving local state untouched.
pub async fn persist_round<S: ProfileStore + ?Sized>(
    store: &S,
    user_id: &str,
    stat: &RoundStatistic,
    elapsed_ms: i64,
    round_slow_words: &[SlowWord],
) {
    if let Err(err) = store.append_round_stat(user_id, stat).await {
        warn!(%err, "failed to append round stat");
    }

    // Read-modify-write on the aggregates; on a failed read we fold into a
    // fresh default rather than dropping the update.
    let mut profile = match store.get_profile(user_id).await {
        Ok(profile) => profile,
        Err(err) => {
            warn!(%err, "failed to fetch profile, using defaults");
            Profile::default()
        }
    };

    if profile.wpm_buckets.len() != metrics::BUCKET_COUNT {
        profile.wpm_buckets = vec![0; metrics::BUCKET_COUNT];
    }
    if profile.accuracy_buckets.len() != metrics::BUCKET_COUNT {
        profile.accuracy_buckets = vec![0; metrics::BUCKET_COUNT];
    }
    profile.wpm_buckets[metrics::wpm_bucket_index(stat.wpm as f64)] += 1;
    profile.accuracy_buckets[metrics::accuracy_bucket_index(stat.accuracy)] += 1;

    let all_time = metrics::merge_slow_words(profile.all_time_slow_words, round_slow_words);

    let patch = ProfilePatch {
        wpm_buckets: Some(profile.wpm_buckets),
        accuracy_buckets: Some(profile.accuracy_buckets),
        last_round_wpm: Some(stat.wpm_per_second.clone()),
        last_round_gross_wpm: Some(stat.gross_wpm_per_second.clone()),
        games_played: Some(profile.games_played + 1),
        time_played_ms: Some(profile.time_played_ms + elapsed_ms.max(0)),
        all_time_slow_words: Some(all_time),
        last_slow_words: Some(round_slow_words.to_vec()),
        ..ProfilePatch::default()
    };

    if let Err(err) = store.update_profile(user_id, patch).await {
        warn!(%err, "failed to update profile aggregates");
    }
}
