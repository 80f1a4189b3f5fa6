use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::channel::{PlayerId, RaceEvent, RealtimeChannel};
use crate::error::{KeelraceError, Result};
use crate::timer::Periodic;

/// Liveness probe entry on the shared game record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEntry {
    pub user_id: PlayerId,
    pub timestamp: DateTime<Utc>,
}

/// The shared per-game record. The finish-time map and the heartbeat list
/// are the only state written by multiple independent clients; both are
/// updated with merge semantics so concurrent writers cannot clobber each
/// other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceRecord {
    pub game_id: String,
    pub players: Vec<PlayerId>,
    pub start_time: Option<DateTime<Utc>>,
    pub finishing_times: HashMap<PlayerId, DateTime<Utc>>,
    pub heartbeat: Vec<HeartbeatEntry>,
}

/// Store holding the shared game records, plus a change-notification
/// subscription per record.
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn get_game(&self, game_id: &str) -> Result<RaceRecord>;
    /// Merge the given finish times into the stored map. Existing entries
    /// for other players survive; an entry for the same player is
    /// overwritten by the caller's value.
    async fn merge_finishing_times(
        &self,
        game_id: &str,
        times: HashMap<PlayerId, DateTime<Utc>>,
    ) -> Result<()>;
    /// Refresh this player's heartbeat timestamp on the record.
    async fn touch_heartbeat(&self, game_id: &str, player_id: &str) -> Result<()>;
    /// Change notifications for one record: a snapshot after every update.
    fn watch_game(&self, game_id: &str) -> BoxStream<'static, RaceRecord>;
}

#[async_trait]
impl<S: GameStore + ?Sized> GameStore for std::sync::Arc<S> {
    async fn get_game(&self, game_id: &str) -> Result<RaceRecord> {
        self.as_ref().get_game(game_id).await
    }

    async fn merge_finishing_times(
        &self,
        game_id: &str,
        times: HashMap<PlayerId, DateTime<Utc>>,
    ) -> Result<()> {
        self.as_ref().merge_finishing_times(game_id, times).await
    }

    async fn touch_heartbeat(&self, game_id: &str, player_id: &str) -> Result<()> {
        self.as_ref().touch_heartbeat(game_id, player_id).await
    }

    fn watch_game(&self, game_id: &str) -> BoxStream<'static, RaceRecord> {
        self.as_ref().watch_game(game_id)
    }
}

/// In-process game store with an optional artificial delay per remote call,
/// for exercising eventual-consistency windows in tests.
pub struct MemoryGameStore {
    games: Mutex<HashMap<String, RaceRecord>>,
    watchers: Mutex<HashMap<String, broadcast::Sender<RaceRecord>>>,
    latency: Option<Duration>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self {
            games: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    /// Every call sleeps this long first, simulating a slow network.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    pub fn create_game(
        &self,
        game_id: &str,
        players: Vec<PlayerId>,
        start_time: Option<DateTime<Utc>>,
    ) {
        let mut games = self.games.lock().expect("game store poisoned");
        games.insert(
            game_id.to_string(),
            RaceRecord {
                game_id: game_id.to_string(),
                players,
                start_time,
                ..RaceRecord::default()
            },
        );
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn notify(&self, record: &RaceRecord) {
        let watchers = self.watchers.lock().expect("game store poisoned");
        if let Some(tx) = watchers.get(&record.game_id) {
            let _ = tx.send(record.clone());
        }
    }
}

impl Default for MemoryGameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn get_game(&self, game_id: &str) -> Result<RaceRecord> {
        self.simulate_latency().await;
        let games = self.games.lock().expect("game store poisoned");
        games
            .get(game_id)
            .cloned()
            .ok_or_else(|| KeelraceError::UnknownGame(game_id.to_string()))
    }

    async fn merge_finishing_times(
        &self,
        game_id: &str,
        times: HashMap<PlayerId, DateTime<Utc>>,
    ) -> Result<()> {
        self.simulate_latency().await;
        let record = {
            let mut games = self.games.lock().expect("game store poisoned");
            let record = games
                .get_mut(game_id)
                .ok_or_else(|| KeelraceError::UnknownGame(game_id.to_string()))?;
            record.finishing_times.extend(times);
            record.clone()
        };
        self.notify(&record);
        Ok(())
    }

    async fn touch_heartbeat(&self, game_id: &str, player_id: &str) -> Result<()> {
        self.simulate_latency().await;
        let record = {
            let mut games = self.games.lock().expect("game store poisoned");
            let record = games
                .get_mut(game_id)
                .ok_or_else(|| KeelraceError::UnknownGame(game_id.to_string()))?;
            let now = Utc::now();
            match record
                .heartbeat
                .iter_mut()
                .find(|entry| entry.user_id == player_id)
            {
                Some(entry) => entry.timestamp = now,
                None => record.heartbeat.push(HeartbeatEntry {
                    user_id: player_id.to_string(),
                    timestamp: now,
                }),
            }
            record.clone()
        };
        self.notify(&record);
        Ok(())
    }

    fn watch_game(&self, game_id: &str) -> BoxStream<'static, RaceRecord> {
        let mut watchers = self.watchers.lock().expect("game store poisoned");
        let tx = watchers
            .entry(game_id.to_string())
            .or_insert_with(|| broadcast::channel(64).0);
        BroadcastStream::new(tx.subscribe())
            .filter_map(|record| async move { record.ok() })
            .boxed()
    }
}

/// Earliest recorded finisher in a finish-time map, if any.
pub fn leading_finisher(
    times: &HashMap<PlayerId, DateTime<Utc>>,
) -> Option<(&PlayerId, &DateTime<Utc>)> {
    times.iter().min_by_key(|(_, time)| **time)
}

/// Verdict for one player given a view of the finish-time map: a win when
/// their time is less than or equal to every recorded time. `None` when the
/// player has no entry yet.
pub fn verdict_for(player: &str, times: &HashMap<PlayerId, DateTime<Utc>>) -> Option<RaceVerdict> {
    let own = times.get(player)?;
    if times.values().all(|other| own <= other) {
        Some(RaceVerdict::Won)
    } else {
        Some(RaceVerdict::Lost)
    }
}

/// Heartbeat cadence.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

/// Internal timer signals the host must hand back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceTick {
    Heartbeat,
}

/// This client's verdict on the race, derived independently from its own
/// read of the shared finish-time map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceVerdict {
    Won,
    Lost,
}

/// One player's view of an online race: broadcasts progress, answers echo
/// pings, keeps the heartbeat alive, and resolves the finish order.
///
/// The host drives three inputs into this type: race events from the
/// channel subscription (`handle_event`), record snapshots from the game
/// watch (`on_record_update`), and heartbeat ticks (`on_heartbeat_tick`).
pub struct RaceClient<C: RealtimeChannel, G: GameStore> {
    game_id: String,
    player_id: PlayerId,
    channel: C,
    store: G,
    subscribed: bool,
    last_progress: f64,
    finish_recorded: bool,
    opponents: Vec<PlayerId>,
    opponent_progresses: HashMap<PlayerId, f64>,
    opponent_finished: Option<PlayerId>,
    round_trip_latency_ms: Option<i64>,
    heartbeat_latency_ms: Option<f64>,
    // Pre-call timestamp of the heartbeat in flight; the tick and the
    // record notification are one request/response pair split across an
    // async gap.
    last_heartbeat_sent: Option<DateTime<Utc>>,
    verdict: Option<RaceVerdict>,
    heartbeat_timer: Option<Periodic>,
}

impl<C: RealtimeChannel, G: GameStore> RaceClient<C, G> {
    pub fn new(game_id: impl Into<String>, player_id: impl Into<String>, channel: C, store: G) -> Self {
        Self {
            game_id: game_id.into(),
            player_id: player_id.into(),
            channel,
            store,
            subscribed: false,
            last_progress: 0.0,
            finish_recorded: false,
            opponents: Vec::new(),
            opponent_progresses: HashMap::new(),
            opponent_finished: None,
            round_trip_latency_ms: None,
            heartbeat_latency_ms: None,
            last_heartbeat_sent: None,
            verdict: None,
            heartbeat_timer: None,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn opponents(&self) -> &[PlayerId] {
        &self.opponents
    }

    pub fn opponent_progress(&self, player: &str) -> Option<f64> {
        self.opponent_progresses.get(player).copied()
    }

    pub fn opponent_finished(&self) -> Option<&PlayerId> {
        self.opponent_finished.as_ref()
    }

    pub fn round_trip_latency_ms(&self) -> Option<i64> {
        self.round_trip_latency_ms
    }

    pub fn heartbeat_latency_ms(&self) -> Option<f64> {
        self.heartbeat_latency_ms
    }

    pub fn verdict(&self) -> Option<RaceVerdict> {
        self.verdict
    }

    /// Fetch the game record, learn the opponents and the shared start
    /// time, mark the channel subscribed, and start the heartbeat ticker.
    /// Returns the server-issued start time for the countdown.
    pub async fn setup(&mut self) -> Result<(Option<DateTime<Utc>>, UnboundedReceiver<RaceTick>)> {
        let record = self.store.get_game(&self.game_id).await?;
        self.opponents = record
            .players
            .iter()
            .filter(|p| **p != self.player_id)
            .cloned()
            .collect();
        self.subscribed = true;

        let (tx, rx) = mpsc::unbounded_channel();
        self.heartbeat_timer = Some(spawn_heartbeat(tx));
        info!(game_id = %self.game_id, opponents = self.opponents.len(), "race setup complete");
        Ok((record.start_time, rx))
    }

    /// Broadcast a progress change. Quiet while unsubscribed or unchanged;
    /// the first time progress reaches 100 the finish is recorded.
    pub async fn set_progress(&mut self, progress: f64) {
        if !self.subscribed || progress == self.last_progress {
            return;
        }
        self.last_progress = progress;
        let event = RaceEvent::Progress {
            sender: self.player_id.clone(),
            progress,
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        if let Err(err) = self.channel.publish(event).await {
            warn!(%err, "failed to broadcast progress");
        }

        if progress >= 100.0 {
            self.record_finish().await;
        }
    }

    /// Apply one event from the race channel. Safe under duplicated and
    /// reordered delivery: progress updates are idempotent and echoes only
    /// refresh a latency estimate.
    pub async fn handle_event(&mut self, event: RaceEvent) {
        match event {
            RaceEvent::Progress {
                sender,
                progress,
                timestamp_ms,
            } => {
                if sender != self.player_id {
                    self.opponent_progresses.insert(sender, progress);
                }
                // Every receiver echoes, the sender's own copy included;
                // the originator turns the echo into a round-trip figure.
                let echo = RaceEvent::Echo {
                    original_timestamp_ms: timestamp_ms,
                    echo_timestamp_ms: Utc::now().timestamp_millis(),
                };
                if let Err(err) = self.channel.publish(echo).await {
                    warn!(%err, "failed to publish echo");
                }
            }
            RaceEvent::Echo {
                original_timestamp_ms,
                ..
            } => {
                let now = Utc::now().timestamp_millis();
                self.round_trip_latency_ms = Some(now - original_timestamp_ms);
            }
            RaceEvent::Finished { sender } => {
                if sender != self.player_id {
                    debug!(%sender, "opponent finished");
                    self.opponent_finished = Some(sender);
                }
            }
        }
    }

    /// Heartbeat tick: capture the pre-call timestamp, then touch the
    /// shared record. The timestamp is only kept once the call succeeded,
    /// so a failed touch cannot produce a bogus latency figure later.
    pub async fn on_heartbeat_tick(&mut self) {
        let pre_call = Utc::now();
        match self
            .store
            .touch_heartbeat(&self.game_id, &self.player_id)
            .await
        {
            Ok(()) => self.last_heartbeat_sent = Some(pre_call),
            Err(err) => warn!(%err, "heartbeat touch failed"),
        }
    }

    /// Record-update notification from the watch subscription. Finding our
    /// own heartbeat entry closes the request/response pair started by the
    /// tick; the notification travelled one hop back, so latency is half
    /// the round trip. A record without our entry is "no data yet".
    pub fn on_record_update(&mut self, record: &RaceRecord) {
        let Some(pre_call) = self.last_heartbeat_sent else {
            return;
        };
        if record
            .heartbeat
            .iter()
            .any(|entry| entry.user_id == self.player_id)
        {
            let elapsed = Utc::now()
                .signed_duration_since(pre_call)
                .num_milliseconds();
            self.heartbeat_latency_ms = Some(elapsed as f64 / 2.0);
        }
    }

    /// Write our finish time into the shared map (read-merge-write) and
    /// derive the verdict from our own read. Runs exactly once.
    ///
    /// Every client repeats this check as its own finish lands; there is no
    /// global arbiter. A rival's finish that has not propagated yet can
    /// yield a transient "won" that the rival's own read contradicts, and an
    /// exact timestamp tie reads as a win on both clients. Both are accepted
    /// eventual-consistency behavior, surfaced rather than masked.
    async fn record_finish(&mut self) {
        if self.finish_recorded {
            return;
        }
        self.finish_recorded = true;
        let finish_time = Utc::now();

        if let Err(err) = self
            .channel
            .publish(RaceEvent::Finished {
                sender: self.player_id.clone(),
            })
            .await
        {
            warn!(%err, "failed to broadcast finish");
        }

        let existing = match self.store.get_game(&self.game_id).await {
            Ok(record) => record.finishing_times,
            Err(err) => {
                warn!(%err, "failed to fetch finishing times");
                HashMap::new()
            }
        };
        let mut merged = existing;
        merged.insert(self.player_id.clone(), finish_time);

        if let Err(err) = self
            .store
            .merge_finishing_times(&self.game_id, merged.clone())
            .await
        {
            warn!(%err, "failed to store finish time");
            return;
        }

        self.verdict = verdict_for(&self.player_id, &merged);
        info!(verdict = ?self.verdict, "race finish evaluated");
    }

    /// Stop the race: cancel the heartbeat ticker and stop publishing.
    /// The host drops its channel and watch subscriptions alongside this,
    /// leaving no recurring work behind.
    pub fn teardown(&mut self) {
        if let Some(mut timer) = self.heartbeat_timer.take() {
            timer.stop();
        }
        self.subscribed = false;
        self.last_heartbeat_sent = None;
    }
}

impl<C: RealtimeChannel, G: GameStore> Drop for RaceClient<C, G> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn_heartbeat(tx: UnboundedSender<RaceTick>) -> Periodic {
    Periodic::spawn(HEARTBEAT_PERIOD, move || {
        tx.send(RaceTick::Heartbeat).is_ok()
    })
}
