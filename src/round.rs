use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::campaign::OpponentSim;
use crate::levels::DEFAULT_COUNTDOWN_VALUE;
use crate::metrics::{self, PerSecondSampler, WordSampler};
use crate::state::GameState;
use crate::statistics::RoundStatistic;

/// Lifecycle of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum RoundPhase {
    Idle,
    Countdown,
    Typing,
    Finished,
}

/// Why a round left the `Typing` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    PlayerFinished,
    OpponentFinished,
    Aborted,
}

/// Timer-driven events consumed by [`RoundController::handle_event`]. The
/// timers only emit; all state mutation happens on the caller's thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    CountdownTick,
    /// The brief post-countdown display window elapsed.
    CountdownWindowElapsed,
    MetricsTick,
    WordTick,
    OpponentTick,
}

/// When the countdown's internal timer starts ticking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSync {
    Immediate,
    /// Delay until a server-issued wall-clock instant so differently-loaded
    /// clients converge on the same start.
    AtServerTime(DateTime<Utc>),
}

/// Mode-specific strategy for the one round controller: how the countdown
/// is synchronized and whether a simulated opponent races alongside.
#[derive(Debug, Clone, Copy)]
pub struct ModeStrategy {
    pub start_sync: StartSync,
    pub opponent_wpm: Option<u32>,
}

impl ModeStrategy {
    /// Free training: immediate start, nobody racing against you.
    pub fn solo() -> Self {
        Self {
            start_sync: StartSync::Immediate,
            opponent_wpm: None,
        }
    }

    /// Campaign round against the computer at the given WPM.
    pub fn campaign(opponent_wpm: u32) -> Self {
        Self {
            start_sync: StartSync::Immediate,
            opponent_wpm: Some(opponent_wpm),
        }
    }

    /// Online race with a shared, server-issued start time. Opponent
    /// progress arrives over the wire, not from a simulation.
    pub fn versus(server_start: DateTime<Utc>) -> Self {
        Self {
            start_sync: StartSync::AtServerTime(server_start),
            opponent_wpm: None,
        }
    }
}

#[derive(Debug, Default)]
struct RoundTimers {
    countdown: Option<crate::timer::Periodic>,
    countdown_window: Option<crate::timer::OneShot>,
    metrics: Option<crate::timer::Periodic>,
    words: Option<crate::timer::Periodic>,
    opponent: Option<crate::timer::Periodic>,
}

impl RoundTimers {
    fn stop_all(&mut self) {
        self.countdown.take();
        self.countdown_window.take();
        self.metrics.take();
        self.words.take();
        self.opponent.take();
    }
}

/// Orchestrates countdown, typing, and scoring for one round at a time.
/// One controller serves every mode; the differences are carried by the
/// [`ModeStrategy`]. All round-scoped timers are owned here and are
/// guaranteed stopped on round end and on drop.
pub struct RoundController {
    phase: RoundPhase,
    countdown_value: u32,
    countdown_finished: bool,
    countdown_visible: bool,
    pub sampler: PerSecondSampler,
    word_sampler: WordSampler,
    opponent: Option<OpponentSim>,
    end_reason: Option<EndReason>,
    strategy: ModeStrategy,
    tx: UnboundedSender<RoundEvent>,
    timers: RoundTimers,
}

impl RoundController {
    /// Build a controller and the event stream its timers will feed. The
    /// caller drains the receiver and hands each event back to
    /// [`handle_event`](Self::handle_event).
    pub fn new(strategy: ModeStrategy) -> (Self, UnboundedReceiver<RoundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            phase: RoundPhase::Idle,
            countdown_value: DEFAULT_COUNTDOWN_VALUE,
            countdown_finished: false,
            countdown_visible: false,
            sampler: PerSecondSampler::new(),
            word_sampler: WordSampler::new(),
            opponent: strategy.opponent_wpm.map(OpponentSim::new),
            end_reason: None,
            strategy,
            tx,
            timers: RoundTimers::default(),
        };
        (controller, rx)
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn countdown_value(&self) -> u32 {
        self.countdown_value
    }

    pub fn countdown_visible(&self) -> bool {
        self.countdown_visible
    }

    pub fn opponent_progress(&self) -> f64 {
        self.opponent.as_ref().map(|o| o.progress()).unwrap_or(0.0)
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    /// Enter the countdown phase and start its one-second ticker, delayed
    /// for versus mode so every client starts on the shared instant.
    pub fn begin_countdown(&mut self) {
        self.timers.countdown.take();
        self.timers.countdown_window.take();
        self.countdown_value = DEFAULT_COUNTDOWN_VALUE;
        self.countdown_finished = false;
        self.countdown_visible = true;
        self.phase = RoundPhase::Countdown;
        self.end_reason = None;

        let delay = match self.strategy.start_sync {
            StartSync::Immediate => Duration::ZERO,
            StartSync::AtServerTime(start) => {
                let millis = start
                    .signed_duration_since(Utc::now())
                    .num_milliseconds()
                    .max(0);
                Duration::from_millis(millis as u64)
            }
        };

        let tx = self.tx.clone();
        self.timers.countdown = Some(crate::timer::Periodic::spawn_delayed(
            delay,
            Duration::from_secs(1),
            move || tx.send(RoundEvent::CountdownTick).is_ok(),
        ));
    }

    /// Apply one timer event. Events for a phase that has already passed
    /// are dropped; stale timers cannot corrupt a newer round.
    pub fn handle_event(&mut self, state: &mut GameState, event: RoundEvent) {
        match event {
            RoundEvent::CountdownTick => self.on_countdown_tick(state),
            RoundEvent::CountdownWindowElapsed => {
                // Only hide if this window still belongs to the countdown
                // that scheduled it; a reset in between restarts the display.
                if self.countdown_finished {
                    self.countdown_visible = false;
                }
            }
            RoundEvent::MetricsTick => {
                if self.phase == RoundPhase::Typing {
                    self.sampler
                        .sample(state.correct_keystrokes, state.total_keystrokes);
                }
            }
            RoundEvent::WordTick => {
                if self.phase == RoundPhase::Typing {
                    self.word_sampler.sample(state);
                }
            }
            RoundEvent::OpponentTick => {
                if self.phase != RoundPhase::Typing {
                    return;
                }
                let finished = match self.opponent.as_mut() {
                    Some(sim) => sim.tick(state.text_len()),
                    None => false,
                };
                if finished {
                    self.finish_round(state, EndReason::OpponentFinished);
                }
            }
        }
    }

    fn on_countdown_tick(&mut self, state: &mut GameState) {
        if self.phase != RoundPhase::Countdown {
            return;
        }
        self.countdown_value = self.countdown_value.saturating_sub(1);
        if self.countdown_value >= 1 {
            return;
        }

        self.timers.countdown.take();
        self.countdown_finished = true;
        self.start_typing(state);

        let tx = self.tx.clone();
        self.timers.countdown_window = Some(crate::timer::OneShot::spawn_after(
            Duration::from_millis(500),
            move || {
                let _ = tx.send(RoundEvent::CountdownWindowElapsed);
            },
        ));
    }

    /// Countdown reached zero: open the round for typing and start the
    /// per-second samplers (and the opponent ticker in campaign mode).
    fn start_typing(&mut self, state: &mut GameState) {
        debug!(round = state.current_round, "round started");
        self.phase = RoundPhase::Typing;
        state.is_game_started = true;
        state.start_time = Some(Utc::now());
        state.typing_allowed = true;

        let tx = self.tx.clone();
        self.timers.metrics = Some(crate::timer::Periodic::spawn(
            Duration::from_secs(1),
            move || tx.send(RoundEvent::MetricsTick).is_ok(),
        ));
        let tx = self.tx.clone();
        self.timers.words = Some(crate::timer::Periodic::spawn(
            Duration::from_secs(1),
            move || tx.send(RoundEvent::WordTick).is_ok(),
        ));
        if self.opponent.is_some() {
            let tx = self.tx.clone();
            self.timers.opponent = Some(crate::timer::Periodic::spawn(
                Duration::from_millis(100),
                move || tx.send(RoundEvent::OpponentTick).is_ok(),
            ));
        }
    }

    /// The player finished the text; called by the host when the keystroke
    /// engine signals completion.
    pub fn on_typing_completed(&mut self, state: &mut GameState) {
        self.finish_round(state, EndReason::PlayerFinished);
    }

    /// Close the round: record the end timestamp once, disable typing, and
    /// stop every round-scoped timer. Idempotent.
    pub fn finish_round(&mut self, state: &mut GameState, reason: EndReason) {
        if self.phase == RoundPhase::Finished {
            return;
        }
        debug!(?reason, round = state.current_round, "round finished");
        self.phase = RoundPhase::Finished;
        self.end_reason = Some(reason);
        state.is_game_finished = true;
        if state.end_time.is_none() {
            state.end_time = Some(Utc::now());
        }
        state.typing_allowed = false;
        state.show_results_overlay = true;

        self.timers.stop_all();
        self.sampler.stop();
        self.word_sampler.stop();
    }

    /// Build the statistic for the just-finished round from the current
    /// state and the sampler series. The id is assigned by the history.
    pub fn build_round_statistic(&self, state: &GameState) -> RoundStatistic {
        let wpm = metrics::round_wpm(state);
        RoundStatistic {
            id: 0,
            timestamp: Utc::now(),
            wpm,
            gross_wpm: metrics::round_gross_wpm(state),
            accuracy: metrics::accuracy(state.correct_keystrokes, state.total_keystrokes),
            wpm_per_second: self.sampler.wpm_per_second.clone(),
            gross_wpm_per_second: self.sampler.gross_wpm_per_second.clone(),
            errors: state.errors.clone(),
            total_occurrences: state.total_occurrences.clone(),
            mistakes_made: state.mistakes_made.clone(),
            consistency: metrics::consistency(&self.sampler.wpm_per_second, wpm as f64),
        }
    }

    /// Reset for the next round. The sequence is fixed: advance the round
    /// counter, clear the keystroke counters, clear the results overlay,
    /// reset the round state, restart the countdown, reset the opponent
    /// simulation, then reset the metric accumulators. The caller fetches
    /// the next text asynchronously after this returns.
    pub fn reset_for_next_round(&mut self, state: &mut GameState) {
        state.current_round += 1;
        state.reset_keystrokes();
        state.show_results_overlay = false;
        state.reset_round_state();
        self.begin_countdown();
        if let Some(sim) = self.opponent.as_mut() {
            sim.reset();
        }
        self.sampler.reset();
        self.word_sampler.stop();
        state.reset_metric_accumulators();
    }

    /// Abandon whatever is in flight and release every timer.
    pub fn shutdown(&mut self, state: &mut GameState) {
        if self.phase == RoundPhase::Typing || self.phase == RoundPhase::Countdown {
            self.finish_round(state, EndReason::Aborted);
        }
        self.timers.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing_state(text: &str) -> GameState {
        let mut state = GameState::new();
        state.set_text(text);
        state
    }

    fn run_countdown(controller: &mut RoundController, state: &mut GameState) {
        for _ in 0..DEFAULT_COUNTDOWN_VALUE {
            controller.handle_event(state, RoundEvent::CountdownTick);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_runs_down_then_opens_typing() {
        let (mut controller, _rx) = RoundController::new(ModeStrategy::solo());
        let mut state = typing_state("hello");

        controller.begin_countdown();
        assert_eq!(controller.phase(), RoundPhase::Countdown);
        assert_eq!(controller.countdown_value(), 3);
        assert!(controller.countdown_visible());

        controller.handle_event(&mut state, RoundEvent::CountdownTick);
        assert_eq!(controller.countdown_value(), 2);
        assert_eq!(controller.phase(), RoundPhase::Countdown);

        controller.handle_event(&mut state, RoundEvent::CountdownTick);
        controller.handle_event(&mut state, RoundEvent::CountdownTick);

        assert_eq!(controller.phase(), RoundPhase::Typing);
        assert!(state.is_game_started);
        assert!(state.typing_allowed);
        assert!(state.start_time.is_some());
        // The finished graphic is still showing for its brief window.
        assert!(controller.countdown_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_window_hides_after_delay() {
        let (mut controller, _rx) = RoundController::new(ModeStrategy::solo());
        let mut state = typing_state("hello");

        controller.begin_countdown();
        run_countdown(&mut controller, &mut state);
        controller.handle_event(&mut state, RoundEvent::CountdownWindowElapsed);
        assert!(!controller.countdown_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_during_window_keeps_new_countdown_visible() {
        let (mut controller, _rx) = RoundController::new(ModeStrategy::solo());
        let mut state = typing_state("hello");

        controller.begin_countdown();
        run_countdown(&mut controller, &mut state);
        controller.finish_round(&mut state, EndReason::PlayerFinished);
        controller.reset_for_next_round(&mut state);

        // The stale window event from the previous countdown arrives late;
        // the fresh countdown must stay visible.
        controller.handle_event(&mut state, RoundEvent::CountdownWindowElapsed);
        assert!(controller.countdown_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_ticks_only_sample_while_typing() {
        let (mut controller, _rx) = RoundController::new(ModeStrategy::solo());
        let mut state = typing_state("hello");

        state.correct_keystrokes = 5;
        state.total_keystrokes = 5;
        controller.handle_event(&mut state, RoundEvent::MetricsTick);
        assert!(controller.sampler.wpm_per_second.is_empty());

        controller.begin_countdown();
        run_countdown(&mut controller, &mut state);
        controller.handle_event(&mut state, RoundEvent::MetricsTick);
        assert_eq!(controller.sampler.wpm_per_second, vec![60.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn opponent_reaching_end_finishes_round() {
        let (mut controller, _rx) = RoundController::new(ModeStrategy::campaign(200));
        let mut state = typing_state("hello");

        controller.begin_countdown();
        run_countdown(&mut controller, &mut state);

        // 200 wpm over 5 chars: 33.3 progress per tick, done on the third.
        controller.handle_event(&mut state, RoundEvent::OpponentTick);
        controller.handle_event(&mut state, RoundEvent::OpponentTick);
        assert_eq!(controller.phase(), RoundPhase::Typing);
        controller.handle_event(&mut state, RoundEvent::OpponentTick);

        assert_eq!(controller.phase(), RoundPhase::Finished);
        assert_eq!(controller.end_reason(), Some(EndReason::OpponentFinished));
        assert_eq!(controller.opponent_progress(), 100.0);
        assert!(!state.typing_allowed);
        assert!(state.end_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn finish_round_is_idempotent() {
        let (mut controller, _rx) = RoundController::new(ModeStrategy::solo());
        let mut state = typing_state("hello");

        controller.begin_countdown();
        run_countdown(&mut controller, &mut state);
        controller.finish_round(&mut state, EndReason::PlayerFinished);
        let first_end = state.end_time;

        controller.finish_round(&mut state, EndReason::Aborted);
        assert_eq!(state.end_time, first_end);
        assert_eq!(controller.end_reason(), Some(EndReason::PlayerFinished));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_sequence_clears_round_scoped_state() {
        let (mut controller, _rx) = RoundController::new(ModeStrategy::campaign(40));
        let mut state = typing_state("hello");

        controller.begin_countdown();
        run_countdown(&mut controller, &mut state);
        state.total_keystrokes = 10;
        state.correct_keystrokes = 8;
        controller.handle_event(&mut state, RoundEvent::MetricsTick);
        controller.handle_event(&mut state, RoundEvent::OpponentTick);
        controller.finish_round(&mut state, EndReason::PlayerFinished);
        assert!(state.show_results_overlay);

        controller.reset_for_next_round(&mut state);

        assert_eq!(state.current_round, 2);
        assert_eq!(state.total_keystrokes, 0);
        assert_eq!(state.correct_keystrokes, 0);
        assert!(!state.show_results_overlay);
        assert!(state.start_time.is_none());
        assert_eq!(controller.phase(), RoundPhase::Countdown);
        assert_eq!(controller.countdown_value(), 3);
        assert_eq!(controller.opponent_progress(), 0.0);
        assert!(controller.sampler.wpm_per_second.is_empty());
        assert!(state.words_per_second.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn round_statistic_reflects_counters_and_series() {
        let (mut controller, _rx) = RoundController::new(ModeStrategy::solo());
        let mut state = typing_state("hello");

        controller.begin_countdown();
        run_countdown(&mut controller, &mut state);
        state.correct_keystrokes = 5;
        state.total_keystrokes = 6;
        controller.handle_event(&mut state, RoundEvent::MetricsTick);
        controller.finish_round(&mut state, EndReason::PlayerFinished);

        // Pin the clock for a deterministic wpm figure.
        let start = state.start_time.unwrap();
        state.end_time = Some(start + chrono::Duration::seconds(30));

        let stat = controller.build_round_statistic(&state);
        assert_eq!(stat.wpm, 2);
        assert_eq!(stat.gross_wpm, 2);
        assert_eq!(stat.accuracy, 83.0);
        assert_eq!(stat.wpm_per_second, vec![60.0]);
        // single sample: consistency guard returns zero
        assert_eq!(stat.consistency, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn versus_strategy_delays_countdown_ticker() {
        let server_start = Utc::now() + chrono::Duration::seconds(2);
        let (mut controller, mut rx) = RoundController::new(ModeStrategy::versus(server_start));
        controller.begin_countdown();

        // Inside the delay window nothing ticks yet.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(rx.try_recv().is_err());

        // delay (~2s) + first period (1s)
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(rx.try_recv().unwrap(), RoundEvent::CountdownTick);
    }
}
