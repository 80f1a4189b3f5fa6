use serde::{Deserialize, Serialize};

use crate::state::GameState;
use crate::text::SPACE_WORD;

/// The 5-characters-per-word convention. Shared by every WPM figure in the
/// crate so results stay comparable across modes and clients.
pub const CHARS_PER_WORD: f64 = 5.0;

/// Net words per minute from correct keystrokes over elapsed milliseconds.
/// Zero for a non-positive interval.
pub fn wpm(correct_keystrokes: u32, elapsed_ms: i64) -> u32 {
    keystrokes_per_minute(correct_keystrokes, elapsed_ms)
}

/// Gross words per minute from all keystrokes over elapsed milliseconds.
pub fn gross_wpm(total_keystrokes: u32, elapsed_ms: i64) -> u32 {
    keystrokes_per_minute(total_keystrokes, elapsed_ms)
}

fn keystrokes_per_minute(keystrokes: u32, elapsed_ms: i64) -> u32 {
    if elapsed_ms <= 0 {
        return 0;
    }
    let minutes = elapsed_ms as f64 / 60_000.0;
    (keystrokes as f64 / CHARS_PER_WORD / minutes).floor() as u32
}

/// Round WPM; defined only once the round has both timestamps.
pub fn round_wpm(state: &GameState) -> u32 {
    state
        .elapsed_ms()
        .map(|ms| wpm(state.correct_keystrokes, ms))
        .unwrap_or(0)
}

/// Round gross WPM; defined only once the round has both timestamps.
pub fn round_gross_wpm(state: &GameState) -> u32 {
    state
        .elapsed_ms()
        .map(|ms| gross_wpm(state.total_keystrokes, ms))
        .unwrap_or(0)
}

/// Round accuracy in percent, rounded to the nearest integer; zero before
/// any keystroke has been committed.
pub fn accuracy(correct_keystrokes: u32, total_keystrokes: u32) -> f64 {
    if total_keystrokes == 0 {
        return 0.0;
    }
    (correct_keystrokes as f64 / total_keystrokes as f64 * 100.0).round()
}

/// Captures net/gross per-minute rates from the keystroke counters once per
/// second, against baselines from the previous tick. Driven by the round
/// controller's one-second sampler.
#[derive(Debug, Default, Clone)]
pub struct PerSecondSampler {
    pub wpm_per_second: Vec<f64>,
    pub gross_wpm_per_second: Vec<f64>,
    previous_correct: u32,
    previous_total: u32,
}

impl PerSecondSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sampled second from the current counter values.
    pub fn sample(&mut self, correct_keystrokes: u32, total_keystrokes: u32) {
        let net = (correct_keystrokes.saturating_sub(self.previous_correct)) as f64
            / CHARS_PER_WORD
            * 60.0;
        let gross = (total_keystrokes.saturating_sub(self.previous_total)) as f64
            / CHARS_PER_WORD
            * 60.0;
        self.wpm_per_second.push(net);
        self.gross_wpm_per_second.push(gross);
        self.previous_correct = correct_keystrokes;
        self.previous_total = total_keystrokes;
    }

    /// Clear the running baselines at round end. The collected series stays
    /// for the post-round views.
    pub fn stop(&mut self) {
        self.previous_correct = 0;
        self.previous_total = 0;
    }

    /// Drop everything, for the next round.
    pub fn reset(&mut self) {
        self.wpm_per_second.clear();
        self.gross_wpm_per_second.clear();
        self.previous_correct = 0;
        self.previous_total = 0;
    }
}

/// Net/gross ratio per sampled second, in percent. `None` where that second
/// had no gross keystrokes: no data is a different signal than perfect
/// misses and must not collapse to zero.
pub fn accuracy_per_second(
    wpm_per_second: &[f64],
    gross_wpm_per_second: &[f64],
) -> Vec<Option<f64>> {
    wpm_per_second
        .iter()
        .zip(gross_wpm_per_second)
        .map(|(net, gross)| {
            if *gross == 0.0 {
                None
            } else {
                Some(net / gross * 100.0)
            }
        })
        .collect()
}

/// Coefficient of variation of the per-second net-WPM series, relative to
/// the round's overall WPM rather than the per-second mean (partial-interval
/// data makes the per-second mean imprecise). Sample variance, n−1. Zero
/// when fewer than two samples exist or the overall WPM is zero.
pub fn consistency(wpm_per_second: &[f64], overall_wpm: f64) -> f64 {
    if wpm_per_second.len() < 2 || overall_wpm == 0.0 {
        return 0.0;
    }
    let sum_of_squares: f64 = wpm_per_second
        .iter()
        .map(|value| (value - overall_wpm).powi(2))
        .sum();
    let variance = sum_of_squares / (wpm_per_second.len() - 1) as f64;
    variance.sqrt() / overall_wpm * 100.0
}

/// Samples the cursor once per second and attributes the words typed in
/// that window, deduplicated, to [`GameState::words_per_second`].
#[derive(Debug, Default, Clone)]
pub struct WordSampler {
    previous_index: usize,
}

impl WordSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&mut self, state: &mut GameState) {
        let end = state.current_index;
        let mut words_this_second: Vec<String> = Vec::new();
        for i in self.previous_index..end {
            if let Some(word) = state.index_to_word.get(i) {
                if !words_this_second.iter().any(|w| w == word) {
                    words_this_second.push(word.clone());
                }
            }
        }
        state.words_per_second.push(words_this_second);
        self.previous_index = end;
    }

    pub fn stop(&mut self) {
        self.previous_index = 0;
    }
}

/// A word typed below the player's trailing average, with the WPM at which
/// it was typed. Feeds the training-word generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowWord {
    pub word: String,
    pub wpm: f64,
}

/// Slow-word retention cap, matching the round-history cap.
pub const SLOW_WORDS_CAP: usize = 100;

/// For each sampled second whose net WPM fell below the trailing average
/// (and was non-negative), collect the words typed in that second. A word
/// is reported once per round even when it spans several slow seconds.
pub fn identify_slow_words(
    words_per_second: &[Vec<String>],
    wpm_per_second: &[f64],
    average_wpm: f64,
) -> Vec<SlowWord> {
    let mut slow_words = Vec::new();
    let mut seen: Vec<&str> = Vec::new();

    for (second, words) in words_per_second.iter().enumerate() {
        let Some(&current_wpm) = wpm_per_second.get(second) else {
            continue;
        };
        if current_wpm >= average_wpm || current_wpm < 0.0 {
            continue;
        }
        for word in words {
            if word == SPACE_WORD {
                continue;
            }
            if !seen.contains(&word.as_str()) {
                seen.push(word);
                slow_words.push(SlowWord {
                    word: word.clone(),
                    wpm: current_wpm,
                });
            }
        }
    }
    slow_words
}

/// Append this round's slow words to the all-time list, keeping only the
/// most recent [`SLOW_WORDS_CAP`] entries.
pub fn merge_slow_words(existing: Vec<SlowWord>, fresh: &[SlowWord]) -> Vec<SlowWord> {
    let mut merged = existing;
    merged.extend_from_slice(fresh);
    let excess = merged.len().saturating_sub(SLOW_WORDS_CAP);
    if excess > 0 {
        merged.drain(..excess);
    }
    merged
}

/// Number of histogram bins for both distribution views.
pub const BUCKET_COUNT: usize = 20;

/// WPM histogram bin: fixed width 10, last bin catches 190+.
pub fn wpm_bucket_index(wpm: f64) -> usize {
    ((wpm / 10.0).floor().max(0.0) as usize).min(BUCKET_COUNT - 1)
}

/// Accuracy histogram bin: fixed width 2.5 starting at 50 %, last bin
/// catches ≥97.5 %.
pub fn accuracy_bucket_index(accuracy: f64) -> usize {
    (((accuracy - 50.0) / 2.5).floor().max(0.0) as usize).min(BUCKET_COUNT - 1)
}
