use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::levels::STARTING_LIVES;
use crate::statistics::ErrorRecord;
use crate::text;

/// Shared application state for one client, passed explicitly to every
/// component instead of living in an ambient singleton.
///
/// Slice ownership:
/// - the keystroke engine mutates the typed buffer, counters, tallies,
///   errors, and `has_mistake`;
/// - the round controller owns the clock, the game flags, and the round
///   counter;
/// - the metrics sampler appends to `words_per_second`;
/// - the campaign rules mutate the life counters.
#[derive(Debug, Clone)]
pub struct GameState {
    // Target text and its per-index word attribution.
    pub text: Vec<char>,
    pub index_to_word: Vec<String>,

    // Typed buffer. `current_index` is the authoritative cursor; `typed`
    // holds what was actually typed at each committed index.
    pub current_index: usize,
    pub typed: HashMap<usize, char>,
    pub typed_indices: Vec<usize>,
    pub unique_correct_indices: Vec<bool>,
    pub has_mistake: bool,

    // Per-round keystroke counters. Never decremented; reset between rounds.
    pub total_keystrokes: u32,
    pub correct_keystrokes: u32,
    pub errors: Vec<ErrorRecord>,
    pub total_occurrences: HashMap<char, u32>,
    pub mistakes_made: HashMap<char, u32>,

    // Session clock and lifecycle flags.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_game_started: bool,
    pub is_game_finished: bool,
    pub typing_allowed: bool,
    pub show_results_overlay: bool,

    // Words typed in each sampled second, for slow-word attribution.
    pub words_per_second: Vec<Vec<String>>,

    // Input policies, independently toggleable.
    pub force_mistake_correction: bool,
    pub no_end_without_correction: bool,

    // Campaign slice.
    pub player_lives: u32,
    pub opponent_lives: u32,
    pub current_round: u32,
    pub average_wpm_last_100: f64,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            text: Vec::new(),
            index_to_word: Vec::new(),
            current_index: 0,
            typed: HashMap::new(),
            typed_indices: Vec::new(),
            unique_correct_indices: Vec::new(),
            has_mistake: false,
            total_keystrokes: 0,
            correct_keystrokes: 0,
            errors: Vec::new(),
            total_occurrences: HashMap::new(),
            mistakes_made: HashMap::new(),
            start_time: None,
            end_time: None,
            is_game_started: false,
            is_game_finished: false,
            typing_allowed: false,
            show_results_overlay: false,
            words_per_second: Vec::new(),
            force_mistake_correction: false,
            no_end_without_correction: false,
            player_lives: STARTING_LIVES,
            opponent_lives: STARTING_LIVES,
            current_round: 1,
            average_wpm_last_100: 0.0,
        }
    }
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new target text, rebuilding the index→word map and the
    /// unique-correct flags.
    pub fn set_text(&mut self, text: &str) {
        self.text = text.chars().collect();
        self.index_to_word = text::index_to_word_map(text);
        self.unique_correct_indices = vec![false; self.text.len()];
    }

    pub fn text_len(&self) -> usize {
        self.text.len()
    }

    /// Expected character at an index, if in bounds.
    pub fn expected_char(&self, index: usize) -> Option<char> {
        self.text.get(index).copied()
    }

    /// Percentage of indices currently holding their correct character.
    /// Robust to retyping: an index only counts while its latest committed
    /// keystroke matches.
    pub fn progress_percent(&self) -> f64 {
        if self.text.is_empty() {
            return 0.0;
        }
        let correct = self
            .unique_correct_indices
            .iter()
            .filter(|flag| **flag)
            .count();
        correct as f64 / self.text.len() as f64 * 100.0
    }

    /// Elapsed round time in milliseconds. Defined only when the round has
    /// both timestamps and they are ordered.
    pub fn elapsed_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end >= start => {
                Some(end.signed_duration_since(start).num_milliseconds())
            }
            _ => None,
        }
    }

    pub fn reset_keystrokes(&mut self) {
        self.total_keystrokes = 0;
        self.correct_keystrokes = 0;
    }

    /// Clear everything tied to the round in flight: flags, clock, typed
    /// buffer, cursor, and error list. Counters are reset separately so the
    /// round controller can order the two steps.
    pub fn reset_round_state(&mut self) {
        self.is_game_started = false;
        self.is_game_finished = false;
        self.start_time = None;
        self.end_time = None;
        self.current_index = 0;
        self.typed.clear();
        self.typed_indices.clear();
        self.errors.clear();
        self.has_mistake = false;
        self.typing_allowed = false;
    }

    /// Clear the per-round metric accumulators (word attribution, tallies,
    /// unique-correct flags).
    pub fn reset_metric_accumulators(&mut self) {
        self.words_per_second.clear();
        self.total_occurrences.clear();
        self.mistakes_made.clear();
        self.unique_correct_indices = vec![false; self.text.len()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn set_text_sizes_unique_correct_flags() {
        let mut state = GameState::new();
        state.set_text("hello");
        assert_eq!(state.text_len(), 5);
        assert_eq!(state.unique_correct_indices.len(), 5);
        assert_eq!(state.expected_char(0), Some('h'));
        assert_eq!(state.expected_char(5), None);
    }

    #[test]
    fn progress_counts_unique_correct_indices() {
        let mut state = GameState::new();
        state.set_text("abcd");
        assert_eq!(state.progress_percent(), 0.0);
        state.unique_correct_indices[0] = true;
        state.unique_correct_indices[1] = true;
        assert_eq!(state.progress_percent(), 50.0);
    }

    #[test]
    fn progress_empty_text_is_zero() {
        let state = GameState::new();
        assert_eq!(state.progress_percent(), 0.0);
    }

    #[test]
    fn elapsed_requires_both_timestamps() {
        let mut state = GameState::new();
        assert_eq!(state.elapsed_ms(), None);

        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        state.start_time = Some(start);
        assert_eq!(state.elapsed_ms(), None);

        state.end_time = Some(start + chrono::Duration::milliseconds(1500));
        assert_eq!(state.elapsed_ms(), Some(1500));
    }

    #[test]
    fn elapsed_rejects_reversed_clock() {
        let mut state = GameState::new();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        state.start_time = Some(start);
        state.end_time = Some(start - chrono::Duration::seconds(1));
        assert_eq!(state.elapsed_ms(), None);
    }

    #[test]
    fn reset_round_state_clears_typing_slice() {
        let mut state = GameState::new();
        state.set_text("ab");
        state.current_index = 2;
        state.typed.insert(0, 'a');
        state.typed_indices.push(0);
        state.is_game_started = true;
        state.typing_allowed = true;

        state.reset_round_state();

        assert_eq!(state.current_index, 0);
        assert!(state.typed.is_empty());
        assert!(state.typed_indices.is_empty());
        assert!(!state.is_game_started);
        assert!(!state.typing_allowed);
        // Counters survive; they are cleared by reset_keystrokes in the
        // controller's ordered sequence.
    }
}
