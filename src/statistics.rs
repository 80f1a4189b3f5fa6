use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::text::EXCLUDED_WORDS;

/// One mismatch between an attempted and an expected character, attributed
/// to the word at the cursor. Backspaces never produce one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub attempted: char,
    pub expected: char,
    pub word: String,
}

/// Everything recorded about one finished round. Created by the round
/// controller, persisted by a profile store, read back to seed the
/// aggregate views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStatistic {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub wpm: u32,
    pub gross_wpm: u32,
    pub accuracy: f64,
    pub wpm_per_second: Vec<f64>,
    pub gross_wpm_per_second: Vec<f64>,
    pub errors: Vec<ErrorRecord>,
    pub total_occurrences: HashMap<char, u32>,
    pub mistakes_made: HashMap<char, u32>,
    pub consistency: f64,
}

/// Rounds below this accuracy are not recorded.
pub const MIN_SAVED_ACCURACY: f64 = 50.0;

/// In-memory round history is capped at this many entries, oldest evicted.
pub const HISTORY_CAP: usize = 100;

/// Ordered history of round statistics for the current client, capped for
/// storage economy.
#[derive(Debug, Default, Clone)]
pub struct RoundHistory {
    rounds: Vec<RoundStatistic>,
    next_id: u64,
}

impl RoundHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the history (and the id counter) from previously persisted
    /// rounds, oldest first.
    pub fn seed(&mut self, rounds: Vec<RoundStatistic>) {
        self.next_id = rounds.iter().map(|r| r.id).max().unwrap_or(0);
        self.rounds = rounds;
        let excess = self.rounds.len().saturating_sub(HISTORY_CAP);
        if excess > 0 {
            self.rounds.drain(..excess);
        }
    }

    /// Record a finished round. Returns false (and records nothing) when the
    /// round's accuracy does not clear [`MIN_SAVED_ACCURACY`].
    pub fn record(&mut self, mut stat: RoundStatistic) -> bool {
        if stat.accuracy <= MIN_SAVED_ACCURACY {
            debug!(accuracy = stat.accuracy, "round not recorded, accuracy at or below threshold");
            return false;
        }
        self.next_id += 1;
        stat.id = self.next_id;
        self.rounds.push(stat);
        if self.rounds.len() > HISTORY_CAP {
            let excess = self.rounds.len() - HISTORY_CAP;
            self.rounds.drain(..excess);
        }
        true
    }

    pub fn rounds(&self) -> &[RoundStatistic] {
        &self.rounds
    }

    pub fn last(&self) -> Option<&RoundStatistic> {
        self.rounds.last()
    }

    pub fn clear(&mut self) {
        self.rounds.clear();
    }

    /// Mean WPM over the most recent 100 rounds; 0 with no history. Feeds
    /// the slow-word threshold.
    pub fn average_wpm_last_100(&self) -> f64 {
        let tail_start = self.rounds.len().saturating_sub(100);
        let tail = &self.rounds[tail_start..];
        if tail.is_empty() {
            return 0.0;
        }
        tail.iter().map(|r| r.wpm as f64).sum::<f64>() / tail.len() as f64
    }
}

/// Case-insensitive character tallies merged across rounds, for the
/// mistyped-character heatmap.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapData {
    pub total_occurrences: HashMap<char, u32>,
    pub mistakes_made: HashMap<char, u32>,
}

/// Merge occurrence and mistake tallies across all rounds, folding
/// characters to lowercase.
pub fn aggregate_heatmap(rounds: &[RoundStatistic]) -> HeatmapData {
    let mut data = HeatmapData::default();
    for round in rounds {
        for (c, count) in &round.total_occurrences {
            let lower = c.to_lowercase().next().unwrap_or(*c);
            *data.total_occurrences.entry(lower).or_insert(0) += count;
            data.mistakes_made.entry(lower).or_insert(0);
        }
        for (c, count) in &round.mistakes_made {
            let lower = c.to_lowercase().next().unwrap_or(*c);
            *data.mistakes_made.entry(lower).or_insert(0) += count;
        }
    }
    data
}

/// Error rate per character: mistakes / occurrences. Characters never seen
/// are absent rather than zero.
pub fn error_rates(data: &HeatmapData) -> HashMap<char, f64> {
    data.total_occurrences
        .iter()
        .filter(|(_, total)| **total > 0)
        .map(|(c, total)| {
            let mistakes = data.mistakes_made.get(c).copied().unwrap_or(0);
            (*c, mistakes as f64 / *total as f64)
        })
        .collect()
}

/// The characters most in need of practice, ordered by descending error
/// rate. Feeds the training-word generator.
pub fn top_mistyped_characters(rates: &HashMap<char, f64>, limit: usize) -> Vec<char> {
    rates
        .iter()
        .sorted_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| *c)
        .take(limit)
        .collect()
}

/// How many top mistyped words the all-time view shows.
pub const TOP_MISTYPED_WORDS: usize = 13;

/// All-time mistyped words: error words deduplicated within each round (so
/// repeated fumbles on one word in one round count once), tallied across
/// rounds, sorted by descending frequency.
pub fn top_mistyped_words(rounds: &[RoundStatistic]) -> Vec<(String, u32)> {
    let mut frequencies: HashMap<String, u32> = HashMap::new();
    for round in rounds {
        let unique: HashSet<&str> = round
            .errors
            .iter()
            .map(|e| e.word.as_str())
            .filter(|w| !w.is_empty() && !EXCLUDED_WORDS.contains(w))
            .collect();
        for word in unique {
            *frequencies.entry(word.to_string()).or_insert(0) += 1;
        }
    }
    frequencies
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .take(TOP_MISTYPED_WORDS)
        .collect()
}

/// Unique mistyped words of the most recent round.
pub fn last_round_mistyped_words(rounds: &[RoundStatistic]) -> Vec<String> {
    let Some(last) = rounds.last() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    last.errors
        .iter()
        .map(|e| e.word.as_str())
        .filter(|w| !w.is_empty() && !EXCLUDED_WORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

/// Per-character error rates for the most recent round only.
pub fn last_round_error_rates(rounds: &[RoundStatistic]) -> HashMap<char, f64> {
    let Some(last) = rounds.last() else {
        return HashMap::new();
    };
    last.total_occurrences
        .iter()
        .filter(|(_, total)| **total > 0)
        .map(|(c, total)| {
            let mistakes = last.mistakes_made.get(c).copied().unwrap_or(0);
            (*c, mistakes as f64 / *total as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(id: u64, wpm: u32, accuracy: f64) -> RoundStatistic {
        RoundStatistic {
            id,
            timestamp: Utc::now(),
            wpm,
            gross_wpm: wpm + 5,
            accuracy,
            wpm_per_second: vec![],
            gross_wpm_per_second: vec![],
            errors: vec![],
            total_occurrences: HashMap::new(),
            mistakes_made: HashMap::new(),
            consistency: 0.0,
        }
    }

    fn error(word: &str) -> ErrorRecord {
        ErrorRecord {
            attempted: 'x',
            expected: 'y',
            word: word.to_string(),
        }
    }

    #[test]
    fn record_gates_on_accuracy() {
        let mut history = RoundHistory::new();
        assert!(!history.record(stat(0, 40, 50.0)));
        assert!(!history.record(stat(0, 40, 12.0)));
        assert!(history.record(stat(0, 40, 51.0)));
        assert_eq!(history.rounds().len(), 1);
        assert_eq!(history.rounds()[0].id, 1);
    }

    #[test]
    fn history_evicts_oldest_beyond_cap() {
        let mut history = RoundHistory::new();
        for _ in 0..(HISTORY_CAP + 5) {
            assert!(history.record(stat(0, 60, 95.0)));
        }
        assert_eq!(history.rounds().len(), HISTORY_CAP);
        // oldest entries are gone; ids keep increasing
        assert_eq!(history.rounds()[0].id, 6);
        assert_eq!(history.last().unwrap().id, (HISTORY_CAP + 5) as u64);
    }

    #[test]
    fn average_wpm_empty_history_is_zero() {
        let history = RoundHistory::new();
        assert_eq!(history.average_wpm_last_100(), 0.0);
    }

    #[test]
    fn average_wpm_over_recent_rounds() {
        let mut history = RoundHistory::new();
        assert!(history.record(stat(0, 40, 90.0)));
        assert!(history.record(stat(0, 60, 90.0)));
        assert_eq!(history.average_wpm_last_100(), 50.0);
    }

    #[test]
    fn heatmap_merges_case_insensitively() {
        let mut first = stat(1, 50, 90.0);
        first.total_occurrences = HashMap::from([('a', 10), ('b', 5)]);
        first.mistakes_made = HashMap::from([('a', 2)]);
        let mut second = stat(2, 50, 90.0);
        second.total_occurrences = HashMap::from([('A', 5), ('b', 5)]);
        second.mistakes_made = HashMap::from([('A', 1), ('b', 3)]);

        let merged = aggregate_heatmap(&[first, second]);
        assert_eq!(merged.total_occurrences[&'a'], 15);
        assert_eq!(merged.total_occurrences[&'b'], 10);
        assert_eq!(merged.mistakes_made[&'a'], 3);
        assert_eq!(merged.mistakes_made[&'b'], 3);

        let rates = error_rates(&merged);
        assert!((rates[&'a'] - 3.0 / 15.0).abs() < 1e-12);
    }

    #[test]
    fn top_mistyped_words_dedupes_within_round() {
        let mut first = stat(1, 50, 90.0);
        first.errors = vec![error("ship"), error("ship"), error("sail")];
        let mut second = stat(2, 50, 90.0);
        second.errors = vec![error("ship"), error("Space"), error(",")];

        let top = top_mistyped_words(&[first, second]);
        assert_eq!(top[0], ("ship".to_string(), 2));
        assert_eq!(top[1], ("sail".to_string(), 1));
        // sentinel and punctuation excluded
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn last_round_views_use_latest_round_only() {
        let mut first = stat(1, 50, 90.0);
        first.errors = vec![error("old")];
        let mut second = stat(2, 50, 90.0);
        second.errors = vec![error("new"), error("new")];
        second.total_occurrences = HashMap::from([('n', 4)]);
        second.mistakes_made = HashMap::from([('n', 1)]);

        let rounds = vec![first, second];
        assert_eq!(last_round_mistyped_words(&rounds), vec!["new".to_string()]);
        let rates = last_round_error_rates(&rounds);
        assert_eq!(rates[&'n'], 0.25);
    }

    #[test]
    fn round_statistic_json_roundtrip() {
        let mut s = stat(7, 80, 96.0);
        s.wpm_per_second = vec![55.0, 62.5];
        s.errors = vec![error("rigging")];
        s.total_occurrences = HashMap::from([('r', 3)]);
        s.mistakes_made = HashMap::from([('r', 1)]);

        let json = serde_json::to_string(&s).unwrap();
        let back: RoundStatistic = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
