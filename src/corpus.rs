use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{KeelraceError, Result};
use crate::metrics::SlowWord;
use crate::text::SPACE_WORD;

/// Selection filter for word fetches.
#[derive(Debug, Clone, Copy)]
pub struct WordFilter {
    pub min_len: usize,
}

impl Default for WordFilter {
    fn default() -> Self {
        Self { min_len: 3 }
    }
}

/// Text/word corpus collaborator. Returns are opaque strings; the keystroke
/// engine's own splitter does the tokenizing.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn fetch_random_text(&self) -> Result<String>;
    async fn fetch_word_list(&self, filter: WordFilter) -> Result<Vec<String>>;
    async fn fetch_custom_text(&self) -> Result<String>;
}

const TEXTS: [&str; 4] = [
    "The old ship creaked as it cut through the waves, its sails full of wind and its crew full of songs about the sea.",
    "Charts and compasses mean little in a storm; what carries a crew home is steady hands and a captain who trusts them.",
    "Below deck the lanterns swung with the swell while the quartermaster counted barrels of fresh water for the long crossing.",
    "A lookout spends long hours alone, but the first sight of land after weeks at sea belongs to no one else.",
];

const WORDS: &str = "sea map rum keel deck mast crew wave tide sail rope wind hull bow cove reef gull salt helm dock \
anchor barrel cannon compass captain harbor island lagoon lantern lookout marina voyage sailor plunder treasure \
storm galley rudder bounty parrot cutlass skipper drift horizon current channel beacon breeze cargo charter";

/// Built-in corpus with embedded texts and words. Stands in for the remote
/// text service; also holds the player's custom practice text.
#[derive(Debug, Default)]
pub struct BuiltinCorpus {
    custom_text: Mutex<Option<String>>,
}

impl BuiltinCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_custom_text(&self, text: impl Into<String>) {
        *self.custom_text.lock().expect("corpus poisoned") = Some(text.into());
    }
}

#[async_trait]
impl TextSource for BuiltinCorpus {
    async fn fetch_random_text(&self) -> Result<String> {
        TEXTS
            .choose(&mut rand::thread_rng())
            .map(|t| t.to_string())
            .ok_or_else(|| KeelraceError::Corpus("no texts available".to_string()))
    }

    async fn fetch_word_list(&self, filter: WordFilter) -> Result<Vec<String>> {
        Ok(WORDS
            .split_whitespace()
            .filter(|w| w.len() >= filter.min_len)
            .map(str::to_string)
            .collect())
    }

    async fn fetch_custom_text(&self) -> Result<String> {
        self.custom_text
            .lock()
            .expect("corpus poisoned")
            .clone()
            .ok_or_else(|| KeelraceError::Corpus("no custom text set".to_string()))
    }
}

/// Pick `count` words at random (with replacement) from a pool.
pub fn pick_random_words<R: Rng>(pool: &[String], count: usize, rng: &mut R) -> Vec<String> {
    if pool.is_empty() {
        return Vec::new();
    }
    (0..count)
        .filter_map(|_| pool.choose(rng).cloned())
        .collect()
}

/// Roughen a word list for realistic practice: a 40 % chance to capitalize
/// each word and a 20 % chance to append punctuation.
pub fn apply_randomization<R: Rng>(words: Vec<String>, rng: &mut R) -> Vec<String> {
    const PUNCTUATION: [char; 5] = ['.', ',', '!', '?', ';'];
    words
        .into_iter()
        .map(|word| {
            let mut word = match word.chars().next() {
                Some(first) if rng.gen::<f64>() < 0.4 => {
                    first.to_uppercase().collect::<String>() + &word[first.len_utf8()..]
                }
                _ => word,
            };
            if rng.gen::<f64>() < 0.2 {
                if let Some(p) = PUNCTUATION.choose(rng) {
                    word.push(*p);
                }
            }
            word
        })
        .collect()
}

/// Error rate at which a character counts as problematic for training.
const PROBLEM_RATE: f64 = 0.1;

/// Build a "learn from mistakes" word set. Half the words are drawn from a
/// pool weighted toward the player's problematic characters, up to a
/// quarter each come from recent slow words and all-time top mistyped
/// words, and whatever is left is filled from the weighted pool again. The
/// result is shuffled so the sources mix.
pub fn generate_training_words<R: Rng>(
    pool: &[String],
    error_rates: &HashMap<char, f64>,
    slow_words: &[SlowWord],
    top_mistyped: &[(String, u32)],
    number_of_words: usize,
    rng: &mut R,
) -> Vec<String> {
    let problematic: Vec<char> = error_rates
        .iter()
        .filter(|(_, rate)| **rate >= PROBLEM_RATE)
        .map(|(c, _)| *c)
        .collect();

    // Every word appears once, plus once more per problematic character it
    // contains, so troublesome words dominate the draw.
    let mut weighted: Vec<&String> = Vec::new();
    for word in pool {
        let score = word.chars().filter(|c| problematic.contains(c)).count();
        for _ in 0..=score {
            weighted.push(word);
        }
    }

    let half = number_of_words / 2;
    let quarter = number_of_words / 4;

    let mut selected: Vec<String> = (0..half)
        .filter_map(|_| weighted.choose(rng).map(|w| (*w).clone()))
        .collect();

    let from_slow: Vec<String> = slow_words
        .iter()
        .filter(|s| s.word != SPACE_WORD)
        .map(|s| s.word.to_lowercase())
        .filter(|w| w.len() >= 3)
        .take(quarter)
        .collect();

    let from_mistyped: Vec<String> = top_mistyped
        .iter()
        .map(|(word, _)| word.to_lowercase())
        .filter(|w| w.len() >= 3)
        .take(quarter)
        .collect();

    let filler = number_of_words
        .saturating_sub(half + from_slow.len() + from_mistyped.len());
    let additional: Vec<String> = (0..filler)
        .filter_map(|_| weighted.choose(rng).map(|w| (*w).clone()))
        .collect();

    selected.extend(from_slow);
    selected.extend(from_mistyped);
    selected.extend(additional);
    selected.shuffle(rng);
    selected
}
