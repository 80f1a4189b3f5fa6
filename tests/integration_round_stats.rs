use std::collections::HashMap;

use chrono::Utc;
use keelrace::metrics::{self, SlowWord};
use keelrace::profile::{persist_round, ProfileStore};
use keelrace::statistics::{
    aggregate_heatmap, error_rates, top_mistyped_words, ErrorRecord, RoundHistory,
    RoundStatistic,
};
use keelrace::stats_db::StatsDb;

fn round(wpm: u32, errors: Vec<ErrorRecord>) -> RoundStatistic {
    RoundStatistic {
        id: 0,
        timestamp: Utc::now(),
        wpm,
        gross_wpm: wpm + 6,
        accuracy: 92.0,
        wpm_per_second: vec![wpm as f64 - 5.0, wpm as f64 + 5.0],
        gross_wpm_per_second: vec![wpm as f64, wpm as f64 + 10.0],
        errors,
        total_occurrences: HashMap::from([('s', 6), ('a', 4)]),
        mistakes_made: HashMap::from([('s', 1)]),
        consistency: 9.5,
    }
}

fn mistake(word: &str) -> ErrorRecord {
    ErrorRecord {
        attempted: 'z',
        expected: 's',
        word: word.to_string(),
    }
}

// Guest flow: stats written to the local database come back field for
// field and seed the same aggregate views a fresh session would compute.
#[tokio::test]
async fn guest_round_stats_survive_storage_and_reaggregate() {
    let dir = tempfile::tempdir().unwrap();
    let db = StatsDb::with_path(dir.path().join("stats.db")).unwrap();

    let first = round(58, vec![mistake("sail"), mistake("sail")]);
    let second = round(64, vec![mistake("sail"), mistake("storm")]);
    db.append_round_stat("guest", &first).await.unwrap();
    db.append_round_stat("guest", &second).await.unwrap();

    let restored = db.get_recent_round_stats("guest", 100).await.unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored[0].wpm_per_second, first.wpm_per_second);
    assert_eq!(restored[1].errors, second.errors);

    // Seed a history from storage, as a returning session does.
    let mut history = RoundHistory::new();
    history.seed(restored);
    assert!((history.average_wpm_last_100() - 61.0).abs() < 1e-9);

    // "sail" was fumbled in both rounds but counts once per round.
    let top = top_mistyped_words(history.rounds());
    assert_eq!(top[0], ("sail".to_string(), 2));
    assert_eq!(top[1], ("storm".to_string(), 1));

    let heatmap = aggregate_heatmap(history.rounds());
    assert_eq!(heatmap.total_occurrences[&'s'], 12);
    assert_eq!(heatmap.mistakes_made[&'s'], 2);
    let rates = error_rates(&heatmap);
    assert!((rates[&'s'] - 2.0 / 12.0).abs() < 1e-9);
}

// The full post-round persistence path against the sqlite store: buckets,
// counters, last-round series, and slow words all land on the profile.
#[tokio::test]
async fn persist_round_flows_into_guest_profile() {
    let dir = tempfile::tempdir().unwrap();
    let db = StatsDb::with_path(dir.path().join("stats.db")).unwrap();

    let stat = round(73, vec![mistake("anchor")]);
    let slow = vec![SlowWord {
        word: "anchor".to_string(),
        wpm: 22.0,
    }];
    persist_round(&db, "guest", &stat, 45_000, &slow).await;
    persist_round(&db, "guest", &round(81, vec![]), 30_000, &[]).await;

    let profile = db.get_profile("guest").await.unwrap();
    assert_eq!(profile.games_played, 2);
    assert_eq!(profile.time_played_ms, 75_000);
    assert_eq!(profile.wpm_buckets[metrics::wpm_bucket_index(73.0)], 1);
    assert_eq!(profile.wpm_buckets[metrics::wpm_bucket_index(81.0)], 1);
    assert_eq!(
        profile.accuracy_buckets[metrics::accuracy_bucket_index(92.0)],
        2
    );
    // last-round fields reflect the most recent round only
    assert_eq!(profile.last_round_wpm, vec![76.0, 86.0]);
    assert!(profile.last_slow_words.is_empty());
    // all-time slow words keep the earlier round's entry
    assert_eq!(profile.all_time_slow_words, slow);

    let rounds = db.get_recent_round_stats("guest", 100).await.unwrap();
    assert_eq!(rounds.len(), 2);
}

// The slow-word pipeline from raw samples to the persisted cap.
#[test]
fn slow_word_pipeline_respects_threshold_and_cap() {
    let words_per_second = vec![
        vec!["the".to_string(), "old".to_string()],
        vec!["old".to_string(), "ship".to_string()],
        vec!["creaked".to_string()],
    ];
    // seconds 1 and 2 fall under the trailing average of 45
    let wpm_per_second = vec![50.0, 20.0, 30.0];

    let slow = metrics::identify_slow_words(&words_per_second, &wpm_per_second, 45.0);
    let names: Vec<&str> = slow.iter().map(|s| s.word.as_str()).collect();
    assert_eq!(names, vec!["old", "ship", "creaked"]);

    let mut all_time: Vec<SlowWord> = (0..99)
        .map(|i| SlowWord {
            word: format!("w{i}"),
            wpm: 30.0,
        })
        .collect();
    all_time = metrics::merge_slow_words(all_time, &slow);
    assert_eq!(all_time.len(), metrics::SLOW_WORDS_CAP);
    assert_eq!(all_time.last().unwrap().word, "creaked");
    assert_eq!(all_time[0].word, "w2");
}
