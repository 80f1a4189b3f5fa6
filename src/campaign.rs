use tracing::{debug, info, warn};

use crate::levels::{self, LEVELS, PVP_WIN_COINS};
use crate::profile::{ProfilePatch, ProfileStore};
use crate::state::GameState;

/// Simulated computer opponent. Progress is driven by a fixed-rate 100 ms
/// tick, not by input: each tick advances by the share of the text a typist
/// at the configured WPM covers in a tenth of a second.
#[derive(Debug, Clone)]
pub struct OpponentSim {
    wpm: u32,
    progress: f64,
}

impl OpponentSim {
    pub fn new(wpm: u32) -> Self {
        Self { wpm, progress: 0.0 }
    }

    pub fn wpm(&self) -> u32 {
        self.wpm
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Advance one tick against a text of `text_len` characters. Returns
    /// true once progress reaches 100 (clamped there exactly).
    pub fn tick(&mut self, text_len: usize) -> bool {
        if text_len == 0 {
            return false;
        }
        // wpm * 5 chars per word, scaled to percent, over ticks of 1/600
        // of a minute.
        let increment = self.wpm as f64 * 5.0 * 100.0 / (text_len as f64 * 600.0);
        self.progress = (self.progress + increment).min(100.0);
        self.progress >= 100.0
    }

    pub fn reset(&mut self) {
        self.progress = 0.0;
    }
}

/// Result of one campaign round, from the player's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundResult {
    Won,
    Lost,
    Tie,
}

/// Compare round WPM against the opponent's level WPM.
pub fn round_result(wpm: u32, opponent_wpm: u32) -> RoundResult {
    match wpm.cmp(&opponent_wpm) {
        std::cmp::Ordering::Greater => RoundResult::Won,
        std::cmp::Ordering::Less => RoundResult::Lost,
        std::cmp::Ordering::Equal => RoundResult::Tie,
    }
}

/// Apply the round result to the life counters: the loser drops a life, a
/// tie costs both sides one.
pub fn update_lives_after_round(state: &mut GameState, wpm: u32, opponent_wpm: u32) {
    match round_result(wpm, opponent_wpm) {
        RoundResult::Won => state.opponent_lives = state.opponent_lives.saturating_sub(1),
        RoundResult::Lost => state.player_lives = state.player_lives.saturating_sub(1),
        RoundResult::Tie => {
            state.player_lives = state.player_lives.saturating_sub(1);
            state.opponent_lives = state.opponent_lives.saturating_sub(1);
        }
    }
    debug!(
        player_lives = state.player_lives,
        opponent_lives = state.opponent_lives,
        "lives updated after round"
    );
}

/// A campaign level ends when either side is out of lives or the round
/// counter has reached the configured maximum. Never by round count alone
/// while both sides still hold lives below the cap.
pub fn level_finished(state: &GameState, max_rounds: u32) -> bool {
    state.player_lives == 0 || state.opponent_lives == 0 || state.current_round == max_rounds
}

/// Outcome of a finished level, decided by comparing life counts the moment
/// the end condition fires. Equal lives at the round cap is a loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Win,
    Loss,
}

pub fn game_outcome(state: &GameState) -> GameOutcome {
    if state.player_lives > state.opponent_lives {
        GameOutcome::Win
    } else {
        GameOutcome::Loss
    }
}

impl GameOutcome {
    /// End-of-level banner text.
    pub fn message(&self) -> &'static str {
        match self {
            GameOutcome::Win => "You won the game!",
            GameOutcome::Loss => "Game over!",
        }
    }
}

/// The player's account as known to this client. `user_id` is `None` for
/// guests, who have no remote row to desync from.
#[derive(Debug, Clone, Default)]
pub struct PlayerAccount {
    pub user_id: Option<String>,
    pub coins: u32,
    pub last_unlocked_level: u32,
}

impl PlayerAccount {
    pub fn guest() -> Self {
        Self {
            user_id: None,
            coins: 0,
            last_unlocked_level: 1,
        }
    }

    pub fn rank(&self) -> &'static str {
        levels::rank_for_unlocked(self.last_unlocked_level)
    }
}

/// What reward application managed to do; consumers use this to decide
/// whether to refresh their views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewardOutcome {
    pub unlock_committed: bool,
    pub coins_refreshed: bool,
}

/// Apply the spoils of a cleared level: unlock the next one and award the
/// level's coins.
///
/// Logged-in path: the unlock is persisted first and committed to local
/// state only if the store reports success; the coin update is persisted
/// independently and, on success, coins are refreshed from the store. A
/// failure of either call never blocks the other. Guest path: both updates
/// land directly on the local account.
pub async fn handle_level_win<S: ProfileStore + ?Sized>(
    store: &S,
    account: &mut PlayerAccount,
    level: u32,
) -> RewardOutcome {
    award(store, account, levels::winnings(level), Some(level)).await
}

/// Flat reward for winning an online race; no level unlock involved.
pub async fn handle_race_win<S: ProfileStore + ?Sized>(
    store: &S,
    account: &mut PlayerAccount,
) -> RewardOutcome {
    award(store, account, PVP_WIN_COINS, None).await
}

async fn award<S: ProfileStore + ?Sized>(
    store: &S,
    account: &mut PlayerAccount,
    coins: u32,
    unlock_after_level: Option<u32>,
) -> RewardOutcome {
    let mut outcome = RewardOutcome::default();
    let new_coins = account.coins + coins;
    let next_level = unlock_after_level
        .filter(|level| *level < LEVELS)
        .map(|level| level + 1);

    let Some(user_id) = account.user_id.clone() else {
        // Guests keep everything locally.
        account.coins = new_coins;
        if let Some(next) = next_level {
            account.last_unlocked_level = next;
            outcome.unlock_committed = true;
        }
        outcome.coins_refreshed = true;
        return outcome;
    };

    if let Some(next) = next_level {
        let patch = ProfilePatch {
            last_unlocked_level: Some(next),
            ..ProfilePatch::default()
        };
        match store.update_profile(&user_id, patch).await {
            Ok(()) => {
                account.last_unlocked_level = next;
                outcome.unlock_committed = true;
                info!(level = next, "unlocked next level");
            }
            Err(err) => warn!(%err, "failed to persist unlocked level"),
        }
    }

    let patch = ProfilePatch {
        coins: Some(new_coins),
        ..ProfilePatch::default()
    };
    match store.update_profile(&user_id, patch).await {
        Ok(()) => match store.get_profile(&user_id).await {
            Ok(profile) => {
                account.coins = profile.coins;
                outcome.coins_refreshed = true;
            }
            Err(err) => warn!(%err, "failed to refresh coins after update"),
        },
        Err(err) => warn!(%err, "failed to persist coins"),
    }

    outcome
}

/// Gate and apply end-of-level progression. Returns `None` while the level
/// is still running. Rewards only apply when the level just played is the
/// account's highest unlocked one; replaying a cleared level grants nothing
/// regardless of outcome.
pub async fn apply_game_progress<S: ProfileStore + ?Sized>(
    store: &S,
    account: &mut PlayerAccount,
    state: &GameState,
    level: u32,
    max_rounds: u32,
) -> Option<(GameOutcome, RewardOutcome)> {
    if !level_finished(state, max_rounds) {
        return None;
    }

    let outcome = game_outcome(state);
    let reward = if level == account.last_unlocked_level && outcome == GameOutcome::Win {
        handle_level_win(store, account, level).await
    } else {
        if outcome == GameOutcome::Win {
            debug!(level, "replayed level, no progress applied");
        }
        RewardOutcome::default()
    };
    Some((outcome, reward))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::MemoryStore;

    fn campaign_state(player_lives: u32, opponent_lives: u32, round: u32) -> GameState {
        let mut state = GameState::new();
        state.player_lives = player_lives;
        state.opponent_lives = opponent_lives;
        state.current_round = round;
        state
    }

    #[test]
    fn opponent_progress_per_tick_formula() {
        let mut sim = OpponentSim::new(60);
        // 60 wpm, 100-char text: 60*5*100/(100*600) = 0.5 percent per tick
        sim.tick(100);
        assert!((sim.progress() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn opponent_clamps_at_exactly_hundred() {
        let mut sim = OpponentSim::new(200);
        let mut finished = false;
        for _ in 0..3 {
            finished = sim.tick(5);
        }
        assert!(finished);
        assert_eq!(sim.progress(), 100.0);
    }

    #[test]
    fn opponent_ignores_empty_text() {
        let mut sim = OpponentSim::new(200);
        assert!(!sim.tick(0));
        assert_eq!(sim.progress(), 0.0);
    }

    #[test]
    fn lives_follow_round_result() {
        let mut state = campaign_state(2, 2, 1);
        update_lives_after_round(&mut state, 50, 40);
        assert_eq!((state.player_lives, state.opponent_lives), (2, 1));

        update_lives_after_round(&mut state, 30, 40);
        assert_eq!((state.player_lives, state.opponent_lives), (1, 1));

        update_lives_after_round(&mut state, 40, 40);
        assert_eq!((state.player_lives, state.opponent_lives), (0, 0));
    }

    #[test]
    fn level_runs_to_max_rounds_while_lives_remain() {
        // winner of rounds 1 and 2 hasn't emptied anyone: round 3 still runs
        let state = campaign_state(2, 1, 2);
        assert!(!level_finished(&state, 3));
        let state = campaign_state(2, 1, 3);
        assert!(level_finished(&state, 3));
    }

    #[test]
    fn lives_reaching_zero_end_level_early() {
        // loss in round 1, tie in round 2: player at 0 with round 2 of 3
        let mut state = campaign_state(2, 2, 1);
        update_lives_after_round(&mut state, 30, 40);
        state.current_round = 2;
        update_lives_after_round(&mut state, 40, 40);

        assert_eq!((state.player_lives, state.opponent_lives), (0, 1));
        assert!(level_finished(&state, 3));
        assert_eq!(game_outcome(&state), GameOutcome::Loss);
        assert_eq!(game_outcome(&state).message(), "Game over!");
    }

    #[test]
    fn equal_lives_at_round_cap_is_a_loss() {
        let state = campaign_state(1, 1, 3);
        assert!(level_finished(&state, 3));
        assert_eq!(game_outcome(&state), GameOutcome::Loss);
    }

    #[tokio::test]
    async fn guest_rewards_apply_locally() {
        let store = MemoryStore::new();
        let mut account = PlayerAccount::guest();

        let outcome = handle_level_win(&store, &mut account, 1).await;
        assert_eq!(account.coins, 20);
        assert_eq!(account.last_unlocked_level, 2);
        assert!(outcome.unlock_committed);
        assert_eq!(account.rank(), "Deck Hand");
    }

    #[tokio::test]
    async fn logged_in_rewards_commit_after_persistence() {
        let store = MemoryStore::new();
        let mut account = PlayerAccount {
            user_id: Some("p1".to_string()),
            coins: 0,
            last_unlocked_level: 3,
        };

        let outcome = handle_level_win(&store, &mut account, 3).await;
        assert!(outcome.unlock_committed);
        assert!(outcome.coins_refreshed);
        assert_eq!(account.last_unlocked_level, 4);
        assert_eq!(account.coins, 40);

        let profile = store.get_profile("p1").await.unwrap();
        assert_eq!(profile.last_unlocked_level, 4);
        assert_eq!(profile.coins, 40);
    }

    #[tokio::test]
    async fn unlock_failure_does_not_block_coin_award() {
        let store = MemoryStore::new();
        let mut account = PlayerAccount {
            user_id: Some("p1".to_string()),
            coins: 10,
            last_unlocked_level: 2,
        };

        store.fail_next_updates(1);
        let outcome = handle_level_win(&store, &mut account, 2).await;

        // Unlock stayed put locally, coins still landed and refreshed.
        assert!(!outcome.unlock_committed);
        assert!(outcome.coins_refreshed);
        assert_eq!(account.last_unlocked_level, 2);
        assert_eq!(account.coins, 40);
    }

    #[tokio::test]
    async fn final_level_win_awards_coins_without_unlock() {
        let store = MemoryStore::new();
        let mut account = PlayerAccount::guest();
        account.last_unlocked_level = LEVELS;

        let outcome = handle_level_win(&store, &mut account, LEVELS).await;
        assert!(!outcome.unlock_committed);
        assert_eq!(account.coins, 160);
        assert_eq!(account.last_unlocked_level, LEVELS);
    }

    #[tokio::test]
    async fn replayed_level_grants_no_progress() {
        let store = MemoryStore::new();
        let mut account = PlayerAccount::guest();
        account.last_unlocked_level = 5;

        // won a level that was cleared long ago
        let state = campaign_state(2, 0, 2);
        let (outcome, reward) = apply_game_progress(&store, &mut account, &state, 3, 3)
            .await
            .unwrap();
        assert_eq!(outcome, GameOutcome::Win);
        assert_eq!(reward, RewardOutcome::default());
        assert_eq!(account.coins, 0);
        assert_eq!(account.last_unlocked_level, 5);
    }

    #[tokio::test]
    async fn progress_not_applied_mid_level() {
        let store = MemoryStore::new();
        let mut account = PlayerAccount::guest();
        let state = campaign_state(2, 1, 1);
        assert!(apply_game_progress(&store, &mut account, &state, 1, 3)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn race_win_awards_flat_coins() {
        let store = MemoryStore::new();
        let mut account = PlayerAccount::guest();
        handle_race_win(&store, &mut account).await;
        assert_eq!(account.coins, PVP_WIN_COINS);
    }
}
