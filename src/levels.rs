//! Campaign level tables and game constants.

/// Number of campaign levels.
pub const LEVELS: u32 = 15;

/// Countdown length in seconds before every round.
pub const DEFAULT_COUNTDOWN_VALUE: u32 = 3;

/// Maximum number of players in an online race.
pub const MAX_PLAYERS: usize = 3;

/// Campaign rounds per level (best of 3).
pub const MAX_ROUNDS: u32 = 3;

/// Lives each side starts a campaign level with.
pub const STARTING_LIVES: u32 = 2;

/// Flat coin reward for winning an online race.
pub const PVP_WIN_COINS: u32 = 10;

/// Rank titles indexed by levels cleared (0 = none cleared).
pub const RANKS: [&str; 16] = [
    "Landlubber",
    "Deck Hand",
    "Swabbie",
    "Lookout",
    "Powder Monkey",
    "Gunner's Mate",
    "Boatswain",
    "Helmsman",
    "Quartermaster",
    "Ship's Surgeon",
    "First Mate",
    "Master Gunner",
    "Sailing Master",
    "Captain's Advisor",
    "Pirate Captain",
    "Dread Pirate",
];

/// Computer opponent WPM for a campaign level (level 1 = 20 WPM, +10 per
/// level up to 160).
pub fn opponent_wpm(level: u32) -> Option<u32> {
    if (1..=LEVELS).contains(&level) {
        Some(10 + level * 10)
    } else {
        None
    }
}

/// Coin reward for clearing a campaign level.
pub fn winnings(level: u32) -> u32 {
    opponent_wpm(level).unwrap_or(0)
}

/// Rank title for a player whose highest unlocked level is `last_unlocked`.
/// A fresh account has unlocked level 1 and no cleared levels.
pub fn rank_for_unlocked(last_unlocked: u32) -> &'static str {
    let cleared = last_unlocked.saturating_sub(1) as usize;
    RANKS[cleared.min(RANKS.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opponent_wpm_table() {
        assert_eq!(opponent_wpm(1), Some(20));
        assert_eq!(opponent_wpm(5), Some(60));
        assert_eq!(opponent_wpm(15), Some(160));
        assert_eq!(opponent_wpm(0), None);
        assert_eq!(opponent_wpm(16), None);
    }

    #[test]
    fn winnings_match_level_wpm() {
        assert_eq!(winnings(1), 20);
        assert_eq!(winnings(15), 160);
        assert_eq!(winnings(99), 0);
    }

    #[test]
    fn ranks_track_cleared_levels() {
        assert_eq!(rank_for_unlocked(1), "Landlubber");
        assert_eq!(rank_for_unlocked(2), "Deck Hand");
        assert_eq!(rank_for_unlocked(16), "Dread Pirate");
        assert_eq!(rank_for_unlocked(99), "Dread Pirate");
    }
}
