use tracing::trace;

use crate::state::GameState;
use crate::statistics::ErrorRecord;
use crate::text;

/// A decoded key, after the input backend has translated its native event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Backspace,
    Shift,
    Control,
    Alt,
    Meta,
    CapsLock,
    Function(u8),
    Other,
}

/// One raw key-press event fed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: Key,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl KeyPress {
    pub fn char(c: char) -> Self {
        Self {
            key: Key::Char(c),
            ctrl: false,
            alt: false,
            meta: false,
        }
    }

    pub fn backspace() -> Self {
        Self {
            key: Key::Backspace,
            ctrl: false,
            alt: false,
            meta: false,
        }
    }

    /// Backspace with the word-delete modifier held.
    pub fn word_backspace() -> Self {
        Self {
            key: Key::Backspace,
            ctrl: true,
            alt: false,
            meta: false,
        }
    }
}

/// What one event did to the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystrokeOutcome {
    /// Modifier-only/function key, typing disabled, or out-of-bounds cursor.
    Ignored,
    /// Rejected by the force-correction policy; nothing changed.
    Blocked,
    /// Buffer and counters updated.
    Committed,
    /// Committed, and the round completion condition fired.
    Completed,
}

/// External collaborator notified after every committed keystroke so the
/// presentation layer can recalculate its scroll position.
pub trait ViewportObserver: Send {
    fn cursor_moved(&mut self, index: usize);
}

/// Consumes one key event at a time and maintains the typed buffer,
/// correctness state, and keystroke counters on the shared [`GameState`].
/// Events are processed strictly one at a time; nothing in here suspends.
#[derive(Default)]
pub struct KeystrokeEngine {
    observer: Option<Box<dyn ViewportObserver>>,
}

impl KeystrokeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: Box<dyn ViewportObserver>) -> Self {
        Self {
            observer: Some(observer),
        }
    }

    /// Process one raw key press. Never blocks and never fails: malformed
    /// input degrades to [`KeystrokeOutcome::Ignored`].
    pub fn handle_key(&mut self, state: &mut GameState, press: KeyPress) -> KeystrokeOutcome {
        if !state.typing_allowed {
            return KeystrokeOutcome::Ignored;
        }

        match press.key {
            Key::Backspace if press.ctrl => self.delete_last_word(state),
            Key::Backspace => self.delete_last_char(state),
            Key::Char(c) if !press.ctrl && !press.alt && !press.meta => self.type_char(state, c),
            // Modifier-only keys, function keys, and modified characters
            // carry no typing intent.
            _ => KeystrokeOutcome::Ignored,
        }
    }

    fn type_char(&mut self, state: &mut GameState, c: char) -> KeystrokeOutcome {
        if state.force_mistake_correction && state.has_mistake {
            return KeystrokeOutcome::Blocked;
        }

        let index = state.current_index;
        let Some(expected) = state.expected_char(index) else {
            // Cursor past the end of the text; nothing sensible to commit.
            trace!(index, "keystroke past end of text ignored");
            return KeystrokeOutcome::Ignored;
        };

        if c != expected {
            let word = text::word_at(&state.index_to_word, index)
                .unwrap_or(text::SPACE_WORD)
                .to_string();
            state.errors.push(ErrorRecord {
                attempted: c,
                expected,
                word,
            });
            state.has_mistake = true;
        }

        state.total_keystrokes += 1;
        state.typed.insert(index, c);

        let expected_lower = expected.to_lowercase().next().unwrap_or(expected);
        *state.total_occurrences.entry(expected_lower).or_insert(0) += 1;

        if c == expected {
            state.correct_keystrokes += 1;
            state.unique_correct_indices[index] = true;
        } else {
            *state.mistakes_made.entry(expected_lower).or_insert(0) += 1;
            state.unique_correct_indices[index] = false;
        }

        state.typed_indices.push(index);
        state.current_index += 1;
        self.notify(state.current_index);

        if state.current_index == state.text_len() {
            if state.no_end_without_correction {
                if state.progress_percent() >= 100.0 {
                    return KeystrokeOutcome::Completed;
                }
            } else {
                return KeystrokeOutcome::Completed;
            }
        }
        KeystrokeOutcome::Committed
    }

    fn delete_last_char(&mut self, state: &mut GameState) -> KeystrokeOutcome {
        if state.current_index > 0 {
            state.current_index -= 1;
            state.typed_indices.pop();
            state.typed.remove(&state.current_index);
            if let Some(flag) = state.unique_correct_indices.get_mut(state.current_index) {
                *flag = false;
            }
            self.notify(state.current_index);
        }

        // A delete may have removed the last outstanding mistake; recompute
        // from what is still committed.
        state.has_mistake = state.typed_indices.iter().any(|&i| {
            state.typed.get(&i).copied() != state.expected_char(i)
        });

        KeystrokeOutcome::Committed
    }

    fn delete_last_word(&mut self, state: &mut GameState) -> KeystrokeOutcome {
        // A space immediately behind the cursor is deleted on its own.
        if state.current_index > 0
            && state.expected_char(state.current_index - 1) == Some(' ')
        {
            return self.delete_last_char(state);
        }

        while state.current_index > 0
            && state.expected_char(state.current_index - 1) != Some(' ')
        {
            self.delete_last_char(state);
        }
        KeystrokeOutcome::Committed
    }

    fn notify(&mut self, index: usize) {
        if let Some(observer) = self.observer.as_mut() {
            observer.cursor_moved(index);
        }
    }
}
