use crate::game::{Mode, TypingGame};

/// Rendering hint for one processed keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Match; cursor advanced.
    Correct { ch: char },
    /// Mismatch in Challenge/Zen; cursor advanced. The glyph shown is the
    /// expected character, underlined when the expectation was a space.
    Incorrect { display: char, underline: bool },
    /// Mismatch in Learning; cursor held until the character is retyped.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSignal {
    SameLine,
    Wrapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Processed {
    pub outcome: KeyOutcome,
    pub line: LineSignal,
}

/// Judge one typed character against the cursor's expectation.
///
/// The only mutations are the cursor and the two per-character counters; a
/// mismatch records the *expected* character, which is what the frequency
/// table and accuracy metric are defined over. Returns `None` when the
/// cursor sits past the end of the buffer, which callers prevent by
/// extending the text first.
pub fn process_key(game: &mut TypingGame, typed: char, line_width: usize) -> Option<Processed> {
    let expected = game.expected_char()?;

    let outcome = if typed == expected {
        *game.correct_chars.entry(expected).or_insert(0) += 1;
        game.pos += 1;
        KeyOutcome::Correct { ch: expected }
    } else {
        *game.incorrect_chars.entry(expected).or_insert(0) += 1;
        match game.mode {
            Mode::Learning => KeyOutcome::Rejected,
            Mode::Challenge | Mode::Zen => {
                game.pos += 1;
                KeyOutcome::Incorrect {
                    display: if expected == ' ' { '_' } else { expected },
                    underline: expected == ' ',
                }
            }
        }
    };

    let advanced = !matches!(outcome, KeyOutcome::Rejected);
    let line = if advanced && line_width > 0 && game.pos % line_width == 0 {
        LineSignal::Wrapped
    } else {
        LineSignal::SameLine
    };

    Some(Processed { outcome, line })
}
