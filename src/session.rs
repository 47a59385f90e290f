use chrono::Utc;
use tracing::error;

use crate::game::{TypingGame, EXTEND_WORDS};
use crate::paginator::{Paginator, WindowError};
use crate::reducer::{self, KeyOutcome, LineSignal, Processed};
use crate::runtime::SessionEventSink;

/// One rendered character of the typed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedCell {
    pub ch: char,
    pub kind: CellKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Correct,
    Incorrect { underline: bool },
}

/// Event-sink implementation that accumulates what the typing screen needs:
/// one colored cell per judged character plus the finish notification.
/// Rejected keystrokes (Learning mode) leave no cell behind, so `cells`
/// always lines up with the session cursor.
#[derive(Debug, Default)]
pub struct TypedLog {
    pub cells: Vec<TypedCell>,
    pub wraps: usize,
    pub finished: Option<crate::game::SessionStats>,
}

impl SessionEventSink for TypedLog {
    fn on_key_processed(&mut self, outcome: KeyOutcome) {
        match outcome {
            KeyOutcome::Correct { ch } => self.cells.push(TypedCell {
                ch,
                kind: CellKind::Correct,
            }),
            KeyOutcome::Incorrect { display, underline } => self.cells.push(TypedCell {
                ch: display,
                kind: CellKind::Incorrect { underline },
            }),
            KeyOutcome::Rejected => {}
        }
    }

    fn on_line_wrap(&mut self) {
        self.wraps += 1;
    }

    fn on_session_finished(&mut self, stats: crate::game::SessionStats) {
        self.finished = Some(stats);
    }
}

/// Couples a game to its paginator and drives both from events. Keeps the
/// ordering guarantees in one place: the buffer is extended before the
/// cursor can approach its end, and wrap signals move the window.
#[derive(Debug)]
pub struct Session {
    pub game: TypingGame,
    pub paginator: Paginator,
}

impl Session {
    pub fn new(game: TypingGame, width_chars: usize) -> Self {
        let mut session = Self {
            game,
            paginator: Paginator::new(width_chars),
        };
        session.top_up();
        session
    }

    fn top_up(&mut self) {
        while self.paginator.needs_extension(self.game.text_char_len()) {
            self.game.extend_text(EXTEND_WORDS);
        }
    }

    /// Feed one typed character through the reducer. Starts the clock on the
    /// first keystroke, extends the buffer when the visible tail runs low,
    /// and notifies the sink of the outcome and any window movement.
    pub fn type_char(&mut self, c: char, sink: &mut dyn SessionEventSink) -> Option<Processed> {
        if self.game.is_finished() {
            return None;
        }
        if !self.game.in_progress && !self.game.start_or_resume() {
            return None;
        }
        self.top_up();

        let processed = reducer::process_key(&mut self.game, c, self.paginator.width_chars())?;
        sink.on_key_processed(processed.outcome);
        if processed.line == LineSignal::Wrapped {
            self.paginator.newline(self.game.pos);
            sink.on_line_wrap();
        }
        Some(processed)
    }

    /// Periodic timer callback. For bounded sessions past their duration
    /// this fires the single finish transition and reports final stats.
    /// Returns whether the session just finished.
    pub fn on_tick(&mut self, sink: &mut dyn SessionEventSink) -> bool {
        if !self.game.in_progress || self.game.duration_ms < 0 {
            return false;
        }
        let now = Utc::now();
        if self.game.live_elapsed_ms(now) as i64 > self.game.duration_ms
            && self.game.finish_or_pause_at(now)
        {
            sink.on_session_finished(self.game.stats());
            return true;
        }
        false
    }

    /// Pause an in-progress session (user stepped away or is ending it).
    pub fn pause(&mut self, sink: &mut dyn SessionEventSink) -> bool {
        if !self.game.finish_or_pause() {
            return false;
        }
        if self.game.is_finished() {
            sink.on_session_finished(self.game.stats());
        }
        true
    }

    pub fn resize(&mut self, width_chars: usize) {
        self.paginator.resize(width_chars);
        self.top_up();
    }

    /// Char range of text to draw. An error here means pagination and
    /// extension got out of sync; callers surface it, they do not clamp.
    pub fn visible_window(&self) -> Result<std::ops::Range<usize>, WindowError> {
        self.paginator
            .visible_window(self.game.text_char_len())
            .inspect_err(|e| error!(%e, "display window out of bounds"))
    }
}
