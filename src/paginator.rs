use std::ops::Range;
use thiserror::Error;

/// Lines of target text visible at once.
pub const VISIBLE_LINES: usize = 3;

/// Lines the cursor traverses before the window jumps forward.
const SCROLL_AFTER_LINES: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("visible window starts at {min_char_pos} but text is only {text_len} chars")]
pub struct WindowError {
    pub min_char_pos: usize,
    pub text_len: usize,
}

/// Decides which slice of the target text is visible.
///
/// The window starts at `min_char_pos` and holds `width_chars *
/// visible_lines` characters. Scrolling is jump-based: once the cursor has
/// moved two full lines into the window, the window advances by one line,
/// rather than scrolling per character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paginator {
    min_char_pos: usize,
    width_chars: usize,
    visible_lines: usize,
}

impl Paginator {
    pub fn new(width_chars: usize) -> Self {
        Self::with_lines(width_chars, VISIBLE_LINES)
    }

    pub fn with_lines(width_chars: usize, visible_lines: usize) -> Self {
        Self {
            min_char_pos: 0,
            width_chars: width_chars.max(1),
            visible_lines: visible_lines.max(1),
        }
    }

    pub fn min_char_pos(&self) -> usize {
        self.min_char_pos
    }

    pub fn width_chars(&self) -> usize {
        self.width_chars
    }

    pub fn capacity(&self) -> usize {
        self.width_chars * self.visible_lines
    }

    /// A terminal resize changes the line width; the window start stays put.
    pub fn resize(&mut self, width_chars: usize) {
        self.width_chars = width_chars.max(1);
    }

    /// True when the unconsumed tail of the buffer no longer fills the
    /// window; the session should extend its text before the next render.
    pub fn needs_extension(&self, text_len: usize) -> bool {
        text_len.saturating_sub(self.min_char_pos) < self.capacity()
    }

    /// Char range of the text currently on screen. A window start past the
    /// end of the buffer means extension was skipped somewhere; that is a
    /// bug and is reported, never clamped silently.
    pub fn visible_window(&self, text_len: usize) -> Result<Range<usize>, WindowError> {
        if self.min_char_pos > text_len {
            return Err(WindowError {
                min_char_pos: self.min_char_pos,
                text_len,
            });
        }
        let end = (self.min_char_pos + self.capacity()).min(text_len);
        Ok(self.min_char_pos..end)
    }

    /// Called when the cursor wraps onto a new visual line. Advances the
    /// window by one line once the cursor is `SCROLL_AFTER_LINES` lines in;
    /// returns whether the window moved.
    pub fn newline(&mut self, cursor: usize) -> bool {
        if cursor >= self.min_char_pos + SCROLL_AFTER_LINES * self.width_chars {
            self.min_char_pos += self.width_chars;
            true
        } else {
            false
        }
    }
}
