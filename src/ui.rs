use itertools::Itertools;
use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget, Wrap},
};
use unicode_width::UnicodeWidthStr;

use simplytype::config::Theme;
use simplytype::session::CellKind;

use crate::{App, AppState};

pub(crate) const HORIZONTAL_MARGIN: u16 = 5;

struct Palette {
    correct: Color,
    incorrect: Color,
    untyped: Color,
    accent: Color,
}

fn palette(theme: Theme) -> Palette {
    match theme {
        Theme::Dark => Palette {
            correct: Color::Green,
            incorrect: Color::Red,
            untyped: Color::DarkGray,
            accent: Color::Magenta,
        },
        Theme::Light => Palette {
            correct: Color::Blue,
            incorrect: Color::Red,
            untyped: Color::Gray,
            accent: Color::Magenta,
        },
    }
}

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        match self.state {
            AppState::Typing => render_typing(self, area, buf),
            AppState::Results => render_results(self, area, buf),
        }
    }
}

fn render_typing(app: &App, area: Rect, buf: &mut Buffer) {
    let colors = palette(app.theme);
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let correct_style = Style::default().patch(bold).fg(colors.correct);
    let incorrect_style = Style::default().patch(bold).fg(colors.incorrect);
    let untyped_style = Style::default().fg(colors.untyped);

    let window = match app.session.visible_window() {
        Ok(window) => window,
        Err(e) => {
            // A window error is a pagination bug; make it loud instead of
            // drawing garbage.
            let msg = Paragraph::new(Span::styled(
                format!("display error: {e}"),
                incorrect_style,
            ))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
            msg.render(area, buf);
            return;
        }
    };

    let pos = app.session.game.pos;
    let text_chars: Vec<char> = app.session.game.text.chars().collect();

    // Typed region first (colored per recorded outcome), untyped remainder
    // after, both restricted to the visible window.
    let mut spans: Vec<Span> = Vec::with_capacity(window.len());
    for idx in window.clone() {
        // Characters judged before this process started (a resumed session)
        // have no display cell; show them dimmed rather than recolored.
        match app.display.cells.get(idx) {
            Some(cell) if idx < pos => {
                let style = match cell.kind {
                    CellKind::Correct => correct_style,
                    CellKind::Incorrect { underline: true } => {
                        incorrect_style.add_modifier(Modifier::UNDERLINED)
                    }
                    CellKind::Incorrect { underline: false } => incorrect_style,
                };
                spans.push(Span::styled(cell.ch.to_string(), style));
            }
            _ => spans.push(Span::styled(text_chars[idx].to_string(), untyped_style)),
        }
    }

    let width = area.width.saturating_sub(HORIZONTAL_MARGIN * 2).max(1);
    let occupied = (spans.iter().map(|s| s.content.width()).sum::<usize>() as f64
        / width as f64)
        .ceil() as u16;

    let countdown_lines = if app.countdown.is_empty() { 0 } else { 2 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints(
            [
                Constraint::Length((area.height.saturating_sub(occupied)) / 2),
                Constraint::Length(countdown_lines),
                Constraint::Length(occupied.max(1)),
                Constraint::Min(1),
            ]
            .as_ref(),
        )
        .split(area);

    if countdown_lines > 0 {
        let label = Paragraph::new(Span::styled(
            app.countdown.clone(),
            Style::default().fg(colors.accent),
        ))
        .alignment(Alignment::Center);
        label.render(chunks[1], buf);
    }

    let prompt = Paragraph::new(Line::from(spans))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: false });
    prompt.render(chunks[2], buf);

    let hint = if app.session.game.started_at.is_none() {
        "begin typing to start · esc to quit"
    } else {
        "esc to pause · tab for a new session"
    };
    let hint = Paragraph::new(Span::styled(
        hint,
        Style::default()
            .fg(colors.untyped)
            .add_modifier(Modifier::ITALIC),
    ))
    .alignment(Alignment::Center);
    hint.render(chunks[3], buf);
}

fn render_results(app: &App, area: Rect, buf: &mut Buffer) {
    let colors = palette(app.theme);
    let stats = app.session.game.stats();

    let mut lines: Vec<Line> = vec![
        Line::from(Span::styled(
            format!("{:.0} wpm", stats.wpm),
            Style::default()
                .fg(colors.accent)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(match stats.accuracy {
            Some(acc) => format!("{:.0}% accuracy", acc * 100.0),
            None => "no characters typed".to_string(),
        }),
        Line::from(format!(
            "{} words in {:.1}s",
            stats.word_count,
            stats.elapsed_ms as f64 / 1000.0
        )),
    ];

    if !stats.incorrect_chars.is_empty() {
        let worst = stats
            .incorrect_chars
            .iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
            .take(5)
            .map(|(c, n)| {
                let shown = if *c == ' ' { "space".to_string() } else { c.to_string() };
                format!("{shown}×{n}")
            })
            .join("  ");
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("missed: {worst}"),
            Style::default().fg(colors.incorrect),
        )));
    }

    if !app.history.is_empty() {
        let wpms: Vec<f64> = app.history.iter().map(|row| row.wpm).collect();
        let mean = wpms.iter().sum::<f64>() / wpms.len() as f64;
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("{} past sessions · {:.0} wpm average", app.history.len(), mean),
            Style::default().fg(colors.untyped),
        )));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "(tab) new session · (esc) quit",
        Style::default()
            .fg(colors.untyped)
            .add_modifier(Modifier::ITALIC),
    )));

    let body = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

    let vertical_pad = area.height.saturating_sub(9) / 2;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(vertical_pad), Constraint::Min(9)].as_ref())
        .split(area);
    body.render(chunks[1], buf);
}
