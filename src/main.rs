mod ui;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{error::ErrorKind, CommandFactory, Parser};
use crossterm::{
    event::{KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::io::{self, stdin};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use simplytype::{
    config::{resolve_options, ConfigStore, ExplicitOptions, FileConfigStore, ResolvedOptions, Theme},
    game::{Mode, TypingGame},
    logging,
    runtime::{
        CrosstermEventSource, FixedTicker, GenerationCounter, GenerationToken, Runner,
        SessionEvent,
    },
    session::{Session, TypedLog},
    store::{GameStatsRow, GameStore, StoreError},
    wordset::Wordset,
};

const TICK_RATE_MS: u64 = 100;

/// terminal typing practice with wordset sampling and session history
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Terminal typing practice. Wordsets live in a local SQLite store; sessions are seeded, pausable, and saved so history and per-character accuracy survive restarts."
)]
pub struct Cli {
    /// wordset name to load from the store
    #[clap(short = 'w', long)]
    wordset: Option<String>,

    /// wordset id to load from the store
    #[clap(long)]
    wordset_id: Option<i64>,

    /// wordset file to type from directly, bypassing the store
    #[clap(short = 'f', long)]
    wordset_file: Option<PathBuf>,

    /// game mode
    #[clap(short = 'm', long, value_enum)]
    mode: Option<Mode>,

    /// session duration in seconds (challenge mode)
    #[clap(short = 'd', long)]
    duration_secs: Option<i64>,

    /// sampling seed for reproducible sessions
    #[clap(short = 's', long)]
    seed: Option<u64>,

    /// database path override
    #[clap(long)]
    db: Option<PathBuf>,

    /// load a wordset file into the store, print its id, and exit
    #[clap(long)]
    import_wordset: Option<PathBuf>,

    /// list stored wordsets and exit
    #[clap(long)]
    list_wordsets: bool,
}

impl Cli {
    fn to_explicit_options(&self) -> ExplicitOptions {
        ExplicitOptions {
            wordset_name: self.wordset.clone(),
            wordset_id: self.wordset_id,
            mode: self.mode,
            duration_secs: self.duration_secs,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Typing,
    Results,
}

#[derive(Debug)]
pub struct App {
    pub session: Session,
    pub display: TypedLog,
    pub state: AppState,
    pub theme: Theme,
    pub countdown: String,
    pub history: Vec<GameStatsRow>,
    options: ResolvedOptions,
    wordset: Arc<Wordset>,
    generations: GenerationCounter,
    deadline_token: GenerationToken,
}

impl App {
    pub fn new(wordset: Arc<Wordset>, options: ResolvedOptions, width_chars: usize) -> Self {
        let game = TypingGame::new(
            wordset.clone(),
            options.seed,
            options.mode,
            options.duration_ms,
        );
        let mut generations = GenerationCounter::default();
        let deadline_token = generations.bump();
        Self {
            session: Session::new(game, width_chars),
            display: TypedLog::default(),
            state: AppState::Typing,
            theme: options.theme,
            countdown: String::new(),
            history: Vec::new(),
            options,
            wordset,
            generations,
            deadline_token,
        }
    }

    /// Fresh session with a fresh seed and a fresh timer generation; a tick
    /// armed for the previous session can no longer finish this one.
    pub fn reset(&mut self) {
        self.deadline_token = self.generations.bump();
        let game = TypingGame::new(
            self.wordset.clone(),
            rand::random(),
            self.options.mode,
            self.options.duration_ms,
        );
        let width = self.session.paginator.width_chars();
        self.session = Session::new(game, width);
        self.display = TypedLog::default();
        self.countdown.clear();
        self.state = AppState::Typing;
    }

    fn update_countdown(&mut self) {
        self.countdown = match self.session.game.remaining_ms(Utc::now()) {
            Some(ms) if self.session.game.in_progress => ms.div_ceil(1000).to_string(),
            _ => String::new(),
        };
    }

    fn load_history(&mut self, store: &GameStore) {
        match store.aggregate_game_stats(None) {
            Ok(rows) => self.history = rows,
            Err(err) => error!(%err, "failed to load history"),
        }
    }
}

fn line_width(terminal_width: u16) -> usize {
    terminal_width
        .saturating_sub(ui::HORIZONTAL_MARGIN * 2)
        .max(1) as usize
}

/// Individual save failures are reported and survived; the session keeps
/// running with whatever was last written.
fn persist(store: &GameStore, game: &mut TypingGame) {
    let Some(snapshot) = game.snapshot() else {
        return;
    };
    match store.insert_or_update_game(&snapshot) {
        Ok(id) => game.id = Some(id),
        Err(err) => error!(%err, "failed to save game"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = logging::init() {
        eprintln!("warning: file logging disabled: {err:#}");
    }

    // Schema creation failures are fatal at startup; nothing downstream can
    // work without the store.
    let mut store = match &cli.db {
        Some(path) => GameStore::open(path),
        None => GameStore::open_default(),
    }
    .context("opening game store")?;

    if let Some(path) = &cli.import_wordset {
        let ws = Wordset::from_file(path).context("reading wordset file")?;
        let id = store.insert_wordset(&ws).context("storing wordset")?;
        println!("imported wordset {} as id {id}", ws.name);
        return Ok(());
    }

    if cli.list_wordsets {
        for id in store.list_wordset_ids().context("listing wordsets")? {
            let ws = store
                .find_wordset(&simplytype::store::WordsetKey::Id(id))
                .context("loading wordset")?;
            println!("{id}\t{ws}");
        }
        return Ok(());
    }

    let stored = FileConfigStore::new().load();
    let options = resolve_options(&cli.to_explicit_options(), &stored, rand::random());

    let wordset = if let Some(path) = &cli.wordset_file {
        Arc::new(Wordset::from_file(path).context("reading wordset file")?)
    } else {
        match store.find_wordset(&options.wordset) {
            Ok(ws) => ws,
            Err(err @ StoreError::WordsetNotFound(_)) => {
                warn!(%err, "wordset not in store, using builtin pool");
                Arc::new(Wordset::builtin())
            }
            Err(err) => return Err(err).context("loading wordset"),
        }
    };

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let width = terminal.size().map(|s| s.width).unwrap_or(80);
    let mut app = App::new(wordset, options, line_width(width));
    let res = run_app(&mut terminal, &mut app, &store);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    store: &GameStore,
) -> Result<()> {
    let runner = Runner::new(
        CrosstermEventSource::new(),
        FixedTicker::new(Duration::from_millis(TICK_RATE_MS)),
    );

    loop {
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;

        match runner.step() {
            SessionEvent::Tick => {
                app.update_countdown();
                // Only the generation that armed the deadline may finish the
                // session; a tick racing a reset is a no-op.
                if app.generations.accepts(app.deadline_token)
                    && app.session.on_tick(&mut app.display)
                {
                    persist(store, &mut app.session.game);
                    app.load_history(store);
                    app.state = AppState::Results;
                }
            }
            SessionEvent::Resize(w, _) => {
                app.session.resize(line_width(w));
            }
            SessionEvent::Key(key) => match key.code {
                KeyCode::Esc => match app.state {
                    AppState::Typing if app.session.game.in_progress => {
                        if app.session.pause(&mut app.display) {
                            persist(store, &mut app.session.game);
                        }
                        app.load_history(store);
                        app.state = AppState::Results;
                    }
                    _ => break,
                },
                KeyCode::Tab => {
                    if app.session.game.in_progress && app.session.pause(&mut app.display) {
                        persist(store, &mut app.session.game);
                    }
                    app.reset();
                }
                // Takeback is not allowed during a session; corrections go
                // through retyping (Learning) or keep going (Challenge/Zen).
                KeyCode::Backspace | KeyCode::Delete => {}
                KeyCode::Char(c) => {
                    if key.modifiers.contains(KeyModifiers::CONTROL) {
                        if c == 'c' {
                            break;
                        }
                        // Cut/paste chords are filtered like takeback keys.
                        continue;
                    }
                    if app.state == AppState::Typing {
                        app.session.type_char(c, &mut app.display);
                    }
                }
                _ => {}
            },
        }
    }

    // Quitting mid-session pauses and saves it for a later resume.
    if app.session.game.in_progress && app.session.pause(&mut app.display) {
        persist(store, &mut app.session.game);
    }

    Ok(())
}
