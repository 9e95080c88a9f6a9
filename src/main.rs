mod app;
mod audio;
mod catalog;
mod player;
mod timer;
mod ui;

use anyhow::Result;
use app::{AppController, PanelOptions};
use audio::StreamPlayer;
use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use player::{PlaybackBackend, PlayerContext};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(name = "radiodial", about = "A terminal internet-radio player", version)]
struct Args {
    /// Path to a station catalog JSON file (defaults to the bundled catalog)
    #[arg(long)]
    stations: Option<PathBuf>,

    /// Named station list to load from the catalog
    #[arg(long, default_value = "default")]
    list: String,

    /// Do not render the seek bar even when the stream has a duration
    #[arg(long)]
    hide_seek_bar: bool,

    /// Show the sleep timer setting without the countdown
    #[arg(long)]
    hide_countdown: bool,

    /// Disable saving a copy of finite sources with the D key
    #[arg(long)]
    hide_download: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let stations = match &args.stations {
        Some(path) => catalog::load_file(path, &args.list)?,
        None => catalog::load_bundled(&args.list)?,
    };

    let options = PanelOptions {
        show_seek_bar: !args.hide_seek_bar,
        show_countdown: !args.hide_countdown,
        show_download: !args.hide_download,
    };

    // Set up panic handler to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // The audio output stream is !Send, so the player lives on this task
    let (player, events) = StreamPlayer::new()?;
    let ctx = PlayerContext::new(player, events);
    let mut app = AppController::new(ctx, stations, options);

    let res = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

async fn run_app<B: PlaybackBackend>(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut AppController<B>,
) -> Result<()> {
    loop {
        if terminal.draw(|f| ui::render(f, app)).is_err() {
            break;
        }

        // Handle input with shorter timeout for better responsiveness
        if event::poll(Duration::from_millis(50))? {
            match event::read() {
                Ok(Event::Key(key)) if key.kind == event::KeyEventKind::Press => {
                    app.handle_key(key.code);
                }
                Ok(Event::Resize(_, _)) => {
                    // UI adjusts on the next render
                }
                Ok(_) => {}
                Err(_) => {}
            }
        }

        app.tick(Instant::now());

        // Small delay to prevent high CPU usage but keep responsive
        sleep(Duration::from_millis(16)).await;

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
