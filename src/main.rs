use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use std::{fs, io};

use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

mod app;
mod chat;
mod config;
mod profile;
mod store;
mod ui;

use app::App;
use config::Config;
use profile::Profile;
use store::{HttpStore, RemoteStore};

const VIBECHAT_LOGO: &str = r#"
__     ___ _          ____ _           _
\ \   / (_) |__   ___/ ___| |__   __ _| |_
 \ \ / /| | '_ \ / _ \ |   | '_ \ / _` | __|
  \ V / | | |_) |  __/ |___| | | | (_| | |_
   \_/  |_|_.__/ \___|\____|_| |_|\__,_|\__|
"#;

fn show_startup_logo() {
    // Clear screen
    print!("\x1B[2J\x1B[1;1H");

    let colors = [
        "\x1B[38;5;39m",  // Blue1
        "\x1B[38;5;45m",  // Blue2
        "\x1B[38;5;51m",  // Cyan1
        "\x1B[38;5;87m",  // Cyan2
        "\x1B[38;5;123m", // Cyan3
    ];

    for (i, line) in VIBECHAT_LOGO.lines().filter(|l| !l.is_empty()).enumerate() {
        let color = colors.get(i).copied().unwrap_or("\x1B[0m");
        println!("{}{}\x1B[0m", color, line);
    }

    println!("\n\x1B[38;5;45m=== VibeChat - terminal client ===\x1B[0m");
    println!("\x1B[38;5;87mOne room, live, everywhere\x1B[0m");
    println!("\x1B[38;5;123mPress any key to continue...\x1B[0m\n");

    let _ = std::io::Read::read(&mut std::io::stdin(), &mut [0u8; 1]);
}

/// Log to a file under the platform data dir; stdout belongs to the TUI.
fn init_logging() {
    let Some(dir) = dirs::data_dir().map(|d| d.join("vibechat")) else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("vibechat.log"))
    else {
        return;
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vibechat=info,warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("vibechat")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Terminal chat client for VibeChat rooms")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Path to config.toml (default: platform config dir)"),
        )
        .arg(
            Arg::new("server")
                .long("server")
                .value_name("URL")
                .help("Sync service URL, overriding config and environment"),
        )
        .arg(
            Arg::new("nick")
                .long("nick")
                .value_name("NAME")
                .help("Set your nickname before connecting"),
        )
        .arg(
            Arg::new("no-logo")
                .long("no-logo")
                .action(ArgAction::SetTrue)
                .help("Skip startup logo"),
        )
        .get_matches();

    init_logging();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let config = Config::load(config_path, matches.get_one::<String>("server").cloned())?;

    let profile_path = profile::default_profile_path();
    let mut profile = Profile::load(profile_path.as_deref());
    if let Some(nick) = matches.get_one::<String>("nick") {
        profile.nickname = nick.clone();
        if let Err(err) = profile.save(profile_path.as_deref()) {
            warn!(error = %err, "failed to persist nickname");
        }
    }

    if !matches.get_flag("no-logo") {
        show_startup_logo();
    }

    // The store is owned here and handed to the app by reference counting;
    // sign-in and subscriptions happen before the terminal is taken over so
    // startup failures print normally.
    let store = Arc::new(HttpStore::new(&config)?);
    let mut app = App::new(store, profile, profile_path).await?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app<S: RemoteStore>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App<S>,
) -> Result<()> {
    let mut last_tick = Instant::now();
    let tick_rate = Duration::from_millis(250);

    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if event::poll(timeout)? {
            let event = event::read()?;
            app.handle_input(event).await?;
        }

        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
