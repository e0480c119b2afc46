//! Auto fisher - log-driven fishing bot for VRChat fishing worlds
//!
//! Features:
//! - Tails the newest VRChat output log, surviving rotation and truncation
//! - Reels and recasts through OSC when the catch marker appears
//! - Forces a reel when nothing bites before the timeout
//! - Global toggle / force-reel hotkeys plus a console fallback

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use autofisher::console::{run_console, Console};
use autofisher::utils::keybinds::register_hotkeys;
use autofisher::utils::path::get_data_dir;
use autofisher::utils::settings::{get_settings_path, load_settings};
use autofisher::{CycleStateMachine, LogCursor, LogTailer, OscActuator, SharedParameters, SharedStatus};

/// Upper bound on waiting for background tasks at exit.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

fn init_logging() {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // Log filter configuration:
    // - Sets default level to 'info'
    // - Keeps the file watcher backend quiet
    const LOG_FILTER: &str = "info,autofisher=info,notify=warn,mio=warn";

    let log_dir = get_data_dir().join("debug").join("log");
    let _ = std::fs::create_dir_all(&log_dir);
    let log_file_path = log_dir.join("debug.log");
    let file_result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(LOG_FILTER));

    match file_result {
        Ok(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE);

            let stdout_layer = tracing_subscriber::fmt::layer().with_span_events(FmtSpan::CLOSE);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(stdout_layer)
                .init();

            tracing::info!("[INIT] Logging initialized, file: {:?}", log_file_path);
        }
        Err(e) => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            eprintln!(
                "[INIT] Failed to create debug log file at {:?}: {}",
                log_file_path, e
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    println!("Auto Fisher {}", env!("CARGO_PKG_VERSION"));
    println!("================================");

    let settings = load_settings();
    tracing::info!("[INIT] Settings: {:?}", get_settings_path());

    let actuator = OscActuator::connect(&settings.actuator.target, &settings.actuator.address)
        .context("Failed to set up OSC output")?;
    let status = Arc::new(SharedStatus::new());
    let parameters = SharedParameters::new(settings.parameters.clone());

    let machine = CycleStateMachine::new(
        Arc::new(parameters.clone()),
        Arc::new(actuator),
        status.clone(),
        &settings.triggers,
    );
    let (bot, machine_task) = machine.spawn();

    let log_dir = settings.log.directory();
    tracing::info!("[INIT] Log directory: {:?}", log_dir);
    let cursor = LogCursor::new(log_dir, settings.log.file_prefix.clone(), settings.log.file_suffix.clone());
    let tailer = LogTailer::spawn(cursor, settings.log.poll_interval(), bot.clone());

    let _hotkeys = match register_hotkeys(&settings.keys, bot.clone()) {
        Ok(hotkeys) => Some(hotkeys),
        Err(e) => {
            tracing::warn!("[INIT] Hotkeys unavailable, use the console: {}", e);
            None
        }
    };

    let (quit_tx, mut quit_rx) = mpsc::channel(1);
    let console = Console {
        bot: bot.clone(),
        status: status.clone(),
        parameters,
    };
    std::thread::spawn(move || run_console(console, quit_tx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("[INIT] Interrupted"),
        _ = quit_rx.recv() => {}
    }

    // Cleanup
    println!("App is closing, cleaning up...");
    bot.shutdown();
    tailer.shutdown(SHUTDOWN_JOIN_TIMEOUT).await;

    match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, machine_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("[INIT] Cycle machine ended abnormally: {}", e),
        Err(_) => tracing::warn!("[INIT] Cycle machine did not stop in time"),
    }

    Ok(())
}
