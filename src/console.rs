//! Minimal stdin control surface for running without a panel

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cycle::BotHandle;
use crate::utils::bot_state::SharedStatus;
use crate::utils::settings::{get_settings_path, load_settings_from, ParameterSource, SharedParameters};

/// Everything the console can reach.
pub struct Console {
    pub bot: BotHandle,
    pub status: Arc<SharedStatus>,
    pub parameters: SharedParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Toggle,
    ForceReel,
    Status,
    Reload,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "t" | "toggle" => Some(Self::Toggle),
            "f" | "force" => Some(Self::ForceReel),
            "s" | "status" => Some(Self::Status),
            "r" | "reload" => Some(Self::Reload),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Read commands from stdin and signal `quit_tx` on `quit`.
///
/// Blocking; run it on its own thread. A pending stdin read cannot be
/// cancelled, so the thread is left detached and never delays exit. A closed
/// or redirected stdin only ends the console; Ctrl-C still exits.
pub fn run_console(console: Console, quit_tx: mpsc::Sender<()>) {
    println!("Commands: t=toggle, f=force reel, s=status, r=reload settings, q=quit");

    if console.read_commands(std::io::stdin().lock(), &get_settings_path()) {
        let _ = quit_tx.blocking_send(());
    } else {
        tracing::info!("[CONSOLE] stdin closed, console disabled (Ctrl-C to exit)");
    }
}

impl Console {
    /// Dispatch commands from `input`. Returns true if the user asked to quit.
    fn read_commands<R: BufRead>(&self, input: R, settings_path: &Path) -> bool {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("[CONSOLE] stdin error: {}", e);
                    return false;
                }
            };

            match ConsoleCommand::parse(&line) {
                Some(ConsoleCommand::Toggle) => {
                    self.bot.toggle();
                }
                Some(ConsoleCommand::ForceReel) => {
                    self.bot.force_reel();
                }
                Some(ConsoleCommand::Status) => println!("{}", self.status.to_json()),
                Some(ConsoleCommand::Reload) => self.reload(settings_path),
                Some(ConsoleCommand::Quit) => return true,
                None if line.trim().is_empty() => {}
                None => println!("Unknown command: {}", line.trim()),
            }
        }

        false
    }

    /// Re-read the cycle parameters; the next cycle picks them up.
    fn reload(&self, settings_path: &Path) {
        match load_settings_from(settings_path) {
            Ok(settings) => {
                self.parameters.update(settings.parameters);
                tracing::info!("[CONSOLE] Parameters reloaded: {:?}", self.parameters.snapshot());
            }
            Err(e) => tracing::warn!("[CONSOLE] Reload failed, keeping current parameters: {}", e),
        }
    }
}
