//! Global hotkeys for the toggle and force-reel triggers

use global_hotkey::hotkey::{Code, HotKey};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::sync::mpsc as std_mpsc;
use std::thread;

use crate::cycle::BotHandle;
use crate::error::{BotError, Result};
use crate::utils::settings::KeySettings;

/// Convert key string to global_hotkey Code
pub fn string_to_code(key: &str) -> Option<Code> {
    let key_upper = key.trim().to_uppercase();
    match key_upper.as_str() {
        "F1" => Some(Code::F1),
        "F2" => Some(Code::F2),
        "F3" => Some(Code::F3),
        "F4" => Some(Code::F4),
        "F5" => Some(Code::F5),
        "F6" => Some(Code::F6),
        "F7" => Some(Code::F7),
        "F8" => Some(Code::F8),
        "F9" => Some(Code::F9),
        "F10" => Some(Code::F10),
        "F11" => Some(Code::F11),
        "F12" => Some(Code::F12),
        "HOME" => Some(Code::Home),
        "END" => Some(Code::End),
        "INSERT" => Some(Code::Insert),
        "DELETE" => Some(Code::Delete),
        "PAGEUP" => Some(Code::PageUp),
        "PAGEDOWN" => Some(Code::PageDown),
        "PAUSE" => Some(Code::Pause),
        "SCROLLLOCK" => Some(Code::ScrollLock),
        "NUMPAD0" => Some(Code::Numpad0),
        "NUMPAD1" => Some(Code::Numpad1),
        "NUMPAD2" => Some(Code::Numpad2),
        "NUMPAD3" => Some(Code::Numpad3),
        "NUMPAD4" => Some(Code::Numpad4),
        "NUMPAD5" => Some(Code::Numpad5),
        "NUMPAD6" => Some(Code::Numpad6),
        "NUMPAD7" => Some(Code::Numpad7),
        "NUMPAD8" => Some(Code::Numpad8),
        "NUMPAD9" => Some(Code::Numpad9),
        _ => None,
    }
}

fn hotkey_for(key: &str) -> Result<HotKey> {
    string_to_code(key)
        .map(|code| HotKey::new(None, code))
        .ok_or_else(|| BotError::UnknownKey(key.to_string()))
}

/// Ids of the keys that were actually registered.
#[derive(Debug, Clone, Copy)]
struct HotkeyIds {
    toggle: u32,
    force_reel: Option<u32>,
}

fn register_keys(manager: &GlobalHotKeyManager, keys: &KeySettings) -> Result<HotkeyIds> {
    let toggle = hotkey_for(&keys.toggle_key)?;
    let toggle_id = toggle.id();
    manager.register(toggle)?;

    let force_reel = match hotkey_for(&keys.force_reel_key) {
        Ok(hotkey) => {
            let id = hotkey.id();
            match manager.register(hotkey) {
                Ok(()) => Some(id),
                Err(e) => {
                    tracing::warn!("[HOTKEY] Failed to register force-reel key: {}", e);
                    None
                }
            }
        }
        Err(e) => {
            tracing::warn!("[HOTKEY] {}", e);
            None
        }
    };

    Ok(HotkeyIds {
        toggle: toggle_id,
        force_reel,
    })
}

/// Keeps the hotkey thread alive. Dropping it stops the pump, which drops the
/// manager and unregisters the keys.
pub struct Hotkeys {
    waker: pump::Waker,
}

impl Drop for Hotkeys {
    fn drop(&mut self) {
        self.waker.wake();
    }
}

/// Register the configured keys and forward presses to the bot.
///
/// The manager lives on its own thread that runs a message pump, since
/// Windows only delivers hotkey events to the thread that registered them
/// while it dispatches messages. Only key-down events are forwarded;
/// debouncing happens in the cycle machine.
pub fn register_hotkeys(keys: &KeySettings, bot: BotHandle) -> Result<Hotkeys> {
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<pump::Waker>>();
    let keys = keys.clone();

    thread::Builder::new()
        .name("hotkeys".to_string())
        .spawn(move || {
            let (waker, parker) = pump::current();
            let registered = GlobalHotKeyManager::new()
                .map_err(BotError::from)
                .and_then(|manager| register_keys(&manager, &keys).map(|ids| (manager, ids)));

            let (manager, ids) = match registered {
                Ok(registered) => registered,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            tracing::info!(
                "[HOTKEY] Toggle={}, Force reel={}",
                keys.toggle_key,
                if ids.force_reel.is_some() { keys.force_reel_key.as_str() } else { "-" }
            );
            spawn_listener(ids, bot);

            if ready_tx.send(Ok(waker)).is_err() {
                return;
            }
            pump::run(parker);
            drop(manager);
            tracing::debug!("[HOTKEY] Hotkeys unregistered");
        })
        .map_err(|e| BotError::HotkeyThread(e.to_string()))?;

    let waker = ready_rx
        .recv()
        .map_err(|_| BotError::HotkeyThread("exited before registering".to_string()))??;
    Ok(Hotkeys { waker })
}

fn spawn_listener(ids: HotkeyIds, bot: BotHandle) {
    thread::spawn(move || {
        let receiver = GlobalHotKeyEvent::receiver();
        while let Ok(event) = receiver.recv() {
            if event.state != HotKeyState::Pressed {
                continue;
            }

            let delivered = if event.id == ids.toggle {
                bot.toggle()
            } else if Some(event.id) == ids.force_reel {
                bot.force_reel()
            } else {
                true
            };

            if !delivered {
                tracing::debug!("[HOTKEY] Bot gone, stopping hotkey listener");
                break;
            }
        }
    });
}

/// Blocks the hotkey thread until [`Waker::wake`] is called.
#[cfg(windows)]
mod pump {
    use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW, TranslateMessage, MSG,
        PM_NOREMOVE, WM_QUIT,
    };

    pub struct Waker(u32);
    pub struct Parker;

    /// Create the calling thread's message queue and a handle that can quit it.
    pub fn current() -> (Waker, Parker) {
        let mut msg = MSG::default();
        unsafe {
            // Forces the queue into existence so an early wake is not lost
            let _ = PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_NOREMOVE);
            (Waker(GetCurrentThreadId()), Parker)
        }
    }

    /// Dispatch messages until `WM_QUIT`.
    pub fn run(_parker: Parker) {
        let mut msg = MSG::default();
        unsafe {
            while GetMessageW(&mut msg, HWND::default(), 0, 0).0 > 0 {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
    }

    impl Waker {
        pub fn wake(&self) {
            unsafe {
                if let Err(e) = PostThreadMessageW(self.0, WM_QUIT, WPARAM(0), LPARAM(0)) {
                    tracing::warn!("[HOTKEY] Failed to stop message pump: {}", e);
                }
            }
        }
    }
}

/// Other platforms deliver hotkey events without a pump; the thread just parks.
#[cfg(not(windows))]
mod pump {
    use std::sync::mpsc;

    pub struct Waker(mpsc::Sender<()>);
    pub struct Parker(mpsc::Receiver<()>);

    pub fn current() -> (Waker, Parker) {
        let (tx, rx) = mpsc::channel();
        (Waker(tx), Parker(rx))
    }

    pub fn run(parker: Parker) {
        let _ = parker.0.recv();
    }

    impl Waker {
        pub fn wake(&self) {
            let _ = self.0.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_code() {
        assert_eq!(string_to_code("F5"), Some(Code::F5));
        assert_eq!(string_to_code(" f6 "), Some(Code::F6));
        assert_eq!(string_to_code("numpad3"), Some(Code::Numpad3));
        assert_eq!(string_to_code("A"), None);
        assert_eq!(string_to_code(""), None);
    }

    #[test]
    fn test_hotkey_for_unknown_key() {
        assert!(matches!(hotkey_for("BOGUS"), Err(BotError::UnknownKey(_))));
        assert!(hotkey_for("F9").is_ok());
    }

    #[test]
    fn test_pump_returns_once_woken() {
        let (tx, rx) = std_mpsc::channel();
        let pump_thread = thread::spawn(move || {
            let (waker, parker) = pump::current();
            tx.send(waker).unwrap();
            pump::run(parker);
        });

        let waker = rx.recv().unwrap();
        waker.wake();
        pump_thread.join().unwrap();
    }
}
