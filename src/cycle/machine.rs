//! The cycle state machine.
//!
//! A single actor task owns the session and consumes every event (toggle,
//! log deltas, timeout alarms, cycle progress) from one queue. Because only
//! this task ever takes or releases the gate, "is a cycle running" cannot be
//! observed inconsistently by the hook and timeout paths.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::body::{run_cycle, CycleContext, CycleKind};
use super::timeout_guard::TimeoutGuard;
use crate::input::{Actuator, ActuatorBridge};
use crate::log_reader::{DeltaSink, EventDetector, InstantTrigger};
use crate::utils::bot_state::{Phase, StatusSink};
use crate::utils::settings::{CycleParameters, ParameterSource, TriggerSettings};

/// Toggles closer together than this are treated as key bounce.
pub const TOGGLE_DEBOUNCE: Duration = Duration::from_millis(500);

/// No hook-triggered cycle starts this soon after the previous one ended.
pub const HOOK_COOLDOWN: Duration = Duration::from_secs(2);

const DELTA_BACKLOG: usize = 64;

/// Everything the machine reacts to.
#[derive(Debug, Clone)]
pub enum Command {
    Toggle,
    ForceReel,
    LogPolled(Arc<str>),
    TimeoutFired { generation: u64 },
    PhaseReached { cycle: u64, phase: Phase },
    CycleFinished { cycle: u64 },
    Shutdown,
}

/// Cloneable sender side used by hotkeys, the tailer and the control surface.
#[derive(Debug, Clone)]
pub struct BotHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl BotHandle {
    /// Each method returns false if the machine has already shut down.
    pub fn toggle(&self) -> bool {
        self.tx.send(Command::Toggle).is_ok()
    }

    pub fn force_reel(&self) -> bool {
        self.tx.send(Command::ForceReel).is_ok()
    }

    pub fn log_polled(&self, delta: &str) -> bool {
        self.tx.send(Command::LogPolled(Arc::from(delta))).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(Command::Shutdown).is_ok()
    }
}

impl DeltaSink for BotHandle {
    fn deliver(&self, delta: Arc<str>) -> bool {
        self.tx.send(Command::LogPolled(delta)).is_ok()
    }
}

/// The cycle currently holding the gate.
struct ActiveCycle {
    id: u64,
    params: CycleParameters,
    cancel: CancellationToken,
}

/// Per-process session, owned by the machine task.
struct SessionState {
    running: bool,
    phase: Phase,
    /// The gate: `Some` while a cycle body runs.
    active: Option<ActiveCycle>,
    last_cycle_end: Option<Instant>,
    next_cycle_id: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            running: false,
            phase: Phase::Idle,
            active: None,
            last_cycle_end: None,
            next_cycle_id: 1,
        }
    }

    fn is_active_cycle(&self, cycle: u64) -> bool {
        self.active.as_ref().is_some_and(|active| active.id == cycle)
    }
}

pub struct CycleStateMachine {
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    session: SessionState,
    params: Arc<dyn ParameterSource>,
    actuator: ActuatorBridge,
    status: Arc<dyn StatusSink>,
    guard: TimeoutGuard<Command>,
    detector: EventDetector,
    instant: InstantTrigger,
    confirm_reel_with_pickup: bool,
    deltas: broadcast::Sender<Arc<str>>,
    last_toggle: Option<Instant>,
}

impl CycleStateMachine {
    pub fn new(
        params: Arc<dyn ParameterSource>,
        actuator: Arc<dyn Actuator>,
        status: Arc<dyn StatusSink>,
        triggers: &TriggerSettings,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (deltas, _) = broadcast::channel(DELTA_BACKLOG);
        let detector = EventDetector::new(
            triggers.instant_marker.clone(),
            triggers.sustained_marker.clone(),
        );

        Self {
            guard: TimeoutGuard::new(tx.clone()),
            instant: detector.instant(),
            tx,
            rx,
            session: SessionState::new(),
            params,
            actuator: ActuatorBridge::new(actuator),
            status,
            detector,
            confirm_reel_with_pickup: triggers.confirm_reel_with_pickup,
            deltas,
            last_toggle: None,
        }
    }

    pub fn handle(&self) -> BotHandle {
        BotHandle { tx: self.tx.clone() }
    }

    /// Run the machine on its own task.
    pub fn spawn(self) -> (BotHandle, JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Process events until [`Command::Shutdown`].
    pub async fn run(mut self) {
        self.actuator.release();
        self.status.publish(self.session.phase);

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Toggle => self.on_toggle(),
                Command::ForceReel => self.on_force_reel(),
                Command::LogPolled(delta) => self.on_log_polled(delta),
                Command::TimeoutFired { generation } => self.on_timeout(generation),
                Command::PhaseReached { cycle, phase } => self.on_phase_reached(cycle, phase),
                Command::CycleFinished { cycle } => self.on_cycle_finished(cycle),
                Command::Shutdown => {
                    tracing::info!("[CYCLE] Shutting down");
                    self.stop();
                    break;
                }
            }
        }
    }

    fn on_toggle(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_toggle {
            if now.saturating_duration_since(last) < TOGGLE_DEBOUNCE {
                tracing::debug!("[CYCLE] Toggle ignored (debounce)");
                return;
            }
        }
        self.last_toggle = Some(now);

        if self.session.running {
            self.stop();
        } else {
            self.start();
        }
    }

    fn start(&mut self) {
        tracing::info!("[CYCLE] Started");
        self.session.running = true;
        self.instant.reset();
        self.status.set_detail("Started");
        self.begin_cycle(CycleKind::Opening);
    }

    /// Release the actuator, cancel the alarm and free the gate. Safe when idle.
    fn stop(&mut self) {
        if let Some(active) = self.session.active.take() {
            active.cancel.cancel();
            tracing::info!("[CYCLE] Stop interrupted cycle #{}", active.id);
        }
        self.actuator.release();
        self.guard.cancel();

        if self.session.running {
            tracing::info!("[CYCLE] Stopped");
            self.status.set_detail("Stopped by user");
        }
        self.session.running = false;
        self.session.last_cycle_end = Some(Instant::now());
        self.set_phase(Phase::Stopped);
    }

    /// Try to take the gate and start a body. Losing is a no-op.
    fn begin_cycle(&mut self, kind: CycleKind) -> bool {
        if let Some(active) = &self.session.active {
            tracing::debug!("[CYCLE] {:?} ignored, cycle #{} holds the gate", kind, active.id);
            return false;
        }

        let id = self.session.next_cycle_id;
        self.session.next_cycle_id += 1;

        let params = self.params.snapshot();
        let cancel = CancellationToken::new();
        self.session.active = Some(ActiveCycle {
            id,
            params,
            cancel: cancel.clone(),
        });

        if kind.reels() {
            self.guard.cancel();
        }

        let pickup = (kind.reels() && self.confirm_reel_with_pickup)
            .then(|| (self.detector.sustained(), self.deltas.subscribe()));

        let ctx = CycleContext {
            id,
            kind,
            params,
            actuator: self.actuator.clone(),
            cancel,
            events: self.tx.clone(),
            pickup,
        };
        tokio::spawn(run_cycle(ctx));
        true
    }

    fn on_force_reel(&mut self) {
        if !self.session.running || self.session.phase != Phase::WaitingForHook {
            tracing::debug!("[CYCLE] Force reel ignored in {:?}", self.session.phase);
            return;
        }
        if self.begin_cycle(CycleKind::Forced) {
            self.status.set_detail("Manual reel");
        }
    }

    fn on_log_polled(&mut self, delta: Arc<str>) {
        // No receivers outside a confirming reel
        let _ = self.deltas.send(delta.clone());

        if !self.instant.scan(&delta) {
            return;
        }

        if !self.session.running {
            tracing::trace!("[CYCLE] Catch marker while stopped");
            return;
        }
        if self.session.phase != Phase::WaitingForHook {
            tracing::debug!("[CYCLE] Catch marker ignored in {:?}", self.session.phase);
            return;
        }
        if let Some(end) = self.session.last_cycle_end {
            if Instant::now().saturating_duration_since(end) < HOOK_COOLDOWN {
                tracing::debug!("[CYCLE] Catch marker ignored (cool-down)");
                return;
            }
        }

        if self.begin_cycle(CycleKind::Hooked) {
            tracing::info!("[CYCLE] Fish on hook");
            self.status.set_detail("Fish on hook");
        }
    }

    fn on_timeout(&mut self, generation: u64) {
        if !self.guard.is_current(generation) {
            tracing::debug!("[TIMEOUT] Stale alarm #{} ignored", generation);
            return;
        }
        if !self.session.running || self.session.phase != Phase::WaitingForHook {
            return;
        }

        if self.begin_cycle(CycleKind::TimedOut) {
            tracing::info!("[TIMEOUT] No bite in time, forcing reel");
            self.status.set_detail("Timed out, reeling");
        }
    }

    fn on_phase_reached(&mut self, cycle: u64, phase: Phase) {
        let Some(active) = self.session.active.as_ref().filter(|a| a.id == cycle) else {
            tracing::trace!("[CYCLE] Late {:?} from cycle #{} dropped", phase, cycle);
            return;
        };
        let timeout = active.params.timeout();

        self.set_phase(phase);

        if phase == Phase::WaitingForHook {
            self.guard.arm(timeout, |generation| Command::TimeoutFired { generation });
        }
    }

    fn on_cycle_finished(&mut self, cycle: u64) {
        if !self.session.is_active_cycle(cycle) {
            return;
        }
        let Some(finished) = self.session.active.take() else {
            return;
        };
        self.session.last_cycle_end = Some(Instant::now());
        self.status.cycle_completed();

        // An alarm that fired while the body was still settling lost the gate
        if self.session.running && self.session.phase == Phase::WaitingForHook && !self.guard.is_armed() {
            tracing::info!("[TIMEOUT] Alarm missed during settle, re-arming");
            self.guard
                .arm(finished.params.timeout(), |generation| Command::TimeoutFired { generation });
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.session.phase == phase {
            return;
        }
        if phase != Phase::WaitingForHook {
            self.guard.cancel();
        }
        tracing::debug!("[CYCLE] {:?} -> {:?}", self.session.phase, phase);
        self.session.phase = phase;
        self.status.publish(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        presses: Mutex<Vec<bool>>,
        phases: Mutex<Vec<Phase>>,
    }

    impl Actuator for Recorder {
        fn set_pressed(&self, pressed: bool) {
            self.presses.lock().push(pressed);
        }
    }

    impl StatusSink for Recorder {
        fn publish(&self, phase: Phase) {
            self.phases.lock().push(phase);
        }
    }

    fn machine(recorder: &Arc<Recorder>) -> CycleStateMachine {
        let params = CycleParameters {
            cast: Duration::from_secs(2),
            rest: Duration::from_secs(3),
            reel: Duration::from_secs(2),
            post_cast_wait: Duration::from_millis(500),
            timeout_minutes: 5.0,
            jitter: Duration::from_millis(500),
        };
        CycleStateMachine::new(
            Arc::new(params),
            recorder.clone(),
            recorder.clone(),
            &TriggerSettings::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_debounce() {
        let recorder = Arc::new(Recorder::default());
        let (bot, _task) = machine(&recorder).spawn();

        bot.toggle();
        bot.toggle();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*recorder.phases.lock(), vec![Phase::Idle, Phase::ChargingCast]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        bot.toggle();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.phases.lock().last(), Some(&Phase::Stopped));
        assert_eq!(recorder.presses.lock().last(), Some(&false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_while_stopped_does_nothing() {
        let recorder = Arc::new(Recorder::default());
        let (bot, _task) = machine(&recorder).spawn();

        bot.log_polled("SAVED DATA");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*recorder.phases.lock(), vec![Phase::Idle]);
        assert_eq!(*recorder.presses.lock(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_is_safe() {
        let recorder = Arc::new(Recorder::default());
        let (bot, task) = machine(&recorder).spawn();

        bot.shutdown();
        task.await.unwrap();
        assert_eq!(*recorder.presses.lock(), vec![false, false]);
        assert!(!bot.toggle());
    }
}
