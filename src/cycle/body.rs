//! The cycle body: reel, rest, cast, settle

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::machine::Command;
use crate::input::ActuatorBridge;
use crate::log_reader::{Confirmation, SustainedTrigger, PICKUP_CEILING};
use crate::utils::bot_state::Phase;
use crate::utils::settings::CycleParameters;

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// First cast after the user switched the bot on. Casts without reeling
    /// or resting, which is how a session's first cast skips the rest.
    Opening,
    /// The catch marker showed up in the log.
    Hooked,
    /// Nothing bit before the timeout.
    TimedOut,
    /// Reel requested by hand.
    Forced,
}

impl CycleKind {
    pub fn reels(&self) -> bool {
        !matches!(self, CycleKind::Opening)
    }
}

/// Nominal duration plus a uniform offset in `±range`, never negative.
pub fn jittered(nominal: Duration, range: Duration) -> Duration {
    let range = range.as_secs_f64();
    if range <= 0.0 {
        return nominal;
    }
    let offset = rand::thread_rng().gen_range(-range..=range);
    Duration::from_secs_f64((nominal.as_secs_f64() + offset).max(0.0))
}

/// Everything one cycle body needs, handed over when the gate is taken.
pub(crate) struct CycleContext {
    pub id: u64,
    pub kind: CycleKind,
    pub params: CycleParameters,
    pub actuator: ActuatorBridge,
    pub cancel: CancellationToken,
    pub events: mpsc::UnboundedSender<Command>,
    /// Present when the reel should end on a confirmed pickup.
    pub pickup: Option<(SustainedTrigger, broadcast::Receiver<Arc<str>>)>,
}

/// The body was cut short by a stop.
struct Cancelled;

/// Hands the gate back to the machine however the body ends.
struct GateRelease {
    id: u64,
    events: mpsc::UnboundedSender<Command>,
}

impl Drop for GateRelease {
    fn drop(&mut self) {
        let _ = self.events.send(Command::CycleFinished { cycle: self.id });
    }
}

pub(crate) async fn run_cycle(mut ctx: CycleContext) {
    let _gate = GateRelease {
        id: ctx.id,
        events: ctx.events.clone(),
    };

    tracing::info!("[CYCLE] #{} started ({:?})", ctx.id, ctx.kind);
    match ctx.run_phases().await {
        Ok(()) => tracing::info!("[CYCLE] #{} finished", ctx.id),
        Err(Cancelled) => tracing::info!("[CYCLE] #{} cancelled", ctx.id),
    }
}

impl CycleContext {
    async fn run_phases(&mut self) -> Result<(), Cancelled> {
        if self.kind.reels() {
            self.enter(Phase::Reeling);
            self.reel().await?;

            self.enter(Phase::Resting);
            self.sleep(jittered(self.params.rest, self.params.jitter)).await?;
        }

        self.enter(Phase::ChargingCast);
        self.press()?;
        self.sleep(self.params.cast).await?;
        self.actuator.release();

        self.enter(Phase::WaitingForHook);
        self.sleep(self.params.post_cast_wait).await
    }

    async fn reel(&mut self) -> Result<(), Cancelled> {
        let nominal = jittered(self.params.reel, self.params.jitter);
        let pressed_at = Instant::now();
        self.press()?;

        match self.pickup.take() {
            // Whichever comes first: confirmed pickup or the reel time
            Some((mut trigger, mut deltas)) => {
                let outcome = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(Cancelled),
                    outcome = trigger.await_confirmation(&mut deltas, PICKUP_CEILING) => Some(outcome),
                    _ = tokio::time::sleep_until(pressed_at + nominal) => None,
                };

                match outcome {
                    Some(Confirmation::Confirmed) => {
                        tracing::info!("[CYCLE] #{} pickup confirmed after {:?}", self.id, pressed_at.elapsed());
                    }
                    Some(Confirmation::Unconfirmed) => {
                        tracing::warn!("[CYCLE] #{} pickup not confirmed, using reel time {:?}", self.id, nominal);
                        self.sleep_until(pressed_at + nominal).await?;
                    }
                    None => {
                        tracing::info!("[CYCLE] #{} reel time {:?} elapsed before pickup", self.id, nominal);
                    }
                }
            }
            None => self.sleep(nominal).await?,
        }

        self.actuator.release();
        Ok(())
    }

    fn enter(&self, phase: Phase) {
        let _ = self.events.send(Command::PhaseReached { cycle: self.id, phase });
    }

    fn press(&self) -> Result<(), Cancelled> {
        if self.actuator.press(&self.cancel) {
            Ok(())
        } else {
            Err(Cancelled)
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.sleep_until(Instant::now() + duration).await
    }

    async fn sleep_until(&self, deadline: Instant) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep_until(deadline) => Ok(()),
        }
    }
}
