//! Actuator output: the single press/release signal sent to the game

use std::net::UdpSocket;
use std::sync::Arc;

use parking_lot::Mutex;
use rosc::{encoder, OscError, OscMessage, OscPacket, OscType};
use tokio_util::sync::CancellationToken;

use crate::error::{BotError, Result};

/// Fire-and-forget press/release capability.
pub trait Actuator: Send + Sync {
    fn set_pressed(&self, pressed: bool);
}

/// Encode an OSC message carrying one int32 argument.
pub fn encode_osc_int(address: &str, value: i32) -> std::result::Result<Vec<u8>, OscError> {
    encoder::encode(&OscPacket::Message(OscMessage {
        addr: address.to_string(),
        args: vec![OscType::Int(value)],
    }))
}

/// Sends `1`/`0` to an OSC input address over UDP (VRChat listens on 9000).
pub struct OscActuator {
    socket: UdpSocket,
    target: String,
    address: String,
}

impl OscActuator {
    pub fn connect(target: &str, address: &str) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(BotError::ActuatorSocket)?;
        Ok(Self {
            socket,
            target: target.to_string(),
            address: address.to_string(),
        })
    }
}

impl Actuator for OscActuator {
    fn set_pressed(&self, pressed: bool) {
        let packet = match encode_osc_int(&self.address, i32::from(pressed)) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("[INPUT] Cannot encode OSC message for {}: {:?}", self.address, e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&packet, &self.target) {
            tracing::warn!("[INPUT] Failed to send {} to {}: {}", self.address, self.target, e);
        }
    }
}

/// Serialises every actuator write so a stopped cycle can never press again.
///
/// The cycle body presses through [`ActuatorBridge::press`] with its own
/// cancellation token; stop cancels that token and then releases under the
/// same lock, so any press that loses the race sees the cancellation.
#[derive(Clone)]
pub struct ActuatorBridge {
    inner: Arc<Mutex<Arc<dyn Actuator>>>,
}

impl ActuatorBridge {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(actuator)),
        }
    }

    /// Press unless `cycle` has been cancelled. Returns whether it pressed.
    pub fn press(&self, cycle: &CancellationToken) -> bool {
        let actuator = self.inner.lock();
        if cycle.is_cancelled() {
            return false;
        }
        actuator.set_pressed(true);
        true
    }

    pub fn release(&self) {
        self.inner.lock().set_pressed(false);
    }
}
