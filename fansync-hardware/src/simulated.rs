//! Simulated fan for mock mode and tests
//!
//! Behaves like the real device on the wire: answers every GET_STATUS and
//! SET_STATE with a status notification, applies writes to an in-memory
//! state, and records every frame it receives. It can also be told to
//! disappear, stay silent, corrupt its replies, refuse connections or drop
//! the link, so failure handling can be exercised without a radio.

use async_trait::async_trait;
use fansync_core::protocol::{self, Command, FrameFields};
use fansync_core::{DeviceStatus, FanSyncError, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::{BleTransport, Connectable, Connection, DeviceLocator, LinkLostSignal};

const NOTIFICATION_BUFFER: usize = 16;

/// How the simulated device answers commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMode {
    /// Answer with a valid status frame
    #[default]
    Normal,
    /// Never answer
    Silent,
    /// Answer with a frame whose checksum is wrong
    Corrupt,
}

#[derive(Default)]
struct SimState {
    status: DeviceStatus,
    absent: bool,
    reply_mode: ReplyMode,
    connect_failures: u32,
    latency: Duration,
    received: Vec<Vec<u8>>,
    connections: u32,
    disconnects: u32,
    link: Option<OpenLink>,
}

struct OpenLink {
    notify: mpsc::Sender<Vec<u8>>,
    link_lost: LinkLostSignal,
}

/// In-memory fan speaking the wire protocol
#[derive(Clone, Default)]
pub struct SimulatedFan {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedFan {
    /// Create a simulated fan in the given state
    pub fn new(status: DeviceStatus) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                status,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A poisoned lock only means a test panicked mid-update; the state is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current device-side state
    pub fn status(&self) -> DeviceStatus {
        self.lock().status
    }

    /// Change state as if the RF remote had been used
    ///
    /// When a link is open the device pushes an unsolicited status notification.
    pub fn remote_change(&self, status: DeviceStatus) {
        let mut state = self.lock();
        state.status = status;
        if let Some(link) = &state.link {
            let _ = link
                .notify
                .try_send(protocol::encode(Command::StatusResponse, &fields_of(&status)).to_vec());
        }
    }

    /// Push an arbitrary notification on the open link
    pub fn push_notification(&self, payload: Vec<u8>) {
        if let Some(link) = &self.lock().link {
            let _ = link.notify.try_send(payload);
        }
    }

    /// Make the device invisible to scans
    pub fn set_absent(&self, absent: bool) {
        self.lock().absent = absent;
    }

    pub fn set_reply_mode(&self, mode: ReplyMode) {
        self.lock().reply_mode = mode;
    }

    /// Delay every write by `latency`, as a slow radio link would
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_connects(&self, count: u32) {
        self.lock().connect_failures = count;
    }

    /// Drop the link from the device side, as a power cut or range loss would
    pub fn drop_link(&self) {
        if let Some(link) = self.lock().link.take() {
            link.link_lost.raise();
        }
    }

    /// Every frame written to the command characteristic, oldest first
    pub fn received_frames(&self) -> Vec<Vec<u8>> {
        self.lock().received.clone()
    }

    /// Command byte of every frame received, oldest first
    pub fn received_commands(&self) -> Vec<u8> {
        self.lock()
            .received
            .iter()
            .filter_map(|frame| frame.get(1).copied())
            .collect()
    }

    /// SET_STATE frames received, decoded
    pub fn received_writes(&self) -> Vec<DeviceStatus> {
        self.lock()
            .received
            .iter()
            .filter(|frame| frame.get(1) == Some(&(Command::SetState as u8)))
            .filter_map(|frame| protocol::decode(frame).ok())
            .collect()
    }

    /// Successful connections so far
    pub fn connection_count(&self) -> u32 {
        self.lock().connections
    }

    /// Disconnects requested by the host so far
    pub fn disconnect_count(&self) -> u32 {
        self.lock().disconnects
    }

    pub fn is_connected(&self) -> bool {
        self.lock().link.is_some()
    }

    fn handle_frame(&self, frame: &[u8]) {
        let mut state = self.lock();
        state.received.push(frame.to_vec());

        match frame.get(1).copied().and_then(Command::from_byte) {
            Some(Command::SetState) => {
                if let Ok(written) = protocol::decode(frame) {
                    state.status.speed = written.speed;
                    state.status.direction = written.direction;
                    state.status.downlight = written.downlight;
                    state.status.timer_minutes = written.timer_minutes;
                    debug!("Simulated fan applied write: {:?}", state.status);
                }
            }
            Some(Command::GetStatus) => {}
            _ => return,
        }

        let reply = match state.reply_mode {
            ReplyMode::Silent => return,
            ReplyMode::Normal => {
                protocol::encode(Command::StatusResponse, &fields_of(&state.status)).to_vec()
            }
            ReplyMode::Corrupt => {
                let mut frame =
                    protocol::encode(Command::StatusResponse, &fields_of(&state.status));
                frame[9] = frame[9].wrapping_add(1);
                frame.to_vec()
            }
        };

        if let Some(link) = &state.link {
            let _ = link.notify.try_send(reply);
        }
    }
}

fn fields_of(status: &DeviceStatus) -> FrameFields {
    FrameFields {
        speed: status.speed,
        direction: status.direction,
        uplight: status.uplight,
        downlight: status.downlight,
        timer_minutes: status.timer_minutes,
        fan_type: status.fan_type,
    }
}

#[async_trait]
impl DeviceLocator for SimulatedFan {
    async fn locate(&self) -> Result<Box<dyn Connectable>> {
        if self.lock().absent {
            return Err(FanSyncError::DeviceNotFound(self.describe()));
        }
        Ok(Box::new(self.clone()))
    }

    fn describe(&self) -> String {
        "simulated fan".to_string()
    }
}

#[async_trait]
impl Connectable for SimulatedFan {
    async fn connect(&self, link_lost: LinkLostSignal) -> Result<Connection> {
        let mut state = self.lock();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(FanSyncError::Ble("simulated connection refused".to_string()));
        }

        let (notify, notifications) = mpsc::channel(NOTIFICATION_BUFFER);
        state.link = Some(OpenLink { notify, link_lost });
        state.connections += 1;

        Ok(Connection {
            transport: Box::new(SimulatedTransport { fan: self.clone() }),
            notifications,
        })
    }
}

struct SimulatedTransport {
    fan: SimulatedFan,
}

#[async_trait]
impl BleTransport for SimulatedTransport {
    async fn write_command(&self, frame: &[u8]) -> Result<()> {
        let latency = self.fan.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.fan.is_connected() {
            return Err(FanSyncError::Disconnected("simulated link is down".to_string()));
        }
        self.fan.handle_frame(frame);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.fan.lock();
        state.link = None;
        state.disconnects += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_answers_get_status() {
        let fan = SimulatedFan::new(DeviceStatus {
            speed: 2,
            downlight: 40,
            ..Default::default()
        });
        let device = fan.locate().await.unwrap();
        let mut conn = device.connect(LinkLostSignal::new()).await.unwrap();

        let frame = protocol::encode(Command::GetStatus, &FrameFields::default());
        conn.transport.write_command(&frame).await.unwrap();

        let reply = conn.notifications.recv().await.unwrap();
        let status = protocol::decode(&reply).unwrap();
        assert_eq!(status.speed, 2);
        assert_eq!(status.downlight, 40);
        assert_eq!(reply[1], Command::StatusResponse as u8);
    }

    #[tokio::test]
    async fn test_applies_set_state() {
        let fan = SimulatedFan::new(DeviceStatus {
            uplight: 30,
            fan_type: 4,
            ..Default::default()
        });
        let device = fan.locate().await.unwrap();
        let conn = device.connect(LinkLostSignal::new()).await.unwrap();

        let frame = protocol::encode(
            Command::SetState,
            &FrameFields {
                speed: 3,
                direction: 1,
                downlight: 90,
                timer_minutes: 60,
                ..Default::default()
            },
        );
        conn.transport.write_command(&frame).await.unwrap();

        let status = fan.status();
        assert_eq!(status.speed, 3);
        assert_eq!(status.direction, 1);
        assert_eq!(status.downlight, 90);
        assert_eq!(status.timer_minutes, 60);
        // Not driven by writes
        assert_eq!(status.uplight, 30);
        assert_eq!(status.fan_type, 4);
        assert_eq!(fan.received_writes().len(), 1);
    }

    #[tokio::test]
    async fn test_absent_device_not_found() {
        let fan = SimulatedFan::default();
        fan.set_absent(true);

        let result = fan.locate().await;
        assert!(matches!(result, Err(FanSyncError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_refused_connections() {
        let fan = SimulatedFan::default();
        fan.fail_connects(1);
        let device = fan.locate().await.unwrap();

        assert!(device.connect(LinkLostSignal::new()).await.is_err());
        assert!(device.connect(LinkLostSignal::new()).await.is_ok());
        assert_eq!(fan.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_reply_fails_checksum() {
        let fan = SimulatedFan::default();
        fan.set_reply_mode(ReplyMode::Corrupt);
        let device = fan.locate().await.unwrap();
        let mut conn = device.connect(LinkLostSignal::new()).await.unwrap();

        let frame = protocol::encode(Command::GetStatus, &FrameFields::default());
        conn.transport.write_command(&frame).await.unwrap();

        let reply = conn.notifications.recv().await.unwrap();
        assert!(matches!(
            protocol::decode(&reply),
            Err(FanSyncError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_drop_link_raises_signal_and_closes_notifications() {
        let fan = SimulatedFan::default();
        let device = fan.locate().await.unwrap();
        let signal = LinkLostSignal::new();
        let mut conn = device.connect(signal.clone()).await.unwrap();

        fan.drop_link();

        assert!(signal.is_raised());
        assert!(!fan.is_connected());
        assert!(conn.notifications.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_writes() {
        let fan = SimulatedFan::default();
        fan.set_latency(Duration::from_millis(100));
        let device = fan.locate().await.unwrap();
        let conn = device.connect(LinkLostSignal::new()).await.unwrap();

        let start = tokio::time::Instant::now();
        let frame = protocol::encode(Command::GetStatus, &FrameFields::default());
        conn.transport.write_command(&frame).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(fan.received_frames().len(), 1);
    }
}
