//! Single-link manager for the fan
//!
//! Owns the one connection to the device and serializes every exchange on
//! it. Callers take a [`LinkGuard`] to run several exchanges back to back
//! with nothing from another task slipping in between.

use fansync_core::protocol;
use fansync_core::{FanSyncError, LinkConfig, Result};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::transport::{BleTransport, DeviceLocator, LinkLostSignal};

/// Pause between connection attempts
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Connection state as seen from outside the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
        }
    }
}

struct Session {
    transport: Box<dyn BleTransport>,
    notifications: mpsc::Receiver<Vec<u8>>,
    link_lost: LinkLostSignal,
}

impl Session {
    fn is_live(&self) -> bool {
        !self.link_lost.is_raised()
    }
}

/// Maintains at most one live connection to the device
pub struct LinkManager {
    locator: Arc<dyn DeviceLocator>,
    session: Mutex<Option<Session>>,
    /// Link-lost flag of the open session, readable without the link lock
    live: StdMutex<Option<LinkLostSignal>>,
    connect_attempts: u32,
    reply_timeout: Duration,
    debug_frames: bool,
}

impl LinkManager {
    /// Create a manager with default link settings
    pub fn new(locator: Arc<dyn DeviceLocator>) -> Self {
        Self::with_config(locator, &LinkConfig::default())
    }

    pub fn with_config(locator: Arc<dyn DeviceLocator>, config: &LinkConfig) -> Self {
        if config.debug_frames {
            debug!("Frame debug logging enabled");
        }
        Self {
            locator,
            session: Mutex::new(None),
            live: StdMutex::new(None),
            connect_attempts: config.connect_attempts.max(1),
            reply_timeout: config.reply_timeout(),
            debug_frames: config.debug_frames,
        }
    }

    /// Default timeout applied by callers waiting for a reply
    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Take exclusive use of the link
    ///
    /// Waits for any exchange in progress on another task to finish.
    pub async fn acquire(&self) -> LinkGuard<'_> {
        LinkGuard {
            manager: self,
            slot: self.session.lock().await,
        }
    }

    /// Current state; a link dropped by the device reports as disconnected
    ///
    /// Does not wait for an exchange in progress.
    pub fn state(&self) -> LinkState {
        match self.live_signal().as_ref() {
            Some(link_lost) if !link_lost.is_raised() => LinkState::Connected,
            _ => LinkState::Disconnected,
        }
    }

    fn live_signal(&self) -> std::sync::MutexGuard<'_, Option<LinkLostSignal>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Connect if not already connected
    pub async fn ensure_connected(&self) -> Result<()> {
        self.acquire().await.ensure_connected().await
    }

    /// Run one exchange under the link lock
    pub async fn send_and_await_reply(&self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.acquire().await.send_and_await_reply(frame, timeout).await
    }

    /// Close the link; safe to call when nothing is open
    pub async fn disconnect(&self) {
        self.acquire().await.disconnect().await
    }
}

/// Exclusive access to the link for a sequence of exchanges
///
/// Dropping the guard releases the link; the connection itself stays open.
pub struct LinkGuard<'a> {
    manager: &'a LinkManager,
    slot: MutexGuard<'a, Option<Session>>,
}

impl LinkGuard<'_> {
    /// Connect if there is no live session
    ///
    /// A session whose link dropped on its own is discarded first, so this
    /// reconnects transparently after an unsolicited disconnect.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if let Some(session) = self.slot.as_ref() {
            if session.is_live() {
                return Ok(());
            }
            info!("Link dropped by device, reconnecting");
            self.take_session();
        }

        let device = self.manager.locator.locate().await?;
        let target = self.manager.locator.describe();
        let attempts = self.manager.connect_attempts;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let link_lost = LinkLostSignal::new();
            match device.connect(link_lost.clone()).await {
                Ok(connection) => {
                    info!("Connected to {} (attempt {}/{})", target, attempt, attempts);
                    *self.manager.live_signal() = Some(link_lost.clone());
                    *self.slot = Some(Session {
                        transport: connection.transport,
                        notifications: connection.notifications,
                        link_lost,
                    });
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt, attempts, target, e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }

        error!("Could not connect to {} after {} attempts", target, attempts);
        Err(FanSyncError::ConnectFailed {
            attempts,
            reason: last_error,
        })
    }

    /// Write a frame and wait for the next notification
    ///
    /// The frame is checked before anything reaches the transport; a frame
    /// that is not exactly 10 bytes behind the sentinel is refused with
    /// `MalformedFrame`. Notifications that arrived before the write are
    /// discarded so the reply returned belongs to this exchange.
    pub async fn send_and_await_reply(
        &mut self,
        frame: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        if let Err(e) = protocol::validate_outgoing(frame) {
            error!("Refusing to send malformed frame {}: {}", protocol::hex(frame), e);
            return Err(e);
        }

        let debug_frames = self.manager.debug_frames;
        let session = match self.slot.as_mut() {
            Some(session) if session.is_live() => session,
            _ => return Err(FanSyncError::Disconnected("no open link".to_string())),
        };

        while let Ok(stale) = session.notifications.try_recv() {
            debug!("Discarding unsolicited notification: {}", protocol::hex(&stale));
        }

        if debug_frames {
            debug!("TX: {}", protocol::hex(frame));
        }
        if let Err(e) = session.transport.write_command(frame).await {
            error!("Write failed: {}", e);
            return Err(e);
        }

        match tokio::time::timeout(timeout, session.notifications.recv()).await {
            Ok(Some(reply)) => {
                if debug_frames {
                    debug!("RX: {}", protocol::hex(&reply));
                }
                Ok(reply)
            }
            Ok(None) => {
                warn!("Notification stream closed while waiting for reply");
                self.take_session();
                Err(FanSyncError::Disconnected(
                    "notification stream closed".to_string(),
                ))
            }
            Err(_) => {
                warn!("No reply within {:?}", timeout);
                Err(FanSyncError::NoReply(timeout))
            }
        }
    }

    /// Close the link, ignoring transport errors; the slot is always cleared
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.take_session() {
            if let Err(e) = session.transport.disconnect().await {
                debug!("Ignoring error while disconnecting: {}", e);
            } else {
                debug!("Disconnected");
            }
        }
    }

    /// Default reply timeout of the owning manager
    pub fn reply_timeout(&self) -> Duration {
        self.manager.reply_timeout
    }

    fn take_session(&mut self) -> Option<Session> {
        self.manager.live_signal().take();
        self.slot.take()
    }
}
