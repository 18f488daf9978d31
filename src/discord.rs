//! # Discord Rich Presence
//!
//! After a successful launch the formatted presence payload is shown in the
//! user's Discord profile over the local IPC socket. Discord not running, or
//! an unknown client id, is never a launch failure: the session logs a warning
//! and every later call becomes a no-op.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Result, anyhow};
use discord_rich_presence::{DiscordIpc, DiscordIpcClient, activity};
use log::{info, warn};

use crate::presence::PresencePayload;

/// Discord rejects activity strings longer than this.
const MAX_FIELD_CHARS: usize = 127;

/// The IPC calls a presence session needs.
pub trait PresenceTransport {
    fn connect(&mut self) -> Result<()>;
    fn set_activity(&mut self, details: &str, state: &str, started_at: i64) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// The real transport: Discord's local IPC socket (named pipe on Windows).
pub struct DiscordTransport {
    client_id: String,
    client: Option<DiscordIpcClient>,
}

impl DiscordTransport {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.trim().to_string(),
            client: None,
        }
    }

    fn client(&mut self) -> Result<&mut DiscordIpcClient> {
        self.client.as_mut().ok_or_else(|| anyhow!("not connected"))
    }
}

impl PresenceTransport for DiscordTransport {
    fn connect(&mut self) -> Result<()> {
        let mut client = DiscordIpcClient::new(&self.client_id).map_err(|e| anyhow!(e.to_string()))?;
        client.connect().map_err(|e| anyhow!(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    fn set_activity(&mut self, details: &str, state: &str, started_at: i64) -> Result<()> {
        let activity = activity::Activity::new()
            .details(details)
            .state(state)
            .timestamps(activity::Timestamps::new().start(started_at));
        self.client()?
            .set_activity(activity)
            .map_err(|e| anyhow!(e.to_string()))
    }

    fn clear(&mut self) -> Result<()> {
        self.client()?.clear_activity().map_err(|e| anyhow!(e.to_string()))
    }

    fn close(&mut self) -> Result<()> {
        let mut client = self.client.take().ok_or_else(|| anyhow!("not connected"))?;
        client.close().map_err(|e| anyhow!(e.to_string()))
    }
}

/// One connection's worth of presence updates. Failures are logged, never returned.
pub struct PresenceSession<T: PresenceTransport> {
    transport: T,
    connected: bool,
    started_at: i64,
}

impl<T: PresenceTransport> PresenceSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connected: false,
            started_at: 0,
        }
    }

    pub fn connect(&mut self) -> bool {
        match self.transport.connect() {
            Ok(()) => {
                self.connected = true;
                self.started_at = unix_now();
                info!("Discord RPC connected.");
            }
            Err(e) => {
                self.connected = false;
                warn!("Discord RPC failed to connect: {}", e);
            }
        }
        self.connected
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set(&mut self, payload: &PresencePayload) {
        if !self.connected {
            return;
        }
        let details = truncate(&payload.details);
        let state = truncate(&payload.state);
        if let Err(e) = self.transport.set_activity(details, state, self.started_at) {
            warn!("Discord RPC update failed: {}", e);
        }
    }

    pub fn clear(&mut self) {
        if !self.connected {
            return;
        }
        match self.transport.clear() {
            Ok(()) => info!("Discord RPC cleared."),
            Err(e) => warn!("Discord RPC clear failed: {}", e),
        }
    }

    pub fn close(&mut self) {
        if !self.connected {
            return;
        }
        match self.transport.close() {
            Ok(()) => {
                self.connected = false;
                info!("Discord RPC closed.");
            }
            Err(e) => warn!("Discord RPC close failed: {}", e),
        }
    }
}

/// Connects to Discord if presence is turned on. `None` means "continue without it".
pub fn connect_if_enabled(enabled: bool, client_id: &str) -> Option<PresenceSession<DiscordTransport>> {
    if !enabled || client_id.trim().is_empty() {
        info!("Discord RPC disabled.");
        return None;
    }
    let mut session = PresenceSession::new(DiscordTransport::new(client_id));
    if session.connect() {
        Some(session)
    } else {
        warn!("Discord not connected; continue without RPC.");
        None
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_FIELD_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
