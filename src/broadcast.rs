// LabForge: Kathara lab compiler written in Rust
// Copyright (C) 2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Fan-out of log messages to all connected observers.
//!
//! A [`LogBroadcast`] is owned by the process that drives the labs. Observers call
//! [`LogBroadcast::subscribe`] and receive every message sent afterwards, until they drop their
//! [`LogSubscription`]. Messages sent before subscribing are never delivered.

use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::broadcast::{self, error::RecvError};

/// Number of messages a slow subscriber may lag behind before it misses messages.
pub const DEFAULT_CAPACITY: usize = 64;

/// Severity of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Progress information
    Log,
    /// Something went wrong, but the operation continues.
    Warn,
    /// The operation failed.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LogLevel::Log => "log",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

/// A single message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogMessage {
    /// Severity
    pub level: LogLevel,
    /// The message
    pub message: String,
    /// Time at which the message was sent (RFC 3339).
    pub time: String,
}

impl LogMessage {
    /// Create a new message with the current time.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        let time = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            level,
            message: message.into(),
            time,
        }
    }

    /// Render the message as a server-sent event: `data: <json>\n\n`.
    pub fn to_event_stream(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// Broadcast channel for log messages.
#[derive(Debug, Clone)]
pub struct LogBroadcast {
    sender: broadcast::Sender<LogMessage>,
}

impl Default for LogBroadcast {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LogBroadcast {
    /// Create a new broadcast. Each subscriber buffers at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all messages sent from now on.
    pub fn subscribe(&self) -> LogSubscription {
        LogSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Send a message to all current subscribers, and forward it to the logger. Returns the
    /// number of subscribers that received it.
    pub fn send(&self, level: LogLevel, message: impl Into<String>) -> usize {
        let msg = LogMessage::new(level, message);
        match level {
            LogLevel::Log => log::info!("{}", msg.message),
            LogLevel::Warn => log::warn!("{}", msg.message),
            LogLevel::Error => log::error!("{}", msg.message),
        }
        // sending only fails if nobody is subscribed.
        self.sender.send(msg).unwrap_or(0)
    }

    /// Send a progress message.
    pub fn log(&self, message: impl Into<String>) -> usize {
        self.send(LogLevel::Log, message)
    }

    /// Send a warning.
    pub fn warn(&self, message: impl Into<String>) -> usize {
        self.send(LogLevel::Warn, message)
    }

    /// Send an error.
    pub fn error(&self, message: impl Into<String>) -> usize {
        self.send(LogLevel::Error, message)
    }
}

/// A subscription to a [`LogBroadcast`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct LogSubscription {
    receiver: broadcast::Receiver<LogMessage>,
}

impl LogSubscription {
    /// Wait for the next message. Returns `None` once the broadcast is gone. If the subscriber
    /// lagged behind, the missed messages are skipped.
    pub async fn recv(&mut self) -> Option<LogMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(n)) => {
                    log::warn!("[broadcast] Subscriber lagged behind, skipped {n} messages")
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Get the next message if one is available.
    pub fn try_recv(&mut self) -> Option<LogMessage> {
        use broadcast::error::TryRecvError;
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => return Some(msg),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
