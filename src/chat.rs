//! Chat display collaborator
//!
//! The party layer forwards chat lines unmodified; rendering them is someone
//! else's job. Two sinks ship here: a shared log and a channel forwarder.

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::protocol::PeerId;

/// One chat line as handed to the display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEntry {
    /// Transport-level sender, `None` for lines typed locally
    pub from: Option<PeerId>,
    /// Display name carried in the message
    pub sender_name: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl ChatEntry {
    pub fn remote(from: PeerId, sender_name: String, text: String) -> Self {
        Self {
            from: Some(from),
            sender_name,
            text,
            received_at: Utc::now(),
        }
    }

    pub fn local(sender_name: String, text: String) -> Self {
        Self {
            from: None,
            sender_name,
            text,
            received_at: Utc::now(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.from.is_none()
    }
}

/// Receives chat lines for display
pub trait ChatSink {
    fn deliver(&mut self, entry: ChatEntry);
}

/// Bounded in-memory chat history, cheap to clone and inspect
#[derive(Clone)]
pub struct SharedChatLog {
    entries: Arc<Mutex<Vec<ChatEntry>>>,
    limit: usize,
}

impl SharedChatLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            limit,
        }
    }

    pub fn entries(&self) -> Vec<ChatEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for SharedChatLog {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChatSink for SharedChatLog {
    fn deliver(&mut self, entry: ChatEntry) {
        let mut entries = self.entries.lock();
        entries.push(entry);
        let excess = entries.len().saturating_sub(self.limit);
        if excess > 0 {
            entries.drain(..excess);
        }
    }
}

/// Forwards chat lines to another thread
pub struct ChannelChatSink {
    tx: Sender<ChatEntry>,
}

impl ChannelChatSink {
    pub fn new(tx: Sender<ChatEntry>) -> Self {
        Self { tx }
    }
}

impl ChatSink for ChannelChatSink {
    fn deliver(&mut self, entry: ChatEntry) {
        if self.tx.try_send(entry).is_err() {
            tracing::debug!("Chat display is not keeping up, line dropped");
        }
    }
}
