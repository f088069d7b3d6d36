//! Ventabot: conversational commerce core — coalesces inbound message bursts,
//! claims them for exclusive processing, runs a tool-calling agent turn, and
//! delivers humanized replies through a messaging channel adapter.

pub mod api;
pub mod buffer;
pub mod config;
pub mod conversation;
pub mod db;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod llm;
pub mod messaging;
pub mod service;
pub mod tools;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tenant identifier type.
pub type TenantId = Arc<str>;

/// Contact identifier type (the customer's channel address, e.g. a phone number).
pub type ContactId = Arc<str>;

/// Composite identity of one buffered conversation: `(tenant, contact)`.
///
/// Stable for the lifetime of a buffered exchange and never reused across
/// tenants; doubles as the key of the per-conversation timer registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
}

impl ConversationKey {
    pub fn new(tenant_id: impl AsRef<str>, contact_id: impl AsRef<str>) -> Self {
        Self {
            tenant_id: Arc::from(tenant_id.as_ref()),
            contact_id: Arc::from(contact_id.as_ref()),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.contact_id)
    }
}

/// Outcome of handling one inbound fragment, reported to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InboundAction {
    /// Fragment appended to an open buffer; the quiet-period timer was rearmed.
    Buffered { pending: usize },
    /// Zero quiet period: the fragment was handed to the engine and a reply
    /// was produced inline.
    Responded,
    /// Fragment landed on a buffer already past its quiet-period deadline;
    /// the sweep will claim and drain it.
    Queued { pending: usize },
}

/// Kind of an extracted media reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    File,
}

impl MediaKind {
    /// Classify a file extension. Unknown extensions fall back to `File`.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" => MediaKind::Image,
            "mp4" | "mov" | "webm" | "avi" | "mkv" => MediaKind::Video,
            _ => MediaKind::File,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::File => write!(f, "file"),
        }
    }
}

/// A media reference extracted from agent text, sent after the text chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub url: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}
