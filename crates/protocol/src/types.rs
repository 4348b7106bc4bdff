use std::fmt;

use serde::{Deserialize, Serialize};

const USER_SUFFIX: &str = "@s.whatsapp.net";
const GROUP_SUFFIX: &str = "@g.us";

/// A chat-network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid(String);

impl Jid {
    /// Address of a user, given a bare phone number or a full address.
    pub fn user(number: &str) -> Self {
        let number = number.trim();
        if number.contains('@') {
            Self(number.to_string())
        } else {
            Self(format!("{number}{USER_SUFFIX}"))
        }
    }

    /// Address of a group; the `@g.us` suffix is added when missing.
    pub fn group(id: &str) -> Self {
        let id = id.trim();
        if id.ends_with(GROUP_SUFFIX) {
            Self(id.to_string())
        } else {
            Self(format!("{id}{GROUP_SUFFIX}"))
        }
    }

    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_SUFFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media category, chosen from the MIME type prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image") {
            Self::Image
        } else if mime.starts_with("video") {
            Self::Video
        } else if mime.starts_with("audio") {
            Self::Audio
        } else {
            Self::Document
        }
    }
}

/// Message body handed to the protocol library untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundContent {
    Text(String),
    Media {
        kind: MediaKind,
        mime_type: String,
        bytes: Vec<u8>,
        caption: Option<String>,
        file_name: Option<String>,
    },
}

impl OutboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn media(
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
        caption: Option<String>,
        file_name: Option<String>,
    ) -> Self {
        let mime_type = mime_type.into();
        Self::Media {
            kind: MediaKind::from_mime(&mime_type),
            mime_type,
            bytes,
            caption,
            file_name,
        }
    }

    /// Short description for logs; never includes the body.
    pub fn describe(&self) -> String {
        match self {
            Self::Text(t) => format!("text({} chars)", t.chars().count()),
            Self::Media { kind, bytes, .. } => format!("{kind:?}({} bytes)", bytes.len()),
        }
    }
}

/// Acknowledgement returned by the library for a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceipt {
    pub message_id: String,
    pub to: Jid,
}

/// A group the session participates in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub participants: usize,
}

/// Wire protocol version, e.g. `2.3000.1015901307`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion(pub String);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
