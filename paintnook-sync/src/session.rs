//! Session and participant records.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::conflict::MergeStrategy;

/// Characters used in session ids.
pub const SESSION_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const SESSION_ID_LEN: usize = 6;

/// Participant identification colors.
pub const PARTICIPANT_COLORS: [&str; 8] = [
    "#ef4444", "#f97316", "#eab308", "#22c55e", "#06b6d4", "#3b82f6", "#8b5cf6", "#ec4899",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub nickname: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
            role,
            color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Placeholder for an author seen only through their actions.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self::new(id, "Unknown", Role::Client)
    }
}

/// Options chosen by the host when creating a session. Unset fields fall
/// back to the engine's [`PriorityConfig`](crate::PriorityConfig).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOptions {
    pub allow_guest_draw: bool,
    pub host_priority: Option<bool>,
    pub conflict_mode: Option<MergeStrategy>,
    /// Host color, random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            allow_guest_draw: true,
            host_priority: None,
            conflict_mode: None,
            color: None,
        }
    }
}

/// Announced by the host on `session:created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub host: Participant,
    /// Hex SHA-256 of the session password.
    pub password_hash: Option<String>,
    /// With every optional field resolved.
    pub options: SessionOptions,
    /// ms since the Unix epoch
    pub created: u64,
}

pub fn generate_session_id() -> String {
    generate_session_id_with(&mut rand::rng())
}

pub fn generate_session_id_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SESSION_ID_LEN)
        .map(|_| SESSION_ID_ALPHABET[rng.random_range(0..SESSION_ID_ALPHABET.len())] as char)
        .collect()
}

pub fn pick_color() -> String {
    pick_color_with(&mut rand::rng())
}

pub fn pick_color_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    PARTICIPANT_COLORS[rng.random_range(0..PARTICIPANT_COLORS.len())].to_string()
}

/// Lowercase hex SHA-256 digest.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}
