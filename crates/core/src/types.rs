//! Gemeinsame Identifikations- und Medientypen fuer Funkstille
//!
//! IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Teilnehmer- und Track-Kennungen zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};

use crate::error::FunkstilleError;

/// Identitaet eines Teilnehmers in der Session (vom Signaling vergeben)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantIdentity(pub String);

impl ParticipantIdentity {
    /// Erstellt eine neue Identitaet
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kennung eines Media-Tracks
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    /// Erstellt eine neue Track-ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track:{}", self.0)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Codec eines Tracks (bestimmt welche Bytes eines Frames im Klartext bleiben)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Vp8,
    Vp9,
    H264,
    Av1,
    Opus,
}

impl Codec {
    /// Gibt true zurueck fuer Video-Codecs
    pub fn ist_video(&self) -> bool {
        !matches!(self, Self::Opus)
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::Vp8 => write!(f, "vp8"),
            Codec::Vp9 => write!(f, "vp9"),
            Codec::H264 => write!(f, "h264"),
            Codec::Av1 => write!(f, "av1"),
            Codec::Opus => write!(f, "opus"),
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = FunkstilleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vp8" => Ok(Self::Vp8),
            "vp9" => Ok(Self::Vp9),
            "h264" => Ok(Self::H264),
            "av1" => Ok(Self::Av1),
            "opus" => Ok(Self::Opus),
            other => Err(FunkstilleError::UnbekannterCodec(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// FrameKind
// ---------------------------------------------------------------------------

/// Art eines kodierten Frames, wie sie die Media-Pipeline meldet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Key,
    #[default]
    Delta,
    Audio,
    Empty,
}
