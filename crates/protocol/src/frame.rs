//! Frame-Typen der Transform-Pipeline
//!
//! Die Media-Pipeline uebergibt der Engine kodierte Frames samt der
//! RTP-Metadaten, die fuer den IV-Aufbau und die Codec-Erkennung
//! gebraucht werden.

use funkstille_core::types::FrameKind;
use serde::{Deserialize, Serialize};

/// Richtung einer Transform-Pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformDirection {
    /// Senden: Klartext -> verschluesselt
    Encode,
    /// Empfangen: verschluesselt -> Klartext
    Decode,
}

impl std::fmt::Display for TransformDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformDirection::Encode => write!(f, "encode"),
            TransformDirection::Decode => write!(f, "decode"),
        }
    }
}

/// Ein kodierter Audio- oder Video-Frame
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedFrame {
    /// Frame-Bytes (Klartext oder verschluesselt, je nach Richtung)
    #[serde(with = "crate::b64")]
    pub data: Vec<u8>,
    /// Frame-Art laut Encoder
    #[serde(default)]
    pub kind: FrameKind,
    /// Synchronisation Source des RTP-Streams
    #[serde(default)]
    pub ssrc: u32,
    /// RTP-Zeitstempel
    #[serde(default)]
    pub timestamp: u32,
    /// RTP-Payload-Type (nur beim Empfang bekannt)
    #[serde(default)]
    pub payload_type: Option<u8>,
}

impl EncodedFrame {
    /// Erstellt einen Frame ohne RTP-Metadaten
    pub fn new(data: Vec<u8>, kind: FrameKind) -> Self {
        Self {
            data,
            kind,
            ssrc: 0,
            timestamp: 0,
            payload_type: None,
        }
    }

    /// Setzt SSRC und RTP-Zeitstempel
    pub fn mit_rtp(mut self, ssrc: u32, timestamp: u32) -> Self {
        self.ssrc = ssrc;
        self.timestamp = timestamp;
        self
    }

    /// Setzt den RTP-Payload-Type
    pub fn mit_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = Some(payload_type);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// Frame-Inhalt gehoert nicht ins Log
impl std::fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("len", &self.data.len())
            .field("kind", &self.kind)
            .field("ssrc", &self.ssrc)
            .field("timestamp", &self.timestamp)
            .field("payload_type", &self.payload_type)
            .finish()
    }
}
