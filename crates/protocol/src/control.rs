//! Control-Plane-Protokoll der E2EE-Engine
//!
//! Definiert alle Steuerungsnachrichten zwischen der umgebenden Anwendung
//! (Key Provider, Signaling, Media-Pipeline) und der E2EE-Engine.
//!
//! ## Design
//! - Fire-and-forget: Anfragen haben keine Request-ID, Bestaetigungen gibt
//!   es nur fuer `init` und `enable`
//! - JSON-Serialisierung via serde (nicht zeitkritisch)
//! - Tagged Enums (`kind`) fuer typsichere Nachrichtentypen
//! - Binaerfelder (Schluessel, SIF-Trailer) als Base64-String

use std::collections::HashMap;

use funkstille_core::types::{Codec, ParticipantIdentity, TrackId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Key-Provider-Optionen
// ---------------------------------------------------------------------------

/// Standard-Salt fuer Schluessel-Ableitung und Ratchet
pub const STANDARD_RATCHET_SALT: &str = "FunkstilleFrameKey";

/// Standard-Anzahl Ratchet-Versuche beim Entschluesseln
pub const STANDARD_RATCHET_FENSTER: u8 = 8;

/// Standard-Toleranz fuer aufeinanderfolgende Entschluesselungsfehler
pub const STANDARD_FEHLER_TOLERANZ: i32 = 10;

/// Optionen des Key Providers, gelten fuer alle Teilnehmer der Session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeyProviderOptions {
    /// Ein gemeinsamer Schluesselring fuer alle Teilnehmer
    pub shared_key: bool,
    /// Salt fuer HKDF (Schluessel-Ableitung und Ratchet)
    pub ratchet_salt: String,
    /// Maximale Ratchet-Versuche pro fehlgeschlagenem Frame (0 = kein Ratchet)
    pub ratchet_window_size: u8,
    /// Fehler-Toleranz bevor ein Schluessel als ungueltig gilt (negativ = nie)
    pub failure_tolerance: i32,
    /// Frames ohne Schluessel verwerfen statt im Klartext durchzureichen
    pub discard_frame_when_cryptor_not_ready: bool,
}

impl Default for KeyProviderOptions {
    fn default() -> Self {
        Self {
            shared_key: false,
            ratchet_salt: STANDARD_RATCHET_SALT.into(),
            ratchet_window_size: STANDARD_RATCHET_FENSTER,
            failure_tolerance: STANDARD_FEHLER_TOLERANZ,
            discard_frame_when_cryptor_not_ready: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Anfragen an die Engine
// ---------------------------------------------------------------------------

/// Steuerungsnachricht an die E2EE-Engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerRequest {
    /// Initialisiert die Engine mit den Key-Provider-Optionen
    Init {
        key_provider_options: KeyProviderOptions,
    },
    /// Schaltet die Verschluesselung fuer einen Teilnehmer ein oder aus
    Enable {
        participant_identity: ParticipantIdentity,
        enabled: bool,
    },
    /// Setzt Schluesselmaterial (ohne Identitaet: gemeinsamer Schluessel)
    SetKey {
        #[serde(default)]
        participant_identity: Option<ParticipantIdentity>,
        #[serde(with = "crate::b64")]
        key: Vec<u8>,
        #[serde(default)]
        key_index: u8,
    },
    /// Aendert den Codec eines Tracks
    UpdateCodec { track_id: TrackId, codec: Codec },
    /// Payload-Type -> Codec fuer die Empfangs-Tracks eines Teilnehmers
    SetRtpPayloadMap {
        participant_identity: ParticipantIdentity,
        map: HashMap<u8, Codec>,
    },
    /// Fordert einen Ratchet an (ohne Index: aktueller Index)
    RatchetRequest {
        #[serde(default)]
        participant_identity: Option<ParticipantIdentity>,
        #[serde(default)]
        key_index: Option<u8>,
    },
    /// Setzt den Trailer, an dem vom Server injizierte Frames erkannt werden
    SetSifTrailer {
        #[serde(with = "crate::b64")]
        trailer: Vec<u8>,
    },
    /// Entfernt die Transform-Pipeline eines Tracks
    RemoveTransform { track_id: TrackId },
    /// Teilnehmer hat die Session verlassen: Schluessel verwerfen
    ParticipantLeft {
        participant_identity: ParticipantIdentity,
    },
}

impl WorkerRequest {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Ereignisse der Engine
// ---------------------------------------------------------------------------

/// Fehlerart, wie sie nach aussen gemeldet wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorReason {
    /// Kein Schluessel fuer den benoetigten Index
    MissingKey,
    /// Entschluesselung trotz Ratchet-Fenster fehlgeschlagen
    InvalidKey,
    /// Unerwarteter Fehler im Krypto-Pfad
    InternalError,
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorReason::MissingKey => write!(f, "missing_key"),
            ErrorReason::InvalidKey => write!(f, "invalid_key"),
            ErrorReason::InternalError => write!(f, "internal_error"),
        }
    }
}

/// Ereignis der E2EE-Engine an die umgebende Anwendung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerEvent {
    /// Fehler in einem Track (der Track degradiert, die Engine laeuft weiter)
    Error {
        reason: ErrorReason,
        participant_identity: Option<ParticipantIdentity>,
        message: String,
    },
    /// Ein Schluessel wurde geratchet (zur Weitergabe an andere Endpunkte)
    RatchetKey {
        participant_identity: Option<ParticipantIdentity>,
        key_index: u8,
        #[serde(with = "crate::b64")]
        material: Vec<u8>,
    },
    /// Bestaetigung fuer `init`
    InitAck,
    /// Bestaetigung fuer `enable`
    EnableAck {
        participant_identity: ParticipantIdentity,
        enabled: bool,
    },
}

impl WorkerEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_optionen() {
        let opts = KeyProviderOptions::default();
        assert!(!opts.shared_key);
        assert_eq!(opts.ratchet_window_size, 8);
        assert_eq!(opts.failure_tolerance, 10);
        assert_eq!(opts.ratchet_salt, STANDARD_RATCHET_SALT);
    }

    #[test]
    fn init_mit_teilweisen_optionen() {
        let json = r#"{"kind":"init","keyProviderOptions":{"sharedKey":true,"ratchetWindowSize":0}}"#;
        let req = WorkerRequest::from_json(json).unwrap();
        if let WorkerRequest::Init { key_provider_options } = req {
            assert!(key_provider_options.shared_key);
            assert_eq!(key_provider_options.ratchet_window_size, 0);
            // Nicht angegebene Felder behalten Standardwerte
            assert_eq!(key_provider_options.failure_tolerance, 10);
        } else {
            panic!("Erwartet Init-Nachricht");
        }
    }

    #[test]
    fn set_key_mit_base64_schluessel() {
        let json = r#"{"kind":"setKey","participantIdentity":"alice","key":"AQIDBA==","keyIndex":3}"#;
        let req = WorkerRequest::from_json(json).unwrap();
        assert_eq!(
            req,
            WorkerRequest::SetKey {
                participant_identity: Some(ParticipantIdentity::new("alice")),
                key: vec![1, 2, 3, 4],
                key_index: 3,
            }
        );
    }

    #[test]
    fn set_key_ohne_identitaet_ist_gemeinsam() {
        let json = r#"{"kind":"setKey","key":"AA=="}"#;
        let req = WorkerRequest::from_json(json).unwrap();
        assert!(matches!(
            req,
            WorkerRequest::SetKey { participant_identity: None, key_index: 0, .. }
        ));
    }

    #[test]
    fn rtp_payload_map_serialisierung() {
        let mut map = HashMap::new();
        map.insert(96u8, Codec::Vp8);
        map.insert(45u8, Codec::Av1);
        let req = WorkerRequest::SetRtpPayloadMap {
            participant_identity: ParticipantIdentity::new("bob"),
            map,
        };
        let json = req.to_json().unwrap();
        assert_eq!(WorkerRequest::from_json(&json).unwrap(), req);
    }

    #[test]
    fn ratchet_key_event_serialisierung() {
        let event = WorkerEvent::RatchetKey {
            participant_identity: Some(ParticipantIdentity::new("carol")),
            key_index: 2,
            material: vec![0xAA; 4],
        };
        let json = event.to_json().unwrap();
        assert!(json.contains("\"kind\":\"ratchetKey\""));
        assert!(json.contains("\"keyIndex\":2"));
        assert!(json.contains("\"material\":\"qqqqqg==\""));
        assert_eq!(WorkerEvent::from_json(&json).unwrap(), event);
    }

    #[test]
    fn error_reasons_serialisierbar() {
        for reason in [
            ErrorReason::MissingKey,
            ErrorReason::InvalidKey,
            ErrorReason::InternalError,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            let decoded: ErrorReason = serde_json::from_str(&json).unwrap();
            assert_eq!(reason, decoded);
        }
        assert_eq!(
            serde_json::to_string(&ErrorReason::MissingKey).unwrap(),
            "\"missingKey\""
        );
    }

    #[test]
    fn ungueltige_nachricht_schlaegt_fehl() {
        assert!(WorkerRequest::from_json(r#"{"kind":"gibtsNicht"}"#).is_err());
        assert!(WorkerRequest::from_json(r#"{"kind":"setKey","key":"%%%"}"#).is_err());
    }
}
