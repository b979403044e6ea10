//! Fehlertypen fuer den Frame-Krypto-Pfad

use funkstille_core::types::{ParticipantIdentity, TrackId};
use funkstille_protocol::control::ErrorReason;
use thiserror::Error;

/// Fehler im Frame-Krypto-Pfad
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Kein Schluessel fuer Index {key_index}")]
    FehlenderSchluessel {
        participant: Option<ParticipantIdentity>,
        key_index: u8,
    },

    #[error("Entschluesselung mit Schluessel-Index {key_index} nach {versuche} Ratchet-Versuchen fehlgeschlagen")]
    UngueltigerSchluessel {
        participant: Option<ParticipantIdentity>,
        key_index: u8,
        versuche: u8,
    },

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),

    #[error("Ungueltige Frame-Daten: {0}")]
    UngueltigeDaten(String),

    #[error("Frame-Layout nicht unterstuetzt: {0}")]
    LayoutNichtUnterstuetzt(String),

    #[error("Kein Cryptor fuer {0}")]
    KeinCryptor(TrackId),

    #[error("Kein Teilnehmer angegeben (Session nutzt keinen gemeinsamen Schluessel)")]
    KeinTeilnehmer,

    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

impl CryptoError {
    /// Fehlerart fuer das Control-Plane-Ereignis
    pub fn grund(&self) -> ErrorReason {
        match self {
            Self::FehlenderSchluessel { .. } => ErrorReason::MissingKey,
            Self::UngueltigerSchluessel { .. } => ErrorReason::InvalidKey,
            _ => ErrorReason::InternalError,
        }
    }

    /// Layout-Fehler werden pro Frame nicht eskaliert (Log-Flut)
    pub fn ist_meldepflichtig(&self) -> bool {
        !matches!(self, Self::LayoutNichtUnterstuetzt(_))
    }
}
