//! Fehlertypen fuer Funkstille
//!
//! Zentraler Fehler-Enum fuer alles ausserhalb des Krypto-Pfads
//! (Protokoll, Konfiguration, Worker). Der Krypto-Pfad hat einen eigenen
//! Fehlertyp in `funkstille-crypto`.

use thiserror::Error;

/// Globaler Result-Alias fuer Funkstille
pub type Result<T> = std::result::Result<T, FunkstilleError>;

/// Alle moeglichen Fehler ausserhalb des Krypto-Pfads
#[derive(Debug, Error)]
pub enum FunkstilleError {
    // --- Protokoll ---
    #[error("Unbekannter Codec: '{0}'")]
    UnbekannterCodec(String),

    // --- Ressourcen ---
    #[error("Track nicht gefunden: {0}")]
    TrackNichtGefunden(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl FunkstilleError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }
}
