//! # funkstille-crypto
//!
//! Frame-Ende-zu-Ende-Verschluesselung fuer Funkstille.
//!
//! ## Module
//! - `e2e` - Layout-Analyse, Trailer, Schluesselringe, Frame-Cryptor, Worker
//! - `types` - Gemeinsame Typen (SecretBytes, KeySet, Laengen)
//! - `error` - Fehlertypen

pub mod e2e;
pub mod error;
pub mod types;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult};
pub use types::{KeySet, SecretBytes};

pub use e2e::{
    compute_layout, hkdf_derive, Av1Metadaten, ByteRange, E2eeSession, E2eeWorker,
    EncryptionLayout, EventSender, FrameCryptor, FrameTrailer, ParticipantKeyHandler,
    RatchetErgebnis, SifGuard,
};
