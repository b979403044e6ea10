//! Frame-Ende-zu-Ende-Verschluesselung
//!
//! Kodierte Media-Frames werden zwischen Encoder und Packetizer (Senden)
//! bzw. Depacketizer und Decoder (Empfangen) verschluesselt. Der SFU sieht
//! nur Klartext-Header, die er zum Weiterleiten braucht.
//!
//! ## Bausteine
//! 1. `layout` - welche Bytes eines Frames Klartext bleiben (pro Codec)
//! 2. `trailer` - IV und Schluessel-Index am Frame-Ende
//! 3. `key_handler` - Schluesselring pro Teilnehmer mit HKDF-Ratchet
//! 4. `frame_cryptor` - Ver-/Entschluesselung pro Track
//! 5. `worker` - Control-Plane-Anfragen und Track-Pipelines

pub mod aead;
pub mod derive;
pub mod events;
pub mod frame_cryptor;
pub mod key_handler;
pub mod layout;
pub mod session;
pub mod sif_guard;
pub mod trailer;
pub mod worker;

pub use derive::{hkdf_derive, RatchetErgebnis};
pub use events::EventSender;
pub use frame_cryptor::FrameCryptor;
pub use key_handler::ParticipantKeyHandler;
pub use layout::{compute_layout, ByteRange, EncryptionLayout};
pub use session::E2eeSession;
pub use sif_guard::SifGuard;
pub use trailer::{Av1Metadaten, FrameTrailer};
pub use worker::E2eeWorker;
