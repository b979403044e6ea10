//! funkstille-protocol – Nachrichten an der Grenze der E2EE-Engine
//!
//! Dieses Crate definiert die Control-Plane-Nachrichten zwischen der
//! umgebenden Anwendung (Key Provider, Signaling) und der E2EE-Engine
//! sowie die Frame-Struktur der Transform-Pipeline.

pub mod control;
pub mod frame;

pub(crate) mod b64;

pub use control::{ErrorReason, KeyProviderOptions, WorkerEvent, WorkerRequest};
pub use frame::{EncodedFrame, TransformDirection};
