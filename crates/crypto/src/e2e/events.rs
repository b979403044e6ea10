//! Ereignis-Kanal zur Control Plane
//!
//! Ereignisse werden nicht-blockierend gesendet. Ist die Queue voll,
//! wird das Ereignis verworfen und geloggt; der Frame-Pfad wartet nie
//! auf die Control Plane.

use funkstille_core::types::ParticipantIdentity;
use funkstille_protocol::control::WorkerEvent;
use tokio::sync::mpsc;

use crate::error::CryptoError;

/// Sender-Handle fuer Worker-Ereignisse
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::Sender<WorkerEvent>>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<WorkerEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sender ohne Empfaenger (Ereignisse werden verworfen)
    pub fn stumm() -> Self {
        Self { tx: None }
    }

    /// Erstellt einen Kanal mit begrenzter Queue
    pub fn kanal(groesse: usize) -> (Self, mpsc::Receiver<WorkerEvent>) {
        let (tx, rx) = mpsc::channel(groesse.max(1));
        (Self::new(tx), rx)
    }

    /// Sendet ein Ereignis, gibt `false` zurueck wenn es verworfen wurde
    pub fn senden(&self, event: WorkerEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Ereignis-Queue voll, Ereignis verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Ereignis-Empfaenger geschlossen");
                false
            }
        }
    }

    /// Meldet einen Frame-Fehler als `error`-Ereignis
    pub fn fehler_melden(&self, fehler: &CryptoError, participant: Option<&ParticipantIdentity>) {
        self.senden(WorkerEvent::Error {
            reason: fehler.grund(),
            participant_identity: participant.cloned(),
            message: fehler.to_string(),
        });
    }
}
