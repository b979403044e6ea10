//! Session-Zustand der E2EE-Engine
//!
//! Haelt alles, was nicht an einem einzelnen Track haengt: Optionen,
//! Aktivierung pro Teilnehmer, Schluesselringe und RTP-Payload-Maps.
//! Teilnehmer, die die Session verlassen, werden vollstaendig entfernt.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use funkstille_core::types::{Codec, ParticipantIdentity};
use funkstille_protocol::control::KeyProviderOptions;
use parking_lot::RwLock;

use crate::e2e::events::EventSender;
use crate::e2e::key_handler::ParticipantKeyHandler;
use crate::error::{CryptoError, CryptoResult};

#[derive(Debug)]
struct SessionInner {
    options: RwLock<KeyProviderOptions>,
    aktiviert: DashMap<ParticipantIdentity, bool>,
    key_handler: DashMap<ParticipantIdentity, Arc<ParticipantKeyHandler>>,
    gemeinsamer_handler: RwLock<Option<Arc<ParticipantKeyHandler>>>,
    rtp_maps: DashMap<ParticipantIdentity, HashMap<u8, Codec>>,
    events: EventSender,
}

/// Geteilter Session-Zustand (billig klonbar)
#[derive(Debug, Clone)]
pub struct E2eeSession {
    inner: Arc<SessionInner>,
}

impl E2eeSession {
    pub fn new(options: KeyProviderOptions, events: EventSender) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                options: RwLock::new(options),
                aktiviert: DashMap::new(),
                key_handler: DashMap::new(),
                gemeinsamer_handler: RwLock::new(None),
                rtp_maps: DashMap::new(),
                events,
            }),
        }
    }

    /// Uebernimmt neue Optionen und verwirft alle Schluesselringe
    pub fn init(&self, options: KeyProviderOptions) {
        tracing::info!(
            shared_key = options.shared_key,
            ratchet_window_size = options.ratchet_window_size,
            failure_tolerance = options.failure_tolerance,
            "E2EE-Session initialisiert"
        );
        *self.inner.options.write() = options;
        self.inner.key_handler.clear();
        *self.inner.gemeinsamer_handler.write() = None;
    }

    pub fn options(&self) -> KeyProviderOptions {
        self.inner.options.read().clone()
    }

    pub fn ratchet_window_size(&self) -> u8 {
        self.inner.options.read().ratchet_window_size
    }

    pub fn discard_frame_when_cryptor_not_ready(&self) -> bool {
        self.inner.options.read().discard_frame_when_cryptor_not_ready
    }

    pub fn events(&self) -> &EventSender {
        &self.inner.events
    }

    pub fn set_enabled(&self, participant: &ParticipantIdentity, enabled: bool) {
        self.inner.aktiviert.insert(participant.clone(), enabled);
    }

    /// Unbekannte Teilnehmer gelten als deaktiviert
    pub fn ist_aktiviert(&self, participant: &ParticipantIdentity) -> bool {
        self.inner
            .aktiviert
            .get(participant)
            .map(|e| *e)
            .unwrap_or(false)
    }

    /// Schluesselring fuer einen Teilnehmer, bei Bedarf neu angelegt
    ///
    /// Im Shared-Key-Modus teilen sich alle Teilnehmer einen Ring; dann
    /// darf `participant` fehlen.
    pub fn key_handler(
        &self,
        participant: Option<&ParticipantIdentity>,
    ) -> CryptoResult<Arc<ParticipantKeyHandler>> {
        let options = self.options();
        if options.shared_key {
            if let Some(handler) = self.inner.gemeinsamer_handler.read().as_ref() {
                return Ok(Arc::clone(handler));
            }
            let mut gemeinsam = self.inner.gemeinsamer_handler.write();
            let handler = gemeinsam.get_or_insert_with(|| {
                Arc::new(ParticipantKeyHandler::new(
                    None,
                    &options,
                    self.inner.events.clone(),
                ))
            });
            return Ok(Arc::clone(handler));
        }

        let participant = participant.ok_or(CryptoError::KeinTeilnehmer)?;
        let handler = self
            .inner
            .key_handler
            .entry(participant.clone())
            .or_insert_with(|| {
                tracing::debug!(participant = %participant, "Schluesselring angelegt");
                Arc::new(ParticipantKeyHandler::new(
                    Some(participant.clone()),
                    &options,
                    self.inner.events.clone(),
                ))
            });
        Ok(Arc::clone(handler.value()))
    }

    pub fn set_rtp_map(&self, participant: &ParticipantIdentity, map: HashMap<u8, Codec>) {
        self.inner.rtp_maps.insert(participant.clone(), map);
    }

    /// Codec laut RTP-Payload-Map des Teilnehmers
    pub fn rtp_codec(&self, participant: &ParticipantIdentity, payload_type: u8) -> Option<Codec> {
        self.inner
            .rtp_maps
            .get(participant)
            .and_then(|map| map.get(&payload_type).copied())
    }

    /// Entfernt allen Zustand eines Teilnehmers
    pub fn participant_entfernen(&self, participant: &ParticipantIdentity) {
        if let Some((_, handler)) = self.inner.key_handler.remove(participant) {
            handler.reset();
        }
        self.inner.aktiviert.remove(participant);
        self.inner.rtp_maps.remove(participant);
        tracing::info!(participant = %participant, "Teilnehmer entfernt, Schluessel verworfen");
    }

    /// Anzahl angelegter Schluesselringe (ohne gemeinsamen Ring)
    pub fn anzahl_key_handler(&self) -> usize {
        self.inner.key_handler.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(shared_key: bool) -> E2eeSession {
        E2eeSession::new(
            KeyProviderOptions {
                shared_key,
                ..KeyProviderOptions::default()
            },
            EventSender::stumm(),
        )
    }

    #[test]
    fn handler_wird_pro_teilnehmer_wiederverwendet() {
        let s = session(false);
        let alice = ParticipantIdentity::new("alice");
        let a1 = s.key_handler(Some(&alice)).unwrap();
        let a2 = s.key_handler(Some(&alice)).unwrap();
        let b = s.key_handler(Some(&ParticipantIdentity::new("bob"))).unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(s.anzahl_key_handler(), 2);
    }

    #[test]
    fn ohne_teilnehmer_nur_im_shared_modus() {
        assert!(matches!(
            session(false).key_handler(None),
            Err(CryptoError::KeinTeilnehmer)
        ));

        let s = session(true);
        let gemeinsam = s.key_handler(None).unwrap();
        let fuer_alice = s.key_handler(Some(&ParticipantIdentity::new("alice"))).unwrap();
        assert!(Arc::ptr_eq(&gemeinsam, &fuer_alice));
        assert!(gemeinsam.participant().is_none());
    }

    #[test]
    fn aktivierung() {
        let s = session(false);
        let alice = ParticipantIdentity::new("alice");
        assert!(!s.ist_aktiviert(&alice));
        s.set_enabled(&alice, true);
        assert!(s.ist_aktiviert(&alice));
        s.set_enabled(&alice, false);
        assert!(!s.ist_aktiviert(&alice));
    }

    #[test]
    fn rtp_map_lookup() {
        let s = session(false);
        let alice = ParticipantIdentity::new("alice");
        s.set_rtp_map(&alice, HashMap::from([(96, Codec::Vp8), (45, Codec::Av1)]));
        assert_eq!(s.rtp_codec(&alice, 45), Some(Codec::Av1));
        assert_eq!(s.rtp_codec(&alice, 100), None);
        assert_eq!(s.rtp_codec(&ParticipantIdentity::new("bob"), 96), None);
    }

    #[tokio::test]
    async fn teilnehmer_entfernen_verwirft_schluessel() {
        let s = session(false);
        let alice = ParticipantIdentity::new("alice");
        s.set_enabled(&alice, true);
        let handler = s.key_handler(Some(&alice)).unwrap();
        handler.set_key(b"geheim", 0).await.unwrap();

        s.participant_entfernen(&alice);
        assert_eq!(s.anzahl_key_handler(), 0);
        assert!(!s.ist_aktiviert(&alice));
        assert!(handler.get_key_set(None).is_none());
    }

    #[test]
    fn init_verwirft_ringe() {
        let s = session(false);
        s.key_handler(Some(&ParticipantIdentity::new("alice"))).unwrap();
        s.init(KeyProviderOptions {
            ratchet_window_size: 3,
            ..KeyProviderOptions::default()
        });
        assert_eq!(s.anzahl_key_handler(), 0);
        assert_eq!(s.ratchet_window_size(), 3);
    }
}
