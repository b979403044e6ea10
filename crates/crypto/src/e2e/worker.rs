//! E2EE-Worker: Einstiegspunkt der Control Plane
//!
//! Nimmt [`WorkerRequest`]s entgegen, verwaltet einen [`FrameCryptor`]
//! pro Track und startet deren Transform-Pipelines als Tasks.

use std::sync::Arc;

use dashmap::DashMap;
use funkstille_core::types::{Codec, ParticipantIdentity, TrackId};
use funkstille_protocol::control::{KeyProviderOptions, WorkerEvent, WorkerRequest};
use funkstille_protocol::frame::{EncodedFrame, TransformDirection};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::e2e::events::EventSender;
use crate::e2e::frame_cryptor::FrameCryptor;
use crate::e2e::session::E2eeSession;
use crate::error::{CryptoError, CryptoResult};

/// Verwaltet Session und Cryptors aller Tracks
#[derive(Debug)]
pub struct E2eeWorker {
    session: E2eeSession,
    cryptors: DashMap<TrackId, Arc<FrameCryptor>>,
    pipelines: DashMap<TrackId, JoinHandle<()>>,
    sif_trailer: RwLock<Option<Vec<u8>>>,
}

impl E2eeWorker {
    pub fn new(options: KeyProviderOptions, events: EventSender) -> Self {
        Self {
            session: E2eeSession::new(options, events),
            cryptors: DashMap::new(),
            pipelines: DashMap::new(),
            sif_trailer: RwLock::new(None),
        }
    }

    pub fn session(&self) -> &E2eeSession {
        &self.session
    }

    /// Verarbeitet eine Anfrage; Fehler werden zusaetzlich als Ereignis gemeldet
    pub async fn handle(&self, anfrage: WorkerRequest) -> CryptoResult<()> {
        let participant = match &anfrage {
            WorkerRequest::SetKey {
                participant_identity,
                ..
            }
            | WorkerRequest::RatchetRequest {
                participant_identity,
                ..
            } => participant_identity.clone(),
            _ => None,
        };

        let ergebnis = self.verarbeiten(anfrage).await;
        if let Err(e) = &ergebnis {
            tracing::warn!(participant = ?participant, "Anfrage fehlgeschlagen: {e}");
            self.session.events().fehler_melden(e, participant.as_ref());
        }
        ergebnis
    }

    async fn verarbeiten(&self, anfrage: WorkerRequest) -> CryptoResult<()> {
        match anfrage {
            WorkerRequest::Init {
                key_provider_options,
            } => {
                self.session.init(key_provider_options);
                // Bestehende Cryptors auf die neuen Ringe umhaengen
                for eintrag in self.cryptors.iter() {
                    if let Some(participant) = eintrag.participant() {
                        let handler = self.session.key_handler(Some(&participant))?;
                        eintrag.set_participant(participant, handler);
                    }
                }
                self.session.events().senden(WorkerEvent::InitAck);
            }
            WorkerRequest::Enable {
                participant_identity,
                enabled,
            } => {
                self.session.set_enabled(&participant_identity, enabled);
                tracing::info!(participant = %participant_identity, enabled, "E2EE umgeschaltet");
                self.session.events().senden(WorkerEvent::EnableAck {
                    participant_identity,
                    enabled,
                });
            }
            WorkerRequest::SetKey {
                participant_identity,
                key,
                key_index,
            } => {
                let handler = self.session.key_handler(participant_identity.as_ref())?;
                handler.set_key(&key, key_index).await?;
            }
            WorkerRequest::UpdateCodec { track_id, codec } => {
                let cryptor = self
                    .cryptor(&track_id)
                    .ok_or_else(|| CryptoError::KeinCryptor(track_id.clone()))?;
                tracing::debug!(track_id = %track_id, %codec, "Codec aktualisiert");
                cryptor.set_codec(Some(codec));
            }
            WorkerRequest::SetRtpPayloadMap {
                participant_identity,
                map,
            } => {
                self.session.set_rtp_map(&participant_identity, map);
            }
            WorkerRequest::RatchetRequest {
                participant_identity,
                key_index,
            } => {
                let handler = self.session.key_handler(participant_identity.as_ref())?;
                handler.ratchet_key(key_index, true).await?;
            }
            WorkerRequest::SetSifTrailer { trailer } => {
                let trailer = Some(trailer).filter(|t| !t.is_empty());
                for eintrag in self.cryptors.iter() {
                    eintrag.set_sif_trailer(trailer.clone());
                }
                *self.sif_trailer.write() = trailer;
            }
            WorkerRequest::RemoveTransform { track_id } => {
                self.transform_entfernen(&track_id);
            }
            WorkerRequest::ParticipantLeft {
                participant_identity,
            } => {
                self.session.participant_entfernen(&participant_identity);
                for eintrag in self.cryptors.iter() {
                    if eintrag.participant().as_ref() == Some(&participant_identity) {
                        eintrag.unset_participant();
                    }
                }
            }
        }
        Ok(())
    }

    pub fn cryptor(&self, track_id: &TrackId) -> Option<Arc<FrameCryptor>> {
        self.cryptors.get(track_id).map(|c| Arc::clone(c.value()))
    }

    /// Liefert den Cryptor eines Tracks, neu oder bestehend, gebunden an
    /// `participant` (ohne Teilnehmer: Bindung geloest)
    pub fn cryptor_fuer(
        &self,
        track_id: &TrackId,
        participant: Option<ParticipantIdentity>,
        codec: Option<Codec>,
    ) -> CryptoResult<Arc<FrameCryptor>> {
        let cryptor = self
            .cryptors
            .entry(track_id.clone())
            .or_insert_with(|| {
                let cryptor = FrameCryptor::new(track_id.clone(), self.session.clone());
                cryptor.set_sif_trailer(self.sif_trailer.read().clone());
                Arc::new(cryptor)
            })
            .value()
            .clone();

        match participant {
            Some(p) if cryptor.participant().as_ref() != Some(&p) => {
                let handler = self.session.key_handler(Some(&p))?;
                cryptor.set_participant(p, handler);
            }
            Some(_) => {}
            None => cryptor.unset_participant(),
        }
        if codec.is_some() {
            cryptor.set_codec(codec);
        }
        Ok(cryptor)
    }

    /// Richtet die Transform-Pipeline eines Tracks ein
    ///
    /// Eine bestehende Pipeline fuer denselben Track wird beendet; der
    /// Cryptor (und damit sein IV-Zaehler) bleibt erhalten.
    pub fn setup_transform(
        &self,
        richtung: TransformDirection,
        track_id: TrackId,
        participant: Option<ParticipantIdentity>,
        codec: Option<Codec>,
        eingang: mpsc::Receiver<EncodedFrame>,
        ausgang: mpsc::Sender<EncodedFrame>,
    ) -> CryptoResult<Arc<FrameCryptor>> {
        let cryptor = self.cryptor_fuer(&track_id, participant, codec)?;
        let handle = tokio::spawn(Arc::clone(&cryptor).run(richtung, eingang, ausgang));
        if let Some(alt) = self.pipelines.insert(track_id.clone(), handle) {
            alt.abort();
        }
        tracing::info!(track_id = %track_id, %richtung, "Transform eingerichtet");
        Ok(cryptor)
    }

    /// Beendet Pipeline und Cryptor eines Tracks
    pub fn transform_entfernen(&self, track_id: &TrackId) {
        if let Some((_, handle)) = self.pipelines.remove(track_id) {
            handle.abort();
        }
        if self.cryptors.remove(track_id).is_some() {
            tracing::info!(track_id = %track_id, "Transform entfernt");
        }
    }

    pub fn anzahl_tracks(&self) -> usize {
        self.cryptors.len()
    }
}

impl Drop for E2eeWorker {
    fn drop(&mut self) {
        for eintrag in self.pipelines.iter() {
            eintrag.value().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funkstille_core::types::FrameKind;
    use funkstille_protocol::control::ErrorReason;

    fn worker() -> (E2eeWorker, mpsc::Receiver<WorkerEvent>) {
        let (events, rx) = EventSender::kanal(32);
        (E2eeWorker::new(KeyProviderOptions::default(), events), rx)
    }

    fn alice() -> ParticipantIdentity {
        ParticipantIdentity::new("alice")
    }

    #[tokio::test]
    async fn init_und_enable_werden_bestaetigt() {
        let (w, mut rx) = worker();
        w.handle(WorkerRequest::Init {
            key_provider_options: KeyProviderOptions::default(),
        })
        .await
        .unwrap();
        w.handle(WorkerRequest::Enable {
            participant_identity: alice(),
            enabled: true,
        })
        .await
        .unwrap();

        assert_eq!(rx.recv().await.unwrap(), WorkerEvent::InitAck);
        assert_eq!(
            rx.recv().await.unwrap(),
            WorkerEvent::EnableAck {
                participant_identity: alice(),
                enabled: true
            }
        );
        assert!(w.session().ist_aktiviert(&alice()));
    }

    #[tokio::test]
    async fn set_key_ohne_teilnehmer_meldet_fehler() {
        let (w, mut rx) = worker();
        let ergebnis = w
            .handle(WorkerRequest::SetKey {
                participant_identity: None,
                key: b"geheim".to_vec(),
                key_index: 0,
            })
            .await;
        assert!(matches!(ergebnis, Err(CryptoError::KeinTeilnehmer)));
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkerEvent::Error {
                reason: ErrorReason::InternalError,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn ratchet_request_meldet_neues_material() {
        let (w, mut rx) = worker();
        w.handle(WorkerRequest::SetKey {
            participant_identity: Some(alice()),
            key: b"geheim".to_vec(),
            key_index: 4,
        })
        .await
        .unwrap();
        w.handle(WorkerRequest::RatchetRequest {
            participant_identity: Some(alice()),
            key_index: None,
        })
        .await
        .unwrap();

        match rx.recv().await.unwrap() {
            WorkerEvent::RatchetKey { key_index, material, .. } => {
                assert_eq!(key_index, 4);
                assert_eq!(material.len(), 32);
            }
            andere => panic!("Unerwartetes Ereignis: {andere:?}"),
        }
    }

    #[tokio::test]
    async fn cryptor_wird_wiederverwendet_und_neu_gebunden() {
        let (w, _rx) = worker();
        let track = TrackId::new("video-1");
        let a = w.cryptor_fuer(&track, Some(alice()), Some(Codec::Vp8)).unwrap();
        let b = w
            .cryptor_fuer(&track, Some(ParticipantIdentity::new("bob")), None)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.participant(), Some(ParticipantIdentity::new("bob")));
        assert_eq!(b.codec(), Some(Codec::Vp8));
        assert_eq!(w.anzahl_tracks(), 1);

        w.cryptor_fuer(&track, None, None).unwrap();
        assert_eq!(a.participant(), None);
    }

    #[tokio::test]
    async fn update_codec_fuer_unbekannten_track() {
        let (w, _rx) = worker();
        assert!(matches!(
            w.handle(WorkerRequest::UpdateCodec {
                track_id: TrackId::new("fehlt"),
                codec: Codec::Av1,
            })
            .await,
            Err(CryptoError::KeinCryptor(_))
        ));
    }

    #[tokio::test]
    async fn teilnehmer_verlaesst_session() {
        let (w, _rx) = worker();
        let track = TrackId::new("audio-1");
        w.handle(WorkerRequest::SetKey {
            participant_identity: Some(alice()),
            key: b"geheim".to_vec(),
            key_index: 0,
        })
        .await
        .unwrap();
        let cryptor = w.cryptor_fuer(&track, Some(alice()), Some(Codec::Opus)).unwrap();

        w.handle(WorkerRequest::ParticipantLeft {
            participant_identity: alice(),
        })
        .await
        .unwrap();
        assert_eq!(cryptor.participant(), None);
        assert_eq!(w.session().anzahl_key_handler(), 0);
    }

    #[tokio::test]
    async fn sif_trailer_gilt_fuer_neue_und_bestehende_cryptors() {
        let (w, _rx) = worker();
        let alt = w.cryptor_fuer(&TrackId::new("a"), None, None).unwrap();
        w.handle(WorkerRequest::SetSifTrailer {
            trailer: b"XY".to_vec(),
        })
        .await
        .unwrap();
        let neu = w.cryptor_fuer(&TrackId::new("b"), None, None).unwrap();

        for cryptor in [alt, neu] {
            let raus = cryptor
                .decode_frame(EncodedFrame::new(b"abcXY".to_vec(), FrameKind::Delta))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(raus.data, b"abc");
        }
    }

    #[tokio::test]
    async fn pipeline_ende_zu_ende() {
        let (w, _rx) = worker();
        for anfrage in [
            WorkerRequest::Enable {
                participant_identity: alice(),
                enabled: true,
            },
            WorkerRequest::SetKey {
                participant_identity: Some(alice()),
                key: b"geheim".to_vec(),
                key_index: 0,
            },
        ] {
            w.handle(anfrage).await.unwrap();
        }

        let (send_tx, send_rx) = mpsc::channel(8);
        let (netz_tx, netz_rx) = mpsc::channel(8);
        let (empf_tx, mut empf_rx) = mpsc::channel(8);
        w.setup_transform(
            TransformDirection::Encode,
            TrackId::new("sender"),
            Some(alice()),
            Some(Codec::Vp8),
            send_rx,
            netz_tx,
        )
        .unwrap();
        w.setup_transform(
            TransformDirection::Decode,
            TrackId::new("empfaenger"),
            Some(alice()),
            Some(Codec::Vp8),
            netz_rx,
            empf_tx,
        )
        .unwrap();

        let original = EncodedFrame::new(vec![0x42; 64], FrameKind::Key).mit_rtp(99, 3000);
        send_tx.send(original.clone()).await.unwrap();
        let angekommen = empf_rx.recv().await.unwrap();
        assert_eq!(angekommen.data, original.data);

        w.handle(WorkerRequest::RemoveTransform {
            track_id: TrackId::new("sender"),
        })
        .await
        .unwrap();
        assert_eq!(w.anzahl_tracks(), 1);
    }
}
