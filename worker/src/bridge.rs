//! JSON-Lines-Bridge zwischen Host-Anwendung und E2EE-Engine
//!
//! Jede Zeile auf stdin ist eine `BridgeEingabe`, jede Zeile auf stdout
//! eine `BridgeAusgabe`. Frames laufen pro Track durch eine eigene
//! Transform-Pipeline; Ereignisse der Engine werden in denselben
//! Ausgabestrom gemischt.

use std::collections::HashMap;

use funkstille_core::error::{FunkstilleError, Result};
use funkstille_core::types::{Codec, ParticipantIdentity, TrackId};
use funkstille_crypto::{E2eeWorker, EventSender};
use funkstille_protocol::control::{WorkerEvent, WorkerRequest};
use funkstille_protocol::frame::{EncodedFrame, TransformDirection};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;

/// Eine Zeile von der Host-Anwendung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BridgeEingabe {
    /// Control-Plane-Anfrage an die Engine
    Control { request: WorkerRequest },
    /// Richtet die Pipeline eines Tracks ein (ersetzt eine bestehende)
    Transform {
        direction: TransformDirection,
        track_id: TrackId,
        #[serde(default)]
        participant_identity: Option<ParticipantIdentity>,
        #[serde(default)]
        codec: Option<Codec>,
    },
    /// Frame fuer die Pipeline eines Tracks
    Frame { track_id: TrackId, frame: EncodedFrame },
}

/// Eine Zeile an die Host-Anwendung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BridgeAusgabe {
    Event { event: WorkerEvent },
    Frame { track_id: TrackId, frame: EncodedFrame },
}

pub struct Bridge {
    worker: E2eeWorker,
    eingaenge: HashMap<TrackId, mpsc::Sender<EncodedFrame>>,
    weiterleitungen: Vec<JoinHandle<()>>,
    event_weiterleitung: JoinHandle<()>,
    ausgabe: mpsc::Sender<BridgeAusgabe>,
    frame_queue_groesse: usize,
}

impl Bridge {
    /// Erstellt die Bridge samt Ausgabekanal
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn new(config: &WorkerConfig) -> (Self, mpsc::Receiver<BridgeAusgabe>) {
        let (events, mut event_rx) = EventSender::kanal(config.worker.event_queue_groesse);
        let (ausgabe, ausgabe_rx) = mpsc::channel(config.worker.frame_queue_groesse);

        let event_ausgabe = ausgabe.clone();
        let event_weiterleitung = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if event_ausgabe
                    .send(BridgeAusgabe::Event { event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let bridge = Self {
            worker: E2eeWorker::new(config.key_provider.clone(), events),
            eingaenge: HashMap::new(),
            weiterleitungen: Vec::new(),
            event_weiterleitung,
            ausgabe,
            frame_queue_groesse: config.worker.frame_queue_groesse,
        };
        (bridge, ausgabe_rx)
    }

    pub fn worker(&self) -> &E2eeWorker {
        &self.worker
    }

    /// Verarbeitet eine Eingabezeile
    pub async fn verarbeiten(&mut self, zeile: &str) -> Result<()> {
        let eingabe: BridgeEingabe = serde_json::from_str(zeile)?;
        self.eingabe_verarbeiten(eingabe).await
    }

    pub async fn eingabe_verarbeiten(&mut self, eingabe: BridgeEingabe) -> Result<()> {
        match eingabe {
            BridgeEingabe::Control { request } => {
                let entfernt = match &request {
                    WorkerRequest::RemoveTransform { track_id } => Some(track_id.clone()),
                    _ => None,
                };
                // Fehler hat der Worker bereits als Ereignis gemeldet
                let ergebnis = self.worker.handle(request).await;
                if let Some(track_id) = entfernt {
                    self.eingaenge.remove(&track_id);
                }
                ergebnis.map_err(|e| FunkstilleError::intern(e.to_string()))
            }
            BridgeEingabe::Transform {
                direction,
                track_id,
                participant_identity,
                codec,
            } => self.transform_einrichten(direction, track_id, participant_identity, codec),
            BridgeEingabe::Frame { track_id, frame } => {
                let eingang = self
                    .eingaenge
                    .get(&track_id)
                    .ok_or_else(|| FunkstilleError::TrackNichtGefunden(track_id.to_string()))?;
                eingang
                    .send(frame)
                    .await
                    .map_err(|_| FunkstilleError::intern(format!("Pipeline fuer {track_id} beendet")))
            }
        }
    }

    fn transform_einrichten(
        &mut self,
        richtung: TransformDirection,
        track_id: TrackId,
        participant: Option<ParticipantIdentity>,
        codec: Option<Codec>,
    ) -> Result<()> {
        let (eingang_tx, eingang_rx) = mpsc::channel(self.frame_queue_groesse);
        let (ausgang_tx, mut ausgang_rx) = mpsc::channel(self.frame_queue_groesse);

        if let Err(e) = self.worker.setup_transform(
            richtung,
            track_id.clone(),
            participant.clone(),
            codec,
            eingang_rx,
            ausgang_tx,
        ) {
            self.worker
                .session()
                .events()
                .fehler_melden(&e, participant.as_ref());
            return Err(FunkstilleError::intern(e.to_string()));
        }
        self.eingaenge.insert(track_id.clone(), eingang_tx);

        self.weiterleitungen.retain(|h| !h.is_finished());
        let ausgabe = self.ausgabe.clone();
        self.weiterleitungen.push(tokio::spawn(async move {
            while let Some(frame) = ausgang_rx.recv().await {
                let nachricht = BridgeAusgabe::Frame {
                    track_id: track_id.clone(),
                    frame,
                };
                if ausgabe.send(nachricht).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    /// Schliesst alle Eingaenge und wartet, bis alle Frames und
    /// Ereignisse im Ausgabekanal liegen
    pub async fn beenden(self) {
        let Bridge {
            worker,
            eingaenge,
            weiterleitungen,
            event_weiterleitung,
            ausgabe,
            ..
        } = self;

        drop(eingaenge);
        for weiterleitung in weiterleitungen {
            let _ = weiterleitung.await;
        }
        drop(worker);
        drop(ausgabe);
        let _ = event_weiterleitung.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funkstille_core::types::FrameKind;
    use funkstille_protocol::control::KeyProviderOptions;

    #[test]
    fn eingabe_format() {
        let json = r#"{"type":"transform","direction":"decode","trackId":"cam","codec":"av1"}"#;
        let eingabe: BridgeEingabe = serde_json::from_str(json).unwrap();
        assert_eq!(
            eingabe,
            BridgeEingabe::Transform {
                direction: TransformDirection::Decode,
                track_id: TrackId::new("cam"),
                participant_identity: None,
                codec: Some(Codec::Av1),
            }
        );

        let json = r#"{"type":"control","request":{"kind":"initAck"}}"#;
        assert!(serde_json::from_str::<BridgeEingabe>(json).is_err());

        let json = r#"{"type":"control","request":{"kind":"participantLeft","participantIdentity":"bob"}}"#;
        assert!(matches!(
            serde_json::from_str::<BridgeEingabe>(json).unwrap(),
            BridgeEingabe::Control {
                request: WorkerRequest::ParticipantLeft { .. }
            }
        ));
    }

    #[test]
    fn ausgabe_format() {
        let ausgabe = BridgeAusgabe::Frame {
            track_id: TrackId::new("mic"),
            frame: EncodedFrame::new(vec![1, 2, 3], FrameKind::Audio),
        };
        let json = serde_json::to_value(&ausgabe).unwrap();
        assert_eq!(json["type"], "frame");
        assert_eq!(json["trackId"], "mic");
        assert_eq!(json["frame"]["data"], "AQID");

        let json = serde_json::to_value(BridgeAusgabe::Event {
            event: WorkerEvent::InitAck,
        })
        .unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["kind"], "initAck");
    }

    #[tokio::test]
    async fn frame_ohne_transform_wird_abgelehnt() {
        let (mut bridge, _rx) = Bridge::new(&WorkerConfig::default());
        let frame = serde_json::to_string(&BridgeEingabe::Frame {
            track_id: TrackId::new("unbekannt"),
            frame: EncodedFrame::new(vec![1], FrameKind::Delta),
        })
        .unwrap();
        assert!(matches!(
            bridge.verarbeiten(&frame).await,
            Err(FunkstilleError::TrackNichtGefunden(_))
        ));
        assert!(matches!(
            bridge.verarbeiten("kein json").await,
            Err(FunkstilleError::Json(_))
        ));
    }

    #[tokio::test]
    async fn transform_ohne_teilnehmer_und_entfernen() {
        let (mut bridge, mut rx) = Bridge::new(&WorkerConfig::default());
        let ergebnis = bridge
            .eingabe_verarbeiten(BridgeEingabe::Transform {
                direction: TransformDirection::Encode,
                track_id: TrackId::new("cam"),
                participant_identity: None,
                codec: None,
            })
            .await;
        // Ohne Teilnehmer wird der Cryptor ungebunden angelegt
        assert!(ergebnis.is_ok());

        bridge
            .eingabe_verarbeiten(BridgeEingabe::Control {
                request: WorkerRequest::RemoveTransform {
                    track_id: TrackId::new("cam"),
                },
            })
            .await
            .unwrap();
        assert_eq!(bridge.worker().anzahl_tracks(), 0);

        bridge.beenden().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn control_antworten_landen_in_der_ausgabe() {
        let (mut bridge, mut rx) = Bridge::new(&WorkerConfig::default());
        bridge
            .eingabe_verarbeiten(BridgeEingabe::Control {
                request: WorkerRequest::Init {
                    key_provider_options: KeyProviderOptions::default(),
                },
            })
            .await
            .unwrap();
        bridge.beenden().await;

        assert_eq!(
            rx.recv().await,
            Some(BridgeAusgabe::Event {
                event: WorkerEvent::InitAck
            })
        );
        assert!(rx.recv().await.is_none());
    }
}
