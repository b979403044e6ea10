//! Integrationstests fuer die JSON-Lines-Bridge
//!
//! Jeder Test fuettert `ausfuehren` mit einer kompletten Eingabe und
//! wertet die Ausgabezeilen aus, wie es eine Host-Anwendung tun wuerde.

use funkstille_core::types::{Codec, FrameKind, ParticipantIdentity, TrackId};
use funkstille_protocol::control::{KeyProviderOptions, WorkerEvent, WorkerRequest};
use funkstille_protocol::frame::{EncodedFrame, TransformDirection};
use funkstille_worker::bridge::{BridgeAusgabe, BridgeEingabe};
use funkstille_worker::config::WorkerConfig;
use tokio::io::AsyncReadExt;

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

fn zeile(eingabe: &BridgeEingabe) -> String {
    serde_json::to_string(eingabe).expect("Serialisierung")
}

async fn lauf(zeilen: &[String]) -> Vec<BridgeAusgabe> {
    let mut eingabe = String::new();
    for z in zeilen {
        eingabe.push_str(z);
        eingabe.push('\n');
    }

    let (schreiber, mut leser) = tokio::io::duplex(1 << 20);
    funkstille_worker::ausfuehren(WorkerConfig::default(), eingabe.as_bytes(), schreiber)
        .await
        .expect("Bridge-Lauf");

    let mut ausgabe = String::new();
    leser
        .read_to_string(&mut ausgabe)
        .await
        .expect("Ausgabe lesbar");
    ausgabe
        .lines()
        .map(|l| serde_json::from_str(l).expect("gueltige Ausgabezeile"))
        .collect()
}

fn alice() -> ParticipantIdentity {
    ParticipantIdentity::new("alice")
}

/// init, enable und setKey fuer alice
fn vorbereitung() -> Vec<String> {
    vec![
        zeile(&BridgeEingabe::Control {
            request: WorkerRequest::Init {
                key_provider_options: KeyProviderOptions::default(),
            },
        }),
        zeile(&BridgeEingabe::Control {
            request: WorkerRequest::Enable {
                participant_identity: alice(),
                enabled: true,
            },
        }),
        zeile(&BridgeEingabe::Control {
            request: WorkerRequest::SetKey {
                participant_identity: Some(alice()),
                key: b"bridge-test-schluessel".to_vec(),
                key_index: 0,
            },
        }),
    ]
}

fn frames(ausgabe: &[BridgeAusgabe]) -> Vec<(TrackId, EncodedFrame)> {
    ausgabe
        .iter()
        .filter_map(|a| match a {
            BridgeAusgabe::Frame { track_id, frame } => Some((track_id.clone(), frame.clone())),
            BridgeAusgabe::Event { .. } => None,
        })
        .collect()
}

fn events(ausgabe: &[BridgeAusgabe]) -> Vec<WorkerEvent> {
    ausgabe
        .iter()
        .filter_map(|a| match a {
            BridgeAusgabe::Event { event } => Some(event.clone()),
            BridgeAusgabe::Frame { .. } => None,
        })
        .collect()
}

fn klartext_frame() -> EncodedFrame {
    let data: Vec<u8> = (0..100u8).collect();
    EncodedFrame::new(data, FrameKind::Key).mit_rtp(0x1234_5678, 90_000)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn integration_senden_und_empfangen() {
    // Senderseite
    let mut eingabe = vorbereitung();
    eingabe.push(zeile(&BridgeEingabe::Transform {
        direction: TransformDirection::Encode,
        track_id: TrackId::new("cam"),
        participant_identity: Some(alice()),
        codec: Some(Codec::Vp8),
    }));
    eingabe.push(zeile(&BridgeEingabe::Frame {
        track_id: TrackId::new("cam"),
        frame: klartext_frame(),
    }));
    let ausgabe = lauf(&eingabe).await;

    let ereignisse = events(&ausgabe);
    assert!(ereignisse.contains(&WorkerEvent::InitAck));
    assert!(ereignisse.contains(&WorkerEvent::EnableAck {
        participant_identity: alice(),
        enabled: true,
    }));

    let gesendet = frames(&ausgabe);
    assert_eq!(gesendet.len(), 1);
    let (track_id, verschluesselt) = &gesendet[0];
    assert_eq!(track_id, &TrackId::new("cam"));
    // 10 Klartext + 90 Chiffrat + 16 Tag + 12 IV + 2 Trailer
    assert_eq!(verschluesselt.len(), 130);
    assert_eq!(verschluesselt.data[..10], klartext_frame().data[..10]);

    // Empfaengerseite in einer eigenen Bridge
    let mut eingabe = vorbereitung();
    eingabe.push(zeile(&BridgeEingabe::Transform {
        direction: TransformDirection::Decode,
        track_id: TrackId::new("cam-empfang"),
        participant_identity: Some(alice()),
        codec: Some(Codec::Vp8),
    }));
    eingabe.push(zeile(&BridgeEingabe::Frame {
        track_id: TrackId::new("cam-empfang"),
        frame: verschluesselt.clone(),
    }));
    let ausgabe = lauf(&eingabe).await;

    let empfangen = frames(&ausgabe);
    assert_eq!(empfangen.len(), 1);
    assert_eq!(empfangen[0].1.data, klartext_frame().data);
    assert!(!events(&ausgabe)
        .iter()
        .any(|e| matches!(e, WorkerEvent::Error { .. })));
}

#[tokio::test]
async fn integration_ungueltige_zeilen_werden_uebersprungen() {
    let mut eingabe = vec!["das ist kein json".to_string(), String::new()];
    eingabe.push(zeile(&BridgeEingabe::Frame {
        track_id: TrackId::new("ohne-transform"),
        frame: klartext_frame(),
    }));
    eingabe.push(zeile(&BridgeEingabe::Control {
        request: WorkerRequest::Init {
            key_provider_options: KeyProviderOptions::default(),
        },
    }));
    let ausgabe = lauf(&eingabe).await;
    assert_eq!(
        ausgabe,
        vec![BridgeAusgabe::Event {
            event: WorkerEvent::InitAck
        }]
    );
}

#[tokio::test]
async fn integration_ratchet_wird_gemeldet() {
    let mut eingabe = vorbereitung();
    eingabe.push(zeile(&BridgeEingabe::Control {
        request: WorkerRequest::RatchetRequest {
            participant_identity: Some(alice()),
            key_index: None,
        },
    }));
    let ausgabe = lauf(&eingabe).await;

    let ratchet: Vec<_> = events(&ausgabe)
        .into_iter()
        .filter_map(|e| match e {
            WorkerEvent::RatchetKey {
                participant_identity,
                key_index,
                material,
            } => Some((participant_identity, key_index, material)),
            _ => None,
        })
        .collect();
    assert_eq!(ratchet.len(), 1);
    assert_eq!(ratchet[0].0, Some(alice()));
    assert_eq!(ratchet[0].1, 0);
    assert_eq!(ratchet[0].2.len(), 32);
}

#[tokio::test]
async fn integration_ohne_schluessel_durchreichen() {
    let eingabe = vec![
        zeile(&BridgeEingabe::Control {
            request: WorkerRequest::Enable {
                participant_identity: alice(),
                enabled: true,
            },
        }),
        zeile(&BridgeEingabe::Transform {
            direction: TransformDirection::Encode,
            track_id: TrackId::new("mic"),
            participant_identity: Some(alice()),
            codec: Some(Codec::Opus),
        }),
        zeile(&BridgeEingabe::Frame {
            track_id: TrackId::new("mic"),
            frame: EncodedFrame::new(vec![0xAB; 20], FrameKind::Audio),
        }),
    ];
    let ausgabe = lauf(&eingabe).await;

    let gesendet = frames(&ausgabe);
    assert_eq!(gesendet.len(), 1);
    assert_eq!(gesendet[0].1.data, vec![0xAB; 20]);
    assert!(events(&ausgabe)
        .iter()
        .any(|e| matches!(e, WorkerEvent::Error { .. })));
}
