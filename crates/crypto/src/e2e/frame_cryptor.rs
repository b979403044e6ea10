//! Frame-Cryptor: Ver- und Entschluesselung eines Tracks
//!
//! ## Senden
//! ```text
//! Frame -> Layout (Codec) -> AES-128-GCM(AAD = Klartextbereiche) -> Trailer
//! ```
//!
//! ## Empfangen
//! ```text
//! SIF? -> aktiviert? -> Trailer/Metadaten -> Schluessel -> Entschluesseln
//!                                                          |
//!                                          Fehlschlag -> Ratchet-Fenster
//! ```
//!
//! ## IV
//! ```text
//! [SSRC (4, BE)][Timestamp (4, BE)][Timestamp - (Zaehler mod 0xFFFF) (4, BE)]
//! ```
//! Der Zaehler ist pro SSRC und beginnt bei einem Zufallswert.
//!
//! Frames eines Tracks werden strikt nacheinander verarbeitet; Methoden
//! nehmen `&self`, der Bindungszustand liegt hinter einem Lock, der nie
//! ueber ein `.await` gehalten wird.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use funkstille_core::types::{Codec, FrameKind, ParticipantIdentity, TrackId};
use funkstille_protocol::frame::{EncodedFrame, TransformDirection};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::e2e::aead;
use crate::e2e::key_handler::ParticipantKeyHandler;
use crate::e2e::layout::{self, av1, h264, EncryptionLayout};
use crate::e2e::session::E2eeSession;
use crate::e2e::sif_guard::SifGuard;
use crate::e2e::trailer::{self, Av1Metadaten};
use crate::error::{CryptoError, CryptoResult};
use crate::types::{KeySet, IV_LAENGE, TAG_LAENGE};

#[derive(Debug, Clone, Default)]
struct Bindung {
    participant: Option<ParticipantIdentity>,
    key_handler: Option<Arc<ParticipantKeyHandler>>,
    codec: Option<Codec>,
    sif_trailer: Option<Vec<u8>>,
}

/// Empfangener, noch verschluesselter Frame in zerlegter Form
enum VersiegelterFrame {
    Generisch {
        /// Klartext-Praefix (AAD)
        kopf: Vec<u8>,
        ciphertext: Vec<u8>,
        iv: [u8; IV_LAENGE],
        key_index: u8,
    },
    Av1 {
        /// Frame ohne Metadaten
        nutzdaten: Vec<u8>,
        layout: EncryptionLayout,
        aad: Vec<u8>,
        metadaten: Av1Metadaten,
    },
}

impl VersiegelterFrame {
    fn key_index(&self) -> u8 {
        match self {
            Self::Generisch { key_index, .. } => *key_index,
            Self::Av1 { metadaten, .. } => metadaten.key_index,
        }
    }

    /// Versucht die Entschluesselung mit einem Schluesselsatz
    fn oeffnen(&self, key_set: &KeySet) -> CryptoResult<Vec<u8>> {
        match self {
            Self::Generisch {
                kopf,
                ciphertext,
                iv,
                ..
            } => {
                let klartext = aead::entschluesseln(key_set, iv, kopf, ciphertext)?;
                let mut out = Vec::with_capacity(kopf.len() + klartext.len());
                out.extend_from_slice(kopf);
                out.extend_from_slice(&klartext);
                Ok(out)
            }
            Self::Av1 {
                nutzdaten,
                layout,
                aad,
                metadaten,
            } => {
                let mut puffer = layout.extract_protected(nutzdaten);
                aead::entschluesseln_abgetrennt(
                    key_set,
                    &metadaten.iv,
                    aad,
                    &mut puffer,
                    &metadaten.tag,
                )?;
                let mut out = nutzdaten.clone();
                layout.write_protected(&mut out, &puffer)?;
                Ok(out)
            }
        }
    }
}

/// Ver-/Entschluesselung der Frames eines Tracks
#[derive(Debug)]
pub struct FrameCryptor {
    track_id: TrackId,
    session: E2eeSession,
    bindung: RwLock<Bindung>,
    send_counts: Mutex<HashMap<u32, u32>>,
    sif_guard: Mutex<SifGuard>,
}

impl FrameCryptor {
    pub fn new(track_id: TrackId, session: E2eeSession) -> Self {
        Self {
            track_id,
            session,
            bindung: RwLock::new(Bindung::default()),
            send_counts: Mutex::new(HashMap::new()),
            sif_guard: Mutex::new(SifGuard::new()),
        }
    }

    pub fn track_id(&self) -> &TrackId {
        &self.track_id
    }

    /// Bindet den Cryptor an einen Teilnehmer und dessen Schluesselring
    pub fn set_participant(
        &self,
        participant: ParticipantIdentity,
        key_handler: Arc<ParticipantKeyHandler>,
    ) {
        let mut bindung = self.bindung.write();
        tracing::debug!(
            track_id = %self.track_id,
            participant = %participant,
            "Cryptor an Teilnehmer gebunden"
        );
        bindung.participant = Some(participant);
        bindung.key_handler = Some(key_handler);
    }

    /// Loest die Bindung; Frames laufen danach unveraendert durch
    pub fn unset_participant(&self) {
        let mut bindung = self.bindung.write();
        bindung.participant = None;
        bindung.key_handler = None;
    }

    pub fn participant(&self) -> Option<ParticipantIdentity> {
        self.bindung.read().participant.clone()
    }

    pub fn set_codec(&self, codec: Option<Codec>) {
        self.bindung.write().codec = codec;
    }

    pub fn codec(&self) -> Option<Codec> {
        self.bindung.read().codec
    }

    pub fn set_sif_trailer(&self, trailer: Option<Vec<u8>>) {
        self.bindung.write().sif_trailer = trailer.filter(|t| !t.is_empty());
    }

    fn ist_aktiviert(&self, bindung: &Bindung) -> bool {
        bindung
            .participant
            .as_ref()
            .is_some_and(|p| self.session.ist_aktiviert(p))
    }

    /// Naechster IV fuer `ssrc`
    fn make_iv(&self, ssrc: u32, timestamp: u32) -> [u8; IV_LAENGE] {
        let mut zaehler = self.send_counts.lock();
        let send_count = zaehler
            .entry(ssrc)
            .or_insert_with(|| u32::from(rand::random::<u16>()));

        let mut iv = [0u8; IV_LAENGE];
        iv[0..4].copy_from_slice(&ssrc.to_be_bytes());
        iv[4..8].copy_from_slice(&timestamp.to_be_bytes());
        iv[8..12].copy_from_slice(&timestamp.wrapping_sub(*send_count % 0xFFFF).to_be_bytes());
        *send_count = send_count.wrapping_add(1);
        iv
    }

    /// Verarbeitet einen Frame; `None` bedeutet verworfen
    ///
    /// Fehler werden hier geloggt und als Ereignis gemeldet, der Track
    /// laeuft weiter.
    pub async fn transform(
        &self,
        richtung: TransformDirection,
        frame: EncodedFrame,
    ) -> Option<EncodedFrame> {
        let ergebnis = match richtung {
            TransformDirection::Encode => self.encode_frame(frame).await,
            TransformDirection::Decode => self.decode_frame(frame).await,
        };
        match ergebnis {
            Ok(frame) => frame,
            Err(e) => {
                self.fehler_melden(&e);
                None
            }
        }
    }

    fn fehler_melden(&self, fehler: &CryptoError) {
        if !fehler.ist_meldepflichtig() {
            tracing::debug!(track_id = %self.track_id, "Frame verworfen: {fehler}");
            return;
        }
        let participant = self.participant();
        tracing::warn!(
            track_id = %self.track_id,
            participant = ?participant,
            grund = %fehler.grund(),
            "Frame verworfen: {fehler}"
        );
        self.session.events().fehler_melden(fehler, participant.as_ref());
    }

    /// Verschluesselt einen ausgehenden Frame
    ///
    /// Leere Frames und deaktivierte Teilnehmer laufen unveraendert durch.
    pub async fn encode_frame(&self, mut frame: EncodedFrame) -> CryptoResult<Option<EncodedFrame>> {
        let bindung = self.bindung.read().clone();
        if frame.is_empty() || !self.ist_aktiviert(&bindung) {
            return Ok(Some(frame));
        }

        let key_index = bindung
            .key_handler
            .as_ref()
            .map(|h| h.current_key_index())
            .unwrap_or_default();
        let key_set = bindung
            .key_handler
            .as_ref()
            .and_then(|h| h.get_key_set(Some(key_index)));
        let Some(key_set) = key_set else {
            return Ok(self.ohne_schluessel(frame, &bindung, key_index));
        };

        let iv = self.make_iv(frame.ssrc, frame.timestamp);
        frame.data = match bindung.codec {
            Some(Codec::Av1) => self.av1_verschluesseln(&frame.data, &key_set, &iv, key_index)?,
            codec => generisch_verschluesseln(&frame.data, codec, frame.kind, &key_set, &iv, key_index)?,
        };
        Ok(Some(frame))
    }

    fn ohne_schluessel(
        &self,
        frame: EncodedFrame,
        bindung: &Bindung,
        key_index: u8,
    ) -> Option<EncodedFrame> {
        let fehler = CryptoError::FehlenderSchluessel {
            participant: bindung.participant.clone(),
            key_index,
        };
        tracing::debug!(track_id = %self.track_id, "Kein Schluessel zum Senden");
        self.session
            .events()
            .fehler_melden(&fehler, bindung.participant.as_ref());

        if self.session.discard_frame_when_cryptor_not_ready() {
            None
        } else {
            Some(frame)
        }
    }

    fn av1_verschluesseln(
        &self,
        data: &[u8],
        key_set: &KeySet,
        iv: &[u8; IV_LAENGE],
        key_index: u8,
    ) -> CryptoResult<Vec<u8>> {
        let analyse = av1::analysieren(data).ok_or_else(|| {
            CryptoError::LayoutNichtUnterstuetzt("AV1-Frame in keiner bekannten Form".into())
        })?;
        let shape = analyse.shape;

        // W = 3 laesst kein Element fuer die Metadaten frei: vorher nach W = 0
        let (data, layout): (Cow<'_, [u8]>, EncryptionLayout) = if shape.w_feld(data) == Some(3) {
            let w0 = shape
                .letztes_element_mit_laenge(data, 0)
                .and_then(|w0| shape.parsen(&w0).map(|layout| (Cow::Owned(w0), layout)));
            w0.ok_or_else(|| {
                CryptoError::LayoutNichtUnterstuetzt("AV1-Aggregation mit W = 3 nicht umrahmbar".into())
            })?
        } else {
            (Cow::Borrowed(data), analyse.layout)
        };

        let aad = layout.build_aad(&data);
        let mut puffer = layout.extract_protected(&data);
        let tag = aead::verschluesseln_abgetrennt(key_set, iv, &aad, &mut puffer)?;

        let mut out = Vec::with_capacity(data.len() + 2 + trailer::AV1_METADATEN_OBU_LAENGE);
        out.extend_from_slice(&data);
        layout.write_protected(&mut out, &puffer)?;
        Av1Metadaten {
            key_index,
            iv: *iv,
            tag,
        }
        .anhaengen(&mut out, shape)?;

        // Kontrolle: der Empfaenger muss dieselbe Form und dasselbe Layout erkennen
        match Av1Metadaten::finden(&out) {
            Some(fund) if fund.shape == shape && fund.layout == layout => Ok(out),
            _ => Err(CryptoError::LayoutNichtUnterstuetzt(format!(
                "AV1-Form {shape:?} nach Verschluesselung nicht eindeutig"
            ))),
        }
    }

    /// Entschluesselt einen eingehenden Frame
    pub async fn decode_frame(&self, mut frame: EncodedFrame) -> CryptoResult<Option<EncodedFrame>> {
        if frame.is_empty() {
            return Ok(Some(frame));
        }
        let bindung = self.bindung.read().clone();

        if let Some(sif) = bindung.sif_trailer.as_deref() {
            if frame.data.ends_with(sif) {
                let erlaubt = {
                    let mut guard = self.sif_guard.lock();
                    let erlaubt = guard.is_sif_allowed();
                    guard.record_sif();
                    erlaubt
                };
                if !erlaubt {
                    tracing::warn!(track_id = %self.track_id, "SIF-Limit erreicht, Frame verworfen");
                    return Ok(None);
                }
                frame.data.truncate(frame.data.len() - sif.len());
                return Ok(Some(frame));
            }
        }
        self.sif_guard.lock().record_user_frame();

        if !self.ist_aktiviert(&bindung) {
            return Ok(Some(frame));
        }

        let codec = frame
            .payload_type
            .zip(bindung.participant.as_ref())
            .and_then(|(pt, p)| self.session.rtp_codec(p, pt))
            .or(bindung.codec);

        let versiegelt = match codec {
            Some(Codec::Av1) => match av1_zerlegen(&frame.data) {
                Some(v) => v,
                None => {
                    tracing::debug!(track_id = %self.track_id, "AV1-Frame ohne Metadaten verworfen");
                    return Ok(None);
                }
            },
            codec => generisch_zerlegen(&frame.data, codec, frame.kind)?,
        };

        let key_index = versiegelt.key_index();
        let Some(key_handler) = bindung.key_handler.as_ref() else {
            return Err(CryptoError::FehlenderSchluessel {
                participant: bindung.participant.clone(),
                key_index,
            });
        };

        if !key_handler.has_valid_key() {
            tracing::trace!(track_id = %self.track_id, "Kein gueltiger Schluessel, Frame verworfen");
            return Ok(None);
        }

        frame.data = self
            .entschluesseln_mit_ratchet(&versiegelt, key_handler, key_index, bindung.participant.as_ref())
            .await?;
        Ok(Some(frame))
    }

    /// Entschluesselt mit dem Slot-Schluessel, danach mit bis zu
    /// `ratchet_window_size` Ratchet-Schritten
    ///
    /// Ein erfolgreicher Schritt wird nur installiert, wenn der Slot noch
    /// den Ausgangsschluessel enthaelt.
    async fn entschluesseln_mit_ratchet(
        &self,
        versiegelt: &VersiegelterFrame,
        key_handler: &Arc<ParticipantKeyHandler>,
        key_index: u8,
        participant: Option<&ParticipantIdentity>,
    ) -> CryptoResult<Vec<u8>> {
        let start = key_handler
            .get_key_set(Some(key_index))
            .ok_or_else(|| CryptoError::FehlenderSchluessel {
                participant: participant.cloned(),
                key_index,
            })?;

        if let Ok(klartext) = versiegelt.oeffnen(&start) {
            key_handler.decryption_success();
            return Ok(klartext);
        }

        let fenster = self.session.ratchet_window_size();
        let mut quelle = Arc::clone(&start);
        for versuch in 1..=fenster {
            let ratchet = key_handler.ratchet_von(key_index, quelle).await?;
            if let Ok(klartext) = versiegelt.oeffnen(&ratchet.key_set) {
                tracing::debug!(
                    track_id = %self.track_id,
                    key_index,
                    versuch,
                    "Frame nach Ratchet entschluesselt"
                );
                key_handler.ratchet_uebernehmen(key_index, &start, &ratchet);
                key_handler.decryption_success();
                return Ok(klartext);
            }
            quelle = ratchet.key_set;
        }

        key_handler.decryption_failure();
        Err(CryptoError::UngueltigerSchluessel {
            participant: participant.cloned(),
            key_index,
            versuche: fenster,
        })
    }

    /// Verarbeitet Frames aus `eingang` der Reihe nach und schreibt sie nach
    /// `ausgang`, bis einer der Kanaele geschlossen wird
    pub async fn run(
        self: Arc<Self>,
        richtung: TransformDirection,
        mut eingang: mpsc::Receiver<EncodedFrame>,
        ausgang: mpsc::Sender<EncodedFrame>,
    ) {
        tracing::debug!(track_id = %self.track_id, %richtung, "Transform-Pipeline gestartet");
        while let Some(frame) = eingang.recv().await {
            let Some(frame) = self.transform(richtung, frame).await else {
                continue;
            };
            if ausgang.send(frame).await.is_err() {
                tracing::debug!(track_id = %self.track_id, "Ausgang geschlossen");
                break;
            }
        }
        tracing::debug!(track_id = %self.track_id, %richtung, "Transform-Pipeline beendet");
    }
}

fn generisch_verschluesseln(
    data: &[u8],
    codec: Option<Codec>,
    kind: FrameKind,
    key_set: &KeySet,
    iv: &[u8; IV_LAENGE],
    key_index: u8,
) -> CryptoResult<Vec<u8>> {
    let praefix = layout::klartext_praefix(data, codec, kind);
    let (kopf, klartext) = data.split_at(praefix);

    let mut koerper = aead::verschluesseln(key_set, iv, kopf, klartext)?;
    trailer::generisch_anhaengen(&mut koerper, iv, key_index);
    if codec == Some(Codec::H264) {
        koerper = h264::escape_nach(&koerper, h264::nullen_am_ende(kopf));
    }

    let mut out = Vec::with_capacity(kopf.len() + koerper.len());
    out.extend_from_slice(kopf);
    out.extend_from_slice(&koerper);
    Ok(out)
}

fn generisch_zerlegen(
    data: &[u8],
    codec: Option<Codec>,
    kind: FrameKind,
) -> CryptoResult<VersiegelterFrame> {
    let praefix = layout::klartext_praefix(data, codec, kind);
    let (kopf, rest) = data.split_at(praefix);
    let nullen = h264::nullen_am_ende(kopf);
    let koerper = if codec == Some(Codec::H264) && h264::braucht_unescape_nach(rest, nullen) {
        Cow::Owned(h264::unescape_nach(rest, nullen))
    } else {
        Cow::Borrowed(rest)
    };

    let zerlegt = trailer::generisch_zerlegen(&koerper)?;
    if zerlegt.ciphertext.len() < TAG_LAENGE {
        return Err(CryptoError::UngueltigeDaten("Ciphertext ohne Auth-Tag".into()));
    }
    Ok(VersiegelterFrame::Generisch {
        kopf: kopf.to_vec(),
        ciphertext: zerlegt.ciphertext.to_vec(),
        iv: zerlegt.iv,
        key_index: zerlegt.trailer.key_index,
    })
}

fn av1_zerlegen(data: &[u8]) -> Option<VersiegelterFrame> {
    let fund = Av1Metadaten::finden(data)?;
    let aad = fund.layout.build_aad(&fund.nutzdaten);
    Some(VersiegelterFrame::Av1 {
        nutzdaten: fund.nutzdaten,
        layout: fund.layout,
        aad,
        metadaten: fund.metadaten,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
