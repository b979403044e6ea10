//! Frame-Trailer
//!
//! ## Generisch (VP8, VP9, H.264, Opus)
//! ```text
//! [Klartext-Praefix][Ciphertext + Tag][IV (12)][IV-Laenge (1)][Key-Index (1)]
//! ```
//!
//! ## AV1
//! Der Trailer wird als Padding-OBU angehaengt, damit der Frame fuer
//! Depacketizer weiterhin ein gueltiger AV1-Bitstrom bleibt:
//! ```text
//! [0x7A][0x20][E2 EE][Version 1][Key-Index][IV (12)][Tag (16)]
//! ```
//! In AnnexB-Frames und aggregierten Frames mit W = 0 steht zusaetzlich
//! ein leb128-Laengenpraefix (`0x22`) davor. In aggregierten Frames mit
//! W = 1 oder 2 wird die OBU ein eigenes Element: das bisher letzte
//! Element bekommt ein Laengenfeld und W zaehlt eins hoch. W = 3 muss vor
//! der Verschluesselung nach W = 0 umgerahmt sein.

use crate::e2e::layout::av1::{self, Av1Shape, OBU_PADDING};
use crate::e2e::layout::EncryptionLayout;
use crate::error::{CryptoError, CryptoResult};
use crate::types::{IV_LAENGE, TAG_LAENGE};

/// Laenge des generischen Trailers (IV-Laenge + Key-Index)
pub const TRAILER_LAENGE: usize = 2;

pub const AV1_METADATEN_MAGIC: [u8; 2] = [0xE2, 0xEE];
pub const AV1_METADATEN_VERSION: u8 = 1;
/// Nutzlast der Metadaten-OBU: Magic, Version, Key-Index, IV, Tag
pub const AV1_METADATEN_NUTZLAST: usize = 4 + IV_LAENGE + TAG_LAENGE;
/// Padding-OBU mit Groessenfeld
pub const AV1_METADATEN_OBU_HEADER: u8 = (OBU_PADDING << 3) | 0x02;
/// Header + Groessenbyte + Nutzlast
pub const AV1_METADATEN_OBU_LAENGE: usize = 2 + AV1_METADATEN_NUTZLAST;

/// Generischer 2-Byte-Trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTrailer {
    pub iv_laenge: u8,
    pub key_index: u8,
}

impl FrameTrailer {
    pub fn new(key_index: u8) -> Self {
        Self {
            iv_laenge: IV_LAENGE as u8,
            key_index,
        }
    }

    pub fn als_bytes(&self) -> [u8; TRAILER_LAENGE] {
        [self.iv_laenge, self.key_index]
    }

    /// Liest die letzten zwei Bytes
    pub fn lesen(body: &[u8]) -> Option<Self> {
        match body {
            [.., iv_laenge, key_index] => Some(Self {
                iv_laenge: *iv_laenge,
                key_index: *key_index,
            }),
            _ => None,
        }
    }
}

/// Zerlegter generischer Frame-Koerper (alles nach dem Klartext-Praefix)
#[derive(Debug)]
pub struct GenerischerKoerper<'a> {
    pub ciphertext: &'a [u8],
    pub iv: [u8; IV_LAENGE],
    pub trailer: FrameTrailer,
}

/// Haengt IV und Trailer an den Ciphertext an
pub fn generisch_anhaengen(koerper: &mut Vec<u8>, iv: &[u8; IV_LAENGE], key_index: u8) {
    koerper.extend_from_slice(iv);
    koerper.extend_from_slice(&FrameTrailer::new(key_index).als_bytes());
}

/// Zerlegt `ciphertext || iv || trailer`
pub fn generisch_zerlegen(koerper: &[u8]) -> CryptoResult<GenerischerKoerper<'_>> {
    let trailer = FrameTrailer::lesen(koerper)
        .ok_or_else(|| CryptoError::UngueltigeDaten("Frame zu kurz fuer Trailer".into()))?;

    let iv_laenge = usize::from(trailer.iv_laenge);
    if iv_laenge != IV_LAENGE {
        return Err(CryptoError::UngueltigeDaten(format!(
            "Unerwartete IV-Laenge {iv_laenge}"
        )));
    }

    let rest = koerper.len() - TRAILER_LAENGE;
    if rest < iv_laenge + TAG_LAENGE {
        return Err(CryptoError::UngueltigeDaten(format!(
            "Frame zu kurz: {} Bytes nach Praefix",
            koerper.len()
        )));
    }

    let mut iv = [0u8; IV_LAENGE];
    iv.copy_from_slice(&koerper[rest - iv_laenge..rest]);
    Ok(GenerischerKoerper {
        ciphertext: &koerper[..rest - iv_laenge],
        iv,
        trailer,
    })
}

/// Inhalt der AV1-Metadaten-OBU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Av1Metadaten {
    pub key_index: u8,
    pub iv: [u8; IV_LAENGE],
    pub tag: [u8; TAG_LAENGE],
}

/// Gefundene Metadaten samt Layout des Frames davor
#[derive(Debug, Clone)]
pub struct Av1Fund {
    pub shape: Av1Shape,
    pub layout: EncryptionLayout,
    pub metadaten: Av1Metadaten,
    /// Frame ohne Metadaten, in der Rahmung vor dem Anhaengen
    pub nutzdaten: Vec<u8>,
}

impl Av1Metadaten {
    pub fn als_obu(&self) -> [u8; AV1_METADATEN_OBU_LAENGE] {
        let mut obu = [0u8; AV1_METADATEN_OBU_LAENGE];
        obu[0] = AV1_METADATEN_OBU_HEADER;
        obu[1] = AV1_METADATEN_NUTZLAST as u8;
        obu[2..4].copy_from_slice(&AV1_METADATEN_MAGIC);
        obu[4] = AV1_METADATEN_VERSION;
        obu[5] = self.key_index;
        obu[6..6 + IV_LAENGE].copy_from_slice(&self.iv);
        obu[6 + IV_LAENGE..].copy_from_slice(&self.tag);
        obu
    }

    /// Parst genau eine Metadaten-OBU
    pub fn aus_obu(obu: &[u8]) -> Option<Self> {
        if obu.len() != AV1_METADATEN_OBU_LAENGE
            || obu[0] != AV1_METADATEN_OBU_HEADER
            || usize::from(obu[1]) != AV1_METADATEN_NUTZLAST
            || obu[2..4] != AV1_METADATEN_MAGIC
            || obu[4] != AV1_METADATEN_VERSION
        {
            return None;
        }
        let mut iv = [0u8; IV_LAENGE];
        iv.copy_from_slice(&obu[6..6 + IV_LAENGE]);
        let mut tag = [0u8; TAG_LAENGE];
        tag.copy_from_slice(&obu[6 + IV_LAENGE..]);
        Some(Self {
            key_index: obu[5],
            iv,
            tag,
        })
    }

    /// Haengt die OBU in der zur Form passenden Rahmung an
    pub fn anhaengen(&self, frame: &mut Vec<u8>, shape: Av1Shape) -> CryptoResult<()> {
        match shape.w_feld(frame) {
            Some(w @ 1..=2) => {
                *frame = shape.letztes_element_mit_laenge(frame, w + 1).ok_or_else(|| {
                    CryptoError::LayoutNichtUnterstuetzt(format!(
                        "AV1-Aggregation mit W = {w} nicht umrahmbar"
                    ))
                })?;
            }
            Some(3) => {
                return Err(CryptoError::LayoutNichtUnterstuetzt(
                    "AV1-Aggregation mit W = 3 hat kein freies Element".into(),
                ))
            }
            _ => {
                if shape.anhang_mit_laengenpraefix(frame) {
                    frame.extend_from_slice(&av1::leb128_schreiben(
                        AV1_METADATEN_OBU_LAENGE as u32,
                    ));
                }
            }
        }
        frame.extend_from_slice(&self.als_obu());
        Ok(())
    }

    /// Sucht die Metadaten am Frame-Ende und stellt die Rahmung davor wieder her
    ///
    /// Die Formen werden in derselben Reihenfolge wie beim Senden probiert;
    /// die erste Form, deren Rahmung passt und deren Rest gueltig ist, gewinnt.
    pub fn finden(frame: &[u8]) -> Option<Av1Fund> {
        let laenge = frame.len();
        if laenge < AV1_METADATEN_OBU_LAENGE {
            return None;
        }
        let metadaten = Self::aus_obu(&frame[laenge - AV1_METADATEN_OBU_LAENGE..])?;
        let ohne_obu = &frame[..laenge - AV1_METADATEN_OBU_LAENGE];

        for shape in av1::shape_reihenfolge(frame) {
            let nutzdaten = match shape.w_feld(frame) {
                // Metadaten als eigenes Element: W und letztes Laengenfeld zurueck
                Some(w @ 2..=3) => match shape.letztes_element_ohne_laenge(ohne_obu, w - 1) {
                    Some(daten) => daten,
                    None => continue,
                },
                Some(1) => continue,
                _ if shape.anhang_mit_laengenpraefix(frame) => {
                    let Some((&praefix, rest)) = ohne_obu.split_last() else {
                        continue;
                    };
                    if usize::from(praefix) != AV1_METADATEN_OBU_LAENGE {
                        continue;
                    }
                    rest.to_vec()
                }
                _ => ohne_obu.to_vec(),
            };

            if let Some(layout) = shape.parsen(&nutzdaten) {
                return Some(Av1Fund {
                    shape,
                    layout,
                    metadaten,
                    nutzdaten,
                });
            }
        }
        None
    }
}
