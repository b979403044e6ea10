//! Codec-Layout-Analyse
//!
//! Zerlegt einen kodierten Frame in Bereiche, die im Klartext bleiben
//! muessen (Header, OBU-Header, Laengenfelder, zugleich AAD) und
//! Bereiche, die verschluesselt werden.
//!
//! ## Klartext-Praefix (VP8, VP9, Opus, H.264-Fallback)
//! ```text
//! Key-Frame   10 Bytes
//! Delta-Frame  3 Bytes
//! Audio        1 Byte
//! Leer         0 Bytes
//! ```
//!
//! H.264 sucht den ersten Slice-NALU ([`h264`]), AV1 parst OBUs in vier
//! Container-Formen ([`av1`]).

pub mod av1;
pub mod h264;

use funkstille_core::types::{Codec, FrameKind};

use crate::error::{CryptoError, CryptoResult};

/// Halboffener Byte-Bereich `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Aufteilung eines Frames in AAD- und geschuetzte Bereiche
///
/// Wird pro Frame abgeleitet und nie gespeichert. Angrenzende Bereiche
/// derselben Art werden zusammengelegt, leere Bereiche ignoriert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionLayout {
    aad: Vec<ByteRange>,
    protected: Vec<ByteRange>,
}

impl EncryptionLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout mit `praefix` Klartext-Bytes und geschuetztem Rest
    pub fn mit_klartext_praefix(laenge: usize, praefix: usize) -> Self {
        let praefix = praefix.min(laenge);
        let mut layout = Self::new();
        layout.klartext(0, praefix);
        layout.geschuetzt(praefix, laenge);
        layout
    }

    /// Markiert `[start, end)` als Klartext (AAD)
    pub fn klartext(&mut self, start: usize, end: usize) {
        Self::anfuegen(&mut self.aad, start, end);
    }

    /// Markiert `[start, end)` als geschuetzt
    pub fn geschuetzt(&mut self, start: usize, end: usize) {
        Self::anfuegen(&mut self.protected, start, end);
    }

    fn anfuegen(ranges: &mut Vec<ByteRange>, start: usize, end: usize) {
        if start >= end {
            return;
        }
        match ranges.last_mut() {
            Some(letzter) if letzter.end == start => letzter.end = end,
            _ => ranges.push(ByteRange::new(start, end)),
        }
    }

    pub fn aad_ranges(&self) -> &[ByteRange] {
        &self.aad
    }

    pub fn protected_ranges(&self) -> &[ByteRange] {
        &self.protected
    }

    /// Gesamtzahl geschuetzter Bytes
    pub fn geschuetzte_laenge(&self) -> usize {
        self.protected.iter().map(ByteRange::len).sum()
    }

    /// Sammelt alle AAD-Bytes in Reihenfolge
    pub fn build_aad(&self, data: &[u8]) -> Vec<u8> {
        Self::sammeln(&self.aad, data)
    }

    /// Sammelt alle geschuetzten Bytes in Reihenfolge
    pub fn extract_protected(&self, data: &[u8]) -> Vec<u8> {
        Self::sammeln(&self.protected, data)
    }

    fn sammeln(ranges: &[ByteRange], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ranges.iter().map(ByteRange::len).sum());
        for r in ranges {
            out.extend_from_slice(&data[r.start..r.end]);
        }
        out
    }

    /// Verteilt `bytes` zurueck auf die geschuetzten Bereiche von `data`
    pub fn write_protected(&self, data: &mut [u8], bytes: &[u8]) -> CryptoResult<()> {
        if bytes.len() != self.geschuetzte_laenge() {
            return Err(CryptoError::Intern(format!(
                "Geschuetzte Laenge passt nicht: erwartet {}, erhalten {}",
                self.geschuetzte_laenge(),
                bytes.len()
            )));
        }
        if self.protected.last().is_some_and(|r| r.end > data.len()) {
            return Err(CryptoError::Intern("Layout groesser als Frame".into()));
        }
        let mut offset = 0;
        for r in &self.protected {
            data[r.start..r.end].copy_from_slice(&bytes[offset..offset + r.len()]);
            offset += r.len();
        }
        Ok(())
    }

    /// Prueft, dass AAD- und geschuetzte Bereiche `[0, laenge)` lueckenlos
    /// und ueberschneidungsfrei abdecken
    pub fn ist_partition(&self, laenge: usize) -> bool {
        let mut alle: Vec<ByteRange> = self.aad.iter().chain(&self.protected).copied().collect();
        alle.sort_by_key(|r| r.start);
        let mut pos = 0;
        for r in alle {
            if r.start != pos || r.is_empty() {
                return false;
            }
            pos = r.end;
        }
        pos == laenge
    }
}

/// Klartext-Bytes je Frame-Art (VP8-Tabelle, auch Fallback fuer H.264)
pub fn klartext_bytes(kind: FrameKind) -> usize {
    match kind {
        FrameKind::Key => 10,
        FrameKind::Delta => 3,
        FrameKind::Audio => 1,
        FrameKind::Empty => 0,
    }
}

/// Klartext-Praefix fuer Codecs mit Praefix-Layout (alles ausser AV1)
pub fn klartext_praefix(data: &[u8], codec: Option<Codec>, kind: FrameKind) -> usize {
    let praefix = match codec {
        Some(Codec::H264) => h264::klartext_praefix(data).unwrap_or_else(|| klartext_bytes(kind)),
        _ => klartext_bytes(kind),
    };
    praefix.min(data.len())
}

/// Berechnet das Layout eines Frames
///
/// `None` bedeutet: Frame nicht verschluesselbar (nur AV1 kann scheitern).
pub fn compute_layout(
    data: &[u8],
    codec: Option<Codec>,
    kind: FrameKind,
) -> Option<EncryptionLayout> {
    match codec {
        Some(Codec::Av1) => av1::analysieren(data).map(|analyse| analyse.layout),
        _ => Some(EncryptionLayout::mit_klartext_praefix(
            data.len(),
            klartext_praefix(data, codec, kind),
        )),
    }
}
