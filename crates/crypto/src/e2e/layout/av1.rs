//! AV1 OBU-Analyse
//!
//! Ein AV1-Frame kommt in einer von vier Container-Formen an:
//!
//! ```text
//! LowOverhead     obu obu obu ...           (jede OBU mit Groessenfeld)
//! AnnexB          leb128(len) obu ...       (len umfasst genau eine OBU)
//! Aggregated      agg_header element ...    (RTP-Aggregation, Z Y W W N 0 0 0)
//! AggregatedRtx   osn(2) agg_header ...     (Retransmission mit OSN-Praefix)
//! ```
//!
//! OBU-Header, Extension-Bytes und Groessenfelder bleiben Klartext und
//! gehen in die AAD ein. Frame-Header- und Frame-OBUs behalten zusaetzlich
//! ihr erstes Payload-Byte im Klartext. Temporal Delimiter muessen leer sein.

use super::EncryptionLayout;

pub const OBU_SEQUENCE_HEADER: u8 = 1;
pub const OBU_TEMPORAL_DELIMITER: u8 = 2;
pub const OBU_FRAME_HEADER: u8 = 3;
pub const OBU_TILE_GROUP: u8 = 4;
pub const OBU_METADATA: u8 = 5;
pub const OBU_FRAME: u8 = 6;
pub const OBU_REDUNDANT_FRAME_HEADER: u8 = 7;
pub const OBU_TILE_LIST: u8 = 8;
pub const OBU_PADDING: u8 = 15;

const LEB128_MAX_BYTES: usize = 8;
const RTX_OSN_LAENGE: usize = 2;

/// Container-Form eines AV1-Frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Av1Shape {
    LowOverhead,
    AnnexB,
    Aggregated,
    AggregatedRtx,
}

/// Ergebnis der Analyse: erkannte Form + Layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Av1Layout {
    pub shape: Av1Shape,
    pub layout: EncryptionLayout,
}

#[derive(Debug, Clone, Copy)]
struct ObuHeader {
    typ: u8,
    extension: bool,
    has_size: bool,
}

fn obu_header(byte: u8) -> Option<ObuHeader> {
    // forbidden bit und reserved bit muessen 0 sein
    if byte & 0x80 != 0 || byte & 0x01 != 0 {
        return None;
    }
    let typ = (byte >> 3) & 0x0F;
    if !matches!(typ, OBU_SEQUENCE_HEADER..=OBU_TILE_LIST | OBU_PADDING) {
        return None;
    }
    Some(ObuHeader {
        typ,
        extension: byte & 0x04 != 0,
        has_size: byte & 0x02 != 0,
    })
}

/// Liest einen leb128-Wert, gibt (Wert, gelesene Bytes) zurueck
///
/// Hoechstens 8 Bytes, Werte ueber `u32::MAX` sind ungueltig.
pub fn leb128_lesen(data: &[u8]) -> Option<(u32, usize)> {
    let mut wert: u64 = 0;
    for (i, &byte) in data.iter().take(LEB128_MAX_BYTES).enumerate() {
        wert |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return u32::try_from(wert).ok().map(|w| (w, i + 1));
        }
    }
    None
}

/// Kodiert `wert` als leb128 (kuerzeste Form)
pub fn leb128_schreiben(mut wert: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    loop {
        let byte = (wert & 0x7F) as u8;
        wert >>= 7;
        if wert == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Regeln fuer das Parsen einer einzelnen OBU innerhalb `[start, ende)`
#[derive(Debug, Clone, Copy)]
struct ObuRegeln {
    /// OBU muss ein Groessenfeld tragen
    size_pflicht: bool,
    /// Groessenfeld muss den Bereich exakt fuellen
    size_fuellt_bereich: bool,
    /// Groessenfeld darf ueber das Bereichsende hinauszeigen (Fragment)
    abgeschnitten_erlaubt: bool,
}

/// Parst eine OBU ab `start` und traegt ihre Bereiche ein
///
/// Gibt das Ende der OBU zurueck.
fn obu_parsen(
    data: &[u8],
    start: usize,
    ende: usize,
    layout: &mut EncryptionLayout,
    regeln: ObuRegeln,
) -> Option<usize> {
    if start >= ende {
        return None;
    }
    let header = obu_header(data[start])?;
    if regeln.size_pflicht && !header.has_size {
        return None;
    }

    let mut pos = start + 1;
    layout.klartext(start, pos);

    if header.extension {
        if pos >= ende {
            return None;
        }
        layout.klartext(pos, pos + 1);
        pos += 1;
    }

    let payload_ende = if header.has_size {
        let (groesse, n) = leb128_lesen(&data[pos..ende])?;
        layout.klartext(pos, pos + n);
        pos += n;
        let soll = pos.checked_add(groesse as usize)?;
        if soll > ende {
            if !regeln.abgeschnitten_erlaubt {
                return None;
            }
            ende
        } else if regeln.size_fuellt_bereich && soll != ende {
            return None;
        } else {
            soll
        }
    } else {
        ende
    };

    if header.typ == OBU_TEMPORAL_DELIMITER && payload_ende != pos {
        return None;
    }

    if matches!(header.typ, OBU_FRAME_HEADER | OBU_FRAME) && payload_ende > pos {
        layout.klartext(pos, pos + 1);
        pos += 1;
    }

    layout.geschuetzt(pos, payload_ende);
    Some(payload_ende)
}

fn low_overhead_parsen(data: &[u8]) -> Option<EncryptionLayout> {
    if data.is_empty() {
        return None;
    }
    let regeln = ObuRegeln {
        size_pflicht: true,
        size_fuellt_bereich: false,
        abgeschnitten_erlaubt: false,
    };
    let mut layout = EncryptionLayout::new();
    let mut pos = 0;
    while pos < data.len() {
        pos = obu_parsen(data, pos, data.len(), &mut layout, regeln)?;
    }
    Some(layout)
}

fn annex_b_parsen(data: &[u8]) -> Option<EncryptionLayout> {
    if data.is_empty() {
        return None;
    }
    let regeln = ObuRegeln {
        size_pflicht: false,
        size_fuellt_bereich: true,
        abgeschnitten_erlaubt: false,
    };
    let mut layout = EncryptionLayout::new();
    let mut pos = 0;
    while pos < data.len() {
        let (obu_laenge, n) = leb128_lesen(&data[pos..])?;
        if obu_laenge == 0 {
            return None;
        }
        layout.klartext(pos, pos + n);
        let start = pos + n;
        let ende = start.checked_add(obu_laenge as usize)?;
        if ende > data.len() {
            return None;
        }
        obu_parsen(data, start, ende, &mut layout, regeln)?;
        pos = ende;
    }
    Some(layout)
}

fn aggregiert_parsen(data: &[u8], offset: usize) -> Option<EncryptionLayout> {
    // Aggregations-Header plus mindestens ein Element-Byte
    if data.len() <= offset + 1 {
        return None;
    }
    let agg = data[offset];
    if agg & 0x07 != 0 {
        return None;
    }
    let z = agg & 0x80 != 0;
    let y = agg & 0x40 != 0;
    let w = usize::from((agg >> 4) & 0x03);

    let mut layout = EncryptionLayout::new();
    layout.klartext(0, offset + 1);

    let mut pos = offset + 1;
    let mut element = 0usize;
    while pos < data.len() {
        let letztes_ohne_laenge = w != 0 && element + 1 == w;
        let (start, ende) = if letztes_ohne_laenge {
            (pos, data.len())
        } else {
            let (el_laenge, n) = leb128_lesen(&data[pos..])?;
            if el_laenge == 0 {
                return None;
            }
            layout.klartext(pos, pos + n);
            let start = pos + n;
            let ende = start.checked_add(el_laenge as usize)?;
            if ende > data.len() {
                return None;
            }
            (start, ende)
        };

        if element == 0 && z {
            // Fortsetzung einer fragmentierten OBU: Header liegt im Vorgaenger-Paket
            layout.geschuetzt(start, ende);
        } else {
            let regeln = ObuRegeln {
                size_pflicht: false,
                size_fuellt_bereich: true,
                abgeschnitten_erlaubt: y && ende == data.len(),
            };
            obu_parsen(data, start, ende, &mut layout, regeln)?;
        }

        pos = ende;
        element += 1;
    }

    if w != 0 && element != w {
        return None;
    }
    Some(layout)
}

impl Av1Shape {
    /// Validiert `data` in dieser Form und liefert das Layout
    pub fn parsen(self, data: &[u8]) -> Option<EncryptionLayout> {
        match self {
            Self::LowOverhead => low_overhead_parsen(data),
            Self::AnnexB => annex_b_parsen(data),
            Self::Aggregated => aggregiert_parsen(data, 0),
            Self::AggregatedRtx => aggregiert_parsen(data, RTX_OSN_LAENGE),
        }
    }

    /// Position des Aggregations-Headers (nur aggregierte Formen)
    fn aggregations_offset(self) -> Option<usize> {
        match self {
            Self::Aggregated => Some(0),
            Self::AggregatedRtx => Some(RTX_OSN_LAENGE),
            Self::LowOverhead | Self::AnnexB => None,
        }
    }

    /// W-Feld des Aggregations-Headers (nur aggregierte Formen)
    pub fn w_feld(self, data: &[u8]) -> Option<u8> {
        self.aggregations_offset()
            .and_then(|o| data.get(o))
            .map(|agg| (agg >> 4) & 0x03)
    }

    /// Braucht ein angehaengtes OBU in dieser Form einen leb128-Laengenpraefix?
    ///
    /// AnnexB immer; aggregierte Formen nur wenn W = 0 (alle Elemente mit Laenge).
    pub fn anhang_mit_laengenpraefix(self, data: &[u8]) -> bool {
        match self {
            Self::LowOverhead => false,
            Self::AnnexB => true,
            Self::Aggregated | Self::AggregatedRtx => self.w_feld(data) == Some(0),
        }
    }

    /// Gibt dem laengenlosen letzten Element (W != 0) ein Laengenfeld
    ///
    /// Das Feld wird vor das Element geschrieben, der Header bekommt
    /// `neues_w`. Liefert `None` fuer W = 0 oder kaputte Elemente.
    pub fn letztes_element_mit_laenge(self, data: &[u8], neues_w: u8) -> Option<Vec<u8>> {
        let offset = self.aggregations_offset()?;
        let w = self.w_feld(data)?;
        if w == 0 {
            return None;
        }
        let pos = laengenfeld_position(data, offset, usize::from(w) - 1)?;
        if pos >= data.len() {
            return None;
        }
        let laenge = u32::try_from(data.len() - pos).ok()?;

        let feld = leb128_schreiben(laenge);
        let mut out = Vec::with_capacity(data.len() + feld.len());
        out.extend_from_slice(&data[..pos]);
        out.extend_from_slice(&feld);
        out.extend_from_slice(&data[pos..]);
        out[offset] = mit_w(out[offset], neues_w);
        Some(out)
    }

    /// Umkehrung von [`letztes_element_mit_laenge`](Self::letztes_element_mit_laenge)
    ///
    /// `data` enthaelt `neues_w` Elemente, alle mit Laengenfeld. Das Feld
    /// des letzten wird entfernt und der Header bekommt `neues_w`.
    pub fn letztes_element_ohne_laenge(self, data: &[u8], neues_w: u8) -> Option<Vec<u8>> {
        let offset = self.aggregations_offset()?;
        if neues_w == 0 {
            return None;
        }
        let pos = laengenfeld_position(data, offset, usize::from(neues_w) - 1)?;
        let (laenge, n) = leb128_lesen(data.get(pos..)?)?;
        if laenge == 0 || pos.checked_add(n)?.checked_add(laenge as usize)? != data.len() {
            return None;
        }

        let mut out = Vec::with_capacity(data.len() - n);
        out.extend_from_slice(&data[..pos]);
        out.extend_from_slice(&data[pos + n..]);
        out[offset] = mit_w(out[offset], neues_w);
        Some(out)
    }
}

fn mit_w(agg: u8, w: u8) -> u8 {
    (agg & !0x30) | ((w & 0x03) << 4)
}

/// Position des Laengenfelds nach `anzahl` Elementen mit Laenge
fn laengenfeld_position(data: &[u8], offset: usize, anzahl: usize) -> Option<usize> {
    let mut pos = offset + 1;
    for _ in 0..anzahl {
        let (laenge, n) = leb128_lesen(data.get(pos..)?)?;
        if laenge == 0 {
            return None;
        }
        pos = pos.checked_add(n)?.checked_add(laenge as usize)?;
        if pos > data.len() {
            return None;
        }
    }
    Some(pos)
}

/// Reihenfolge, in der die Formen anhand des ersten Bytes probiert werden
pub fn shape_reihenfolge(data: &[u8]) -> [Av1Shape; 4] {
    use Av1Shape::*;
    match data.first() {
        Some(&b) if obu_header(b).is_some_and(|h| h.has_size) => {
            [LowOverhead, Aggregated, AnnexB, AggregatedRtx]
        }
        Some(&b) if b & 0x07 == 0 => [Aggregated, AnnexB, LowOverhead, AggregatedRtx],
        _ => [AnnexB, AggregatedRtx, LowOverhead, Aggregated],
    }
}

/// Erkennt die Form und berechnet das Layout
///
/// Die erste Form, die den gesamten Frame validiert, gewinnt.
pub fn analysieren(data: &[u8]) -> Option<Av1Layout> {
    shape_reihenfolge(data)
        .into_iter()
        .find_map(|shape| shape.parsen(data).map(|layout| Av1Layout { shape, layout }))
}

#[cfg(test)]
pub(crate) mod testdaten {
    //! Handgebaute AV1-Frames fuer Tests

    /// TD + Sequence Header + Frame, alle mit Groessenfeld
    pub fn low_overhead() -> Vec<u8> {
        let mut f = vec![0x12, 0x00];
        f.extend_from_slice(&[0x0A, 0x03, 0xA1, 0xA2, 0xA3]);
        f.extend_from_slice(&[0x32, 0x06, 0xF0, 0x01, 0x02, 0x03, 0x04, 0x05]);
        f
    }

    /// Gleiche OBUs ohne Groessenfelder, je mit leb128-Laenge davor
    pub fn annex_b() -> Vec<u8> {
        let mut f = vec![0x01, 0x10];
        f.extend_from_slice(&[0x04, 0x08, 0xA1, 0xA2, 0xA3]);
        f.extend_from_slice(&[0x07, 0x30, 0xF0, 0x01, 0x02, 0x03, 0x04, 0x05]);
        f
    }

    /// Aggregation mit W = 2: erstes Element mit Laenge, letztes ohne
    pub fn aggregiert_w2() -> Vec<u8> {
        let mut f = vec![0x20];
        f.extend_from_slice(&[0x04, 0x08, 0xA1, 0xA2, 0xA3]);
        f.extend_from_slice(&[0x30, 0xF0, 0x01, 0x02, 0x03, 0x04, 0x05]);
        f
    }

    /// Aggregation mit W = 0: alle Elemente mit Laenge
    pub fn aggregiert_w0() -> Vec<u8> {
        let mut f = vec![0x08];
        f.extend_from_slice(&[0x04, 0x08, 0xA1, 0xA2, 0xA3]);
        f.extend_from_slice(&[0x07, 0x30, 0xF0, 0x01, 0x02, 0x03, 0x04, 0x05]);
        f
    }

    /// Aggregation mit W = 3: TD, Sequence Header, Frame ohne Laenge
    pub fn aggregiert_w3() -> Vec<u8> {
        let mut f = vec![0x30];
        f.extend_from_slice(&[0x01, 0x10]);
        f.extend_from_slice(&[0x04, 0x08, 0xA1, 0xA2, 0xA3]);
        f.extend_from_slice(&[0x30, 0xF0, 0x01, 0x02, 0x03, 0x04, 0x05]);
        f
    }

    /// Retransmission: OSN + Aggregation mit W = 1
    pub fn aggregiert_rtx() -> Vec<u8> {
        let mut f = vec![0xBE, 0xEF, 0x10];
        f.extend_from_slice(&[0x30, 0xF0, 0x01, 0x02, 0x03, 0x04, 0x05]);
        f
    }
}
