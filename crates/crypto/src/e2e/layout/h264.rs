//! H.264 Annex-B Analyse
//!
//! Findet NAL Units anhand ihrer Startcodes (`00 00 01`, optional mit
//! fuehrenden Nullen) und bestimmt den Klartext-Praefix: alles bis
//! einschliesslich des ersten Payload-Bytes des ersten Slice-NALU.
//!
//! Ausserdem Emulation Prevention: verschluesselte Bytes duerfen keinen
//! Startcode enthalten, daher wird nach zwei Nullbytes vor jedem Byte
//! `<= 0x03` ein `0x03` eingefuegt (und beim Empfang wieder entfernt).

/// NALU-Typ: Slice eines Nicht-IDR-Bildes
pub const NALU_SLICE_NON_IDR: u8 = 1;
/// NALU-Typ: Slice eines IDR-Bildes
pub const NALU_SLICE_IDR: u8 = 5;

const EMULATION_BYTE: u8 = 0x03;
const NULLEN_IM_STARTCODE: usize = 2;

/// NALU-Typ aus dem Header-Byte
pub fn nalu_typ(header: u8) -> u8 {
    header & 0x1F
}

/// Positionen der NALU-Header-Bytes im Bytestrom
///
/// `None` wenn vor dem ersten Startcode Daten stehen.
pub fn finde_nalu_indizes(data: &[u8]) -> Option<Vec<usize>> {
    let mut indizes = Vec::new();
    let such_laenge = data.len().saturating_sub(2);
    let mut start = 0;
    let mut pos = 0;

    while pos < such_laenge {
        while pos < such_laenge && !(data[pos] == 0 && data[pos + 1] == 0 && data[pos + 2] == 1) {
            pos += 1;
        }
        if pos >= such_laenge {
            pos = data.len();
        }

        // Nullen vor dem Startcode gehoeren nicht zur vorherigen NALU
        let mut ende = pos;
        while ende > start && data[ende - 1] == 0 {
            ende -= 1;
        }

        if start == 0 {
            if ende != start {
                return None;
            }
        } else {
            indizes.push(start);
        }

        start = pos + 3;
        pos = start;
    }

    Some(indizes)
}

/// Klartext-Praefix: erster Slice-NALU-Header + 2
///
/// `None` wenn kein Slice gefunden wird (Aufrufer nutzt die Frame-Tabelle).
pub fn klartext_praefix(data: &[u8]) -> Option<usize> {
    finde_nalu_indizes(data)?
        .into_iter()
        .find(|&i| matches!(nalu_typ(data[i]), NALU_SLICE_NON_IDR | NALU_SLICE_IDR))
        .map(|i| (i + 2).min(data.len()))
}

/// Fuegt Emulation-Prevention-Bytes ein (RBSP schreiben)
pub fn escape(data: &[u8]) -> Vec<u8> {
    escape_nach(data, 0)
}

/// Wie [`escape`], `fuehrende_nullen` stehen schon unmittelbar davor
///
/// Der Klartext-Praefix kann auf Nullbytes enden, die zusammen mit dem
/// Anfang von `data` einen Startcode bilden wuerden.
pub fn escape_nach(data: &[u8], fuehrende_nullen: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64 + 1);
    let mut nullen = fuehrende_nullen.min(NULLEN_IM_STARTCODE);
    for &byte in data {
        if byte <= EMULATION_BYTE && nullen >= NULLEN_IM_STARTCODE {
            out.push(EMULATION_BYTE);
            nullen = 0;
        }
        out.push(byte);
        if byte == 0 {
            nullen += 1;
        } else {
            nullen = 0;
        }
    }
    out
}

/// Entfernt Emulation-Prevention-Bytes (RBSP lesen)
pub fn unescape(data: &[u8]) -> Vec<u8> {
    unescape_nach(data, 0)
}

/// Gegenstueck zu [`escape_nach`] mit denselben `fuehrende_nullen`
pub fn unescape_nach(data: &[u8], fuehrende_nullen: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut nullen = fuehrende_nullen.min(NULLEN_IM_STARTCODE);
    for &byte in data {
        if byte == EMULATION_BYTE && nullen >= NULLEN_IM_STARTCODE {
            nullen = 0;
            continue;
        }
        out.push(byte);
        if byte == 0 {
            nullen += 1;
        } else {
            nullen = 0;
        }
    }
    out
}

/// Enthaelt `data` mindestens eine `00 00 03`-Sequenz?
pub fn braucht_unescape(data: &[u8]) -> bool {
    braucht_unescape_nach(data, 0)
}

/// Wie [`braucht_unescape`], Nullbytes vor `data` zaehlen mit
pub fn braucht_unescape_nach(data: &[u8], fuehrende_nullen: usize) -> bool {
    let mut nullen = fuehrende_nullen.min(NULLEN_IM_STARTCODE);
    for &byte in data {
        if byte == EMULATION_BYTE && nullen >= NULLEN_IM_STARTCODE {
            return true;
        }
        nullen = if byte == 0 { nullen + 1 } else { 0 };
    }
    false
}

/// Anzahl Nullbytes am Ende von `data`, hoechstens zwei
pub fn nullen_am_ende(data: &[u8]) -> usize {
    data.iter()
        .rev()
        .take(NULLEN_IM_STARTCODE)
        .take_while(|&&b| b == 0)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nalu_indizes_mit_drei_und_vier_byte_startcodes() {
        // SPS (4-Byte-Startcode), PPS, IDR-Slice
        let data = [
            0, 0, 0, 1, 0x67, 0xAA, 0xBB, //
            0, 0, 1, 0x68, 0xCC, //
            0, 0, 1, 0x65, 0x88, 0x84, 0x21,
        ];
        let indizes = finde_nalu_indizes(&data).unwrap();
        assert_eq!(indizes, vec![4, 10, 15]);
        assert_eq!(nalu_typ(data[15]), NALU_SLICE_IDR);
    }

    #[test]
    fn fuehrende_daten_werden_abgelehnt() {
        let data = [0x42, 0, 0, 1, 0x65, 0x11];
        assert!(finde_nalu_indizes(&data).is_none());
        assert!(klartext_praefix(&data).is_none());
    }

    #[test]
    fn praefix_endet_zwei_bytes_nach_slice_header() {
        let data = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x41, 0x9A, 0x10, 0x20, 0x30];
        // Non-IDR Slice bei Index 9 -> Praefix 11
        assert_eq!(klartext_praefix(&data), Some(11));
    }

    #[test]
    fn ohne_slice_kein_praefix() {
        let data = [0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F];
        assert_eq!(klartext_praefix(&data), None);
    }

    #[test]
    fn escape_fuegt_emulation_bytes_ein() {
        assert_eq!(escape(&[0, 0, 1]), vec![0, 0, 3, 1]);
        assert_eq!(escape(&[0, 0, 0, 0]), vec![0, 0, 3, 0, 0]);
        assert_eq!(escape(&[0, 0, 4]), vec![0, 0, 4]);
    }

    #[test]
    fn vorhandenes_00_00_03_ueberlebt_roundtrip() {
        let nutzdaten = [0x11, 0, 0, 3, 0x22, 0, 0, 3, 3, 0, 0];
        let escaped = escape(&nutzdaten);
        assert_eq!(escaped, vec![0x11, 0, 0, 3, 3, 0x22, 0, 0, 3, 3, 3, 0, 0]);
        assert!(braucht_unescape(&escaped));
        assert_eq!(unescape(&escaped), nutzdaten);
    }

    #[test]
    fn escaped_daten_enthalten_keinen_startcode() {
        let nutzdaten: Vec<u8> = (0..512u32).map(|i| if i % 5 < 3 { 0 } else { (i % 4) as u8 }).collect();
        let escaped = escape(&nutzdaten);
        assert!(!escaped.windows(3).any(|w| w == [0, 0, 1] || w == [0, 0, 0]));
        assert_eq!(unescape(&escaped), nutzdaten);
    }

    #[test]
    fn escape_beruecksichtigt_nullen_im_praefix() {
        // Praefix endet auf 0x00, Koerper beginnt mit 00 01
        let praefix = [0, 0, 0, 1, 0x65, 0x00];
        let koerper = [0x00, 0x01, 0x7F];
        assert_eq!(nullen_am_ende(&praefix), 1);

        let ohne_saat: Vec<u8> = praefix.iter().chain(&escape(&koerper)).copied().collect();
        assert!(ohne_saat[4..].windows(3).any(|w| w == [0, 0, 1]));

        let escaped = escape_nach(&koerper, nullen_am_ende(&praefix));
        assert_eq!(escaped, vec![0x00, 0x03, 0x01, 0x7F]);
        let frame: Vec<u8> = praefix.iter().chain(&escaped).copied().collect();
        assert!(!frame[4..].windows(3).any(|w| w == [0, 0, 1]));

        assert!(braucht_unescape_nach(&escaped, 1));
        assert!(!braucht_unescape(&escaped));
        assert_eq!(unescape_nach(&escaped, 1), koerper);
    }

    #[test]
    fn nullen_am_ende_zaehlt_hoechstens_zwei() {
        assert_eq!(nullen_am_ende(&[]), 0);
        assert_eq!(nullen_am_ende(&[0x65, 0x88]), 0);
        assert_eq!(nullen_am_ende(&[0x65, 0, 0]), 2);
        assert_eq!(nullen_am_ende(&[0, 0, 0, 0]), 2);
    }

    #[test]
    fn braucht_unescape_erkennung() {
        assert!(!braucht_unescape(&[0, 0, 4, 0, 3]));
        assert!(braucht_unescape(&[9, 0, 0, 3]));
    }
}
