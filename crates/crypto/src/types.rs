//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use aes_gcm::Aes128Gcm;

/// Anzahl Slots im Schluesselring (entspricht dem 4-Bit-Indexfeld)
pub const KEYRING_GROESSE: usize = 16;

/// IV-Laenge fuer AES-GCM in Bytes
pub const IV_LAENGE: usize = 12;

/// Laenge des GCM-Auth-Tags in Bytes
pub const TAG_LAENGE: usize = 16;

/// Laenge des abgeleiteten AES-128-Schluessels
pub const AES_SCHLUESSEL_LAENGE: usize = 16;

/// Laenge des Ratchet-Materials in Bytes
pub const MATERIAL_LAENGE: usize = 32;

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBytes(pub Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for SecretBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Schluesselsatz eines Ring-Slots: Ableitungsmaterial + AEAD-Schluessel
///
/// Unveraenderlich. Wird als `Arc<KeySet>` geteilt; die Arc-Identitaet
/// dient beim Ratchet als Vergleichswert fuer Compare-and-Set.
#[derive(Clone)]
pub struct KeySet {
    /// Material, aus dem der Schluessel abgeleitet wurde (Ratchet-Eingang)
    pub material: SecretBytes,
    /// AES-128-GCM-Instanz
    pub(crate) encryption_key: Aes128Gcm,
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("material", &self.material)
            .field("encryption_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_bytes_debug_ist_redigiert() {
        let s = SecretBytes::new(vec![0x13; 32]);
        assert_eq!(format!("{s:?}"), "SecretBytes([REDACTED] 32 bytes)");
    }

    #[test]
    fn secret_bytes_laenge() {
        let s = SecretBytes::from(&b"abc"[..]);
        assert_eq!(s.len(), 3);
        assert!(!s.is_empty());
        assert!(SecretBytes::new(Vec::new()).is_empty());
    }
}
