//! Schluesselableitung und Ratchet
//!
//! Beide Schritte nutzen HKDF-SHA256 mit dem Ratchet-Salt der Session
//! und 128 Nullbytes als Info:
//!
//! ```text
//! AES-Schluessel = HKDF(material, salt, info)[0..16]
//! naechstes Material = HKDF(material, salt, info)[0..32]
//! ```

use std::sync::Arc;

use aes_gcm::aead::KeyInit;
use aes_gcm::Aes128Gcm;
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};
use crate::types::{KeySet, SecretBytes, AES_SCHLUESSEL_LAENGE, MATERIAL_LAENGE};

const HKDF_INFO: [u8; 128] = [0u8; 128];

/// HKDF-basierte Key Derivation (allgemein verwendbar)
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// Leitet aus Material den AES-128-GCM-Schluesselsatz ab
pub fn key_set_ableiten(material: SecretBytes, salt: &[u8]) -> CryptoResult<KeySet> {
    let okm = SecretBytes::new(hkdf_derive(
        material.as_bytes(),
        salt,
        &HKDF_INFO,
        AES_SCHLUESSEL_LAENGE,
    )?);
    let encryption_key = Aes128Gcm::new_from_slice(okm.as_bytes()).map_err(|_| {
        CryptoError::UngueltigeSchluesselLaenge {
            erwartet: AES_SCHLUESSEL_LAENGE,
            erhalten: okm.len(),
        }
    })?;
    Ok(KeySet {
        material,
        encryption_key,
    })
}

/// Ein Ratchet-Schritt: neues Material aus dem alten
pub fn material_ratchet(material: &SecretBytes, salt: &[u8]) -> CryptoResult<SecretBytes> {
    hkdf_derive(material.as_bytes(), salt, &HKDF_INFO, MATERIAL_LAENGE).map(SecretBytes::new)
}

/// Ergebnis eines Ratchet-Schritts
#[derive(Debug, Clone)]
pub struct RatchetErgebnis {
    /// Neues Material (wird als Ratchet-Ereignis gemeldet)
    pub material: SecretBytes,
    /// Daraus abgeleiteter Schluesselsatz
    pub key_set: Arc<KeySet>,
    /// Schluesselsatz, von dem aus geratchet wurde
    pub quelle: Arc<KeySet>,
}

/// Ableitung auf dem Blocking-Pool
pub async fn key_set_ableiten_async(material: SecretBytes, salt: Arc<[u8]>) -> CryptoResult<KeySet> {
    tokio::task::spawn_blocking(move || key_set_ableiten(material, &salt))
        .await
        .map_err(|e| CryptoError::Intern(format!("Ableitungs-Task abgebrochen: {e}")))?
}

/// Ratchet-Schritt auf dem Blocking-Pool
pub async fn ratchet_async(quelle: Arc<KeySet>, salt: Arc<[u8]>) -> CryptoResult<RatchetErgebnis> {
    tokio::task::spawn_blocking(move || {
        let material = material_ratchet(&quelle.material, &salt)?;
        let key_set = key_set_ableiten(material.clone(), &salt)?;
        Ok(RatchetErgebnis {
            material,
            key_set: Arc::new(key_set),
            quelle,
        })
    })
    .await
    .map_err(|e| CryptoError::Intern(format!("Ratchet-Task abgebrochen: {e}")))?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8] = b"FunkstilleFrameKey";

    #[test]
    fn ableitung_ist_deterministisch() {
        let a = material_ratchet(&SecretBytes::from(&b"geheim"[..]), SALT).unwrap();
        let b = material_ratchet(&SecretBytes::from(&b"geheim"[..]), SALT).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), MATERIAL_LAENGE);
    }

    #[test]
    fn ratchet_aendert_material() {
        let start = SecretBytes::from(&b"geheim"[..]);
        let eins = material_ratchet(&start, SALT).unwrap();
        let zwei = material_ratchet(&eins, SALT).unwrap();
        assert_ne!(start, eins);
        assert_ne!(eins, zwei);
    }

    #[test]
    fn salt_beeinflusst_ergebnis() {
        let m = SecretBytes::from(&b"geheim"[..]);
        assert_ne!(
            material_ratchet(&m, SALT).unwrap(),
            material_ratchet(&m, b"anderes-salt").unwrap()
        );
    }

    #[test]
    fn schluessel_ist_praefix_des_ratchet_materials() {
        // Gleiche HKDF-Parameter: der 16-Byte-Schluessel ist der Anfang der 32-Byte-Ausgabe
        let m = b"geheim";
        let kurz = hkdf_derive(m, SALT, &HKDF_INFO, AES_SCHLUESSEL_LAENGE).unwrap();
        let lang = hkdf_derive(m, SALT, &HKDF_INFO, MATERIAL_LAENGE).unwrap();
        assert_eq!(&lang[..AES_SCHLUESSEL_LAENGE], &kurz[..]);
    }

    #[tokio::test]
    async fn async_ratchet_liefert_quelle_zurueck() {
        let salt: Arc<[u8]> = Arc::from(SALT);
        let start = Arc::new(key_set_ableiten_async(SecretBytes::from(&b"geheim"[..]), Arc::clone(&salt)).await.unwrap());
        let ergebnis = ratchet_async(Arc::clone(&start), salt).await.unwrap();
        assert!(Arc::ptr_eq(&ergebnis.quelle, &start));
        assert_eq!(ergebnis.key_set.material, ergebnis.material);
    }
}
