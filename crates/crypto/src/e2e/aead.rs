//! AES-128-GCM fuer Frame-Nutzdaten
//!
//! Generische Frames nutzen die kombinierte Form (Ciphertext || Tag),
//! AV1 die abgetrennte Form, weil der Tag in der Metadaten-OBU steht und
//! der Ciphertext an Ort und Stelle in die OBUs zurueckgeschrieben wird.

use aes_gcm::aead::{Aead, AeadInPlace, Payload};
use aes_gcm::{Nonce, Tag};

use crate::error::{CryptoError, CryptoResult};
use crate::types::{KeySet, IV_LAENGE, TAG_LAENGE};

/// Verschluesselt `klartext`, Ergebnis ist Ciphertext || Tag
pub fn verschluesseln(
    key_set: &KeySet,
    iv: &[u8; IV_LAENGE],
    aad: &[u8],
    klartext: &[u8],
) -> CryptoResult<Vec<u8>> {
    key_set
        .encryption_key
        .encrypt(Nonce::from_slice(iv), Payload { msg: klartext, aad })
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))
}

/// Entschluesselt Ciphertext || Tag
pub fn entschluesseln(
    key_set: &KeySet,
    iv: &[u8; IV_LAENGE],
    aad: &[u8],
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() < TAG_LAENGE {
        return Err(CryptoError::Entschluesselung(
            "Ciphertext kuerzer als Auth-Tag".to_string(),
        ));
    }
    key_set
        .encryption_key
        .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Entschluesselung("Authentifizierung fehlgeschlagen".to_string()))
}

/// Verschluesselt `puffer` an Ort und Stelle und gibt den Tag zurueck
pub fn verschluesseln_abgetrennt(
    key_set: &KeySet,
    iv: &[u8; IV_LAENGE],
    aad: &[u8],
    puffer: &mut [u8],
) -> CryptoResult<[u8; TAG_LAENGE]> {
    let tag = key_set
        .encryption_key
        .encrypt_in_place_detached(Nonce::from_slice(iv), aad, puffer)
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;
    let mut out = [0u8; TAG_LAENGE];
    out.copy_from_slice(tag.as_slice());
    Ok(out)
}

/// Entschluesselt `puffer` an Ort und Stelle gegen einen abgetrennten Tag
///
/// Bei Fehlschlag bleibt `puffer` unveraendert.
pub fn entschluesseln_abgetrennt(
    key_set: &KeySet,
    iv: &[u8; IV_LAENGE],
    aad: &[u8],
    puffer: &mut [u8],
    tag: &[u8; TAG_LAENGE],
) -> CryptoResult<()> {
    key_set
        .encryption_key
        .decrypt_in_place_detached(Nonce::from_slice(iv), aad, puffer, Tag::from_slice(tag))
        .map_err(|_| CryptoError::Entschluesselung("Authentifizierung fehlgeschlagen".to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
