//! Schluesselring pro Teilnehmer
//!
//! 16 Slots, adressiert ueber `key_index % 16`. Jeder Slot haelt einen
//! unveraenderlichen `Arc<KeySet>`; Ersetzen passiert immer als ganzer Slot.
//!
//! ## Ratchet
//! Gleichzeitige Ratchets desselben Slots von derselben Quelle teilen sich
//! eine Berechnung. Der Eintrag wird nach Abschluss entfernt, ein spaeterer
//! Aufruf ratchet erneut.
//!
//! ## Fehlertoleranz
//! ```text
//! failure_tolerance < 0       nie invalidieren
//! failure_count > tolerance   has_valid_key = false
//! Erfolg / neuer Schluessel   Zaehler 0, has_valid_key = true
//! neuer oder geleerter Ring   has_valid_key = true
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use funkstille_core::types::ParticipantIdentity;
use funkstille_protocol::control::{KeyProviderOptions, WorkerEvent};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::e2e::derive::{self, RatchetErgebnis};
use crate::e2e::events::EventSender;
use crate::error::{CryptoError, CryptoResult};
use crate::types::{KeySet, SecretBytes, KEYRING_GROESSE};

#[derive(Debug)]
struct KeyRing {
    slots: [Option<Arc<KeySet>>; KEYRING_GROESSE],
    current_key_index: u8,
    decryption_failure_count: u32,
    has_valid_key: bool,
}

// Ein leerer Ring gilt als gueltig: fehlende Slots melden `MissingKey`
impl Default for KeyRing {
    fn default() -> Self {
        Self {
            slots: Default::default(),
            current_key_index: 0,
            decryption_failure_count: 0,
            has_valid_key: true,
        }
    }
}

#[derive(Debug)]
struct LaufenderRatchet {
    quelle: Arc<KeySet>,
    zelle: Arc<OnceCell<RatchetErgebnis>>,
}

fn slot(key_index: u8) -> usize {
    usize::from(key_index) % KEYRING_GROESSE
}

/// Schluesselverwaltung eines Teilnehmers (oder des gemeinsamen Schluessels)
#[derive(Debug)]
pub struct ParticipantKeyHandler {
    participant: Option<ParticipantIdentity>,
    salt: Arc<[u8]>,
    failure_tolerance: i32,
    ring: Mutex<KeyRing>,
    laufende_ratchets: Mutex<HashMap<u8, LaufenderRatchet>>,
    events: EventSender,
}

impl ParticipantKeyHandler {
    pub fn new(
        participant: Option<ParticipantIdentity>,
        options: &KeyProviderOptions,
        events: EventSender,
    ) -> Self {
        Self {
            participant,
            salt: Arc::from(options.ratchet_salt.as_bytes()),
            failure_tolerance: options.failure_tolerance,
            ring: Mutex::new(KeyRing::default()),
            laufende_ratchets: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Teilnehmer, fuer den dieser Ring gilt (`None` beim gemeinsamen Schluessel)
    pub fn participant(&self) -> Option<&ParticipantIdentity> {
        self.participant.as_ref()
    }

    /// Leitet aus Rohmaterial einen Schluesselsatz ab und installiert ihn
    ///
    /// Setzt den aktuellen Index und den Fehlerzustand zurueck.
    pub async fn set_key(&self, material: &[u8], key_index: u8) -> CryptoResult<()> {
        let key_set =
            derive::key_set_ableiten_async(SecretBytes::from(material), Arc::clone(&self.salt))
                .await?;
        self.set_key_set(Arc::new(key_set), key_index);
        tracing::debug!(
            participant = ?self.participant,
            key_index,
            "Schluessel gesetzt"
        );
        Ok(())
    }

    /// Installiert einen fertigen Schluesselsatz
    pub fn set_key_set(&self, key_set: Arc<KeySet>, key_index: u8) {
        let mut ring = self.ring.lock();
        ring.slots[slot(key_index)] = Some(key_set);
        ring.current_key_index = key_index % KEYRING_GROESSE as u8;
        ring.decryption_failure_count = 0;
        ring.has_valid_key = true;
    }

    /// Schluesselsatz fuer `key_index` (ohne Index: aktueller Index)
    pub fn get_key_set(&self, key_index: Option<u8>) -> Option<Arc<KeySet>> {
        let ring = self.ring.lock();
        let index = key_index.unwrap_or(ring.current_key_index);
        ring.slots[slot(index)].clone()
    }

    pub fn current_key_index(&self) -> u8 {
        self.ring.lock().current_key_index
    }

    pub fn set_current_key_index(&self, key_index: u8) {
        self.ring.lock().current_key_index = key_index % KEYRING_GROESSE as u8;
    }

    pub fn has_valid_key(&self) -> bool {
        self.ring.lock().has_valid_key
    }

    pub fn decryption_failure_count(&self) -> u32 {
        self.ring.lock().decryption_failure_count
    }

    /// Zaehlt einen endgueltig fehlgeschlagenen Frame
    pub fn decryption_failure(&self) {
        if self.failure_tolerance < 0 {
            return;
        }
        let mut ring = self.ring.lock();
        ring.decryption_failure_count = ring.decryption_failure_count.saturating_add(1);
        if i64::from(ring.decryption_failure_count) > i64::from(self.failure_tolerance)
            && ring.has_valid_key
        {
            ring.has_valid_key = false;
            tracing::warn!(
                participant = ?self.participant,
                fehler = ring.decryption_failure_count,
                "Fehlertoleranz ueberschritten, Schluessel als ungueltig markiert"
            );
        }
    }

    /// Erfolgreiche Entschluesselung setzt den Fehlerzustand zurueck
    pub fn decryption_success(&self) {
        self.reset_key_status();
    }

    pub fn reset_key_status(&self) {
        let mut ring = self.ring.lock();
        ring.decryption_failure_count = 0;
        ring.has_valid_key = true;
    }

    /// Verwirft alle Schluessel
    pub fn reset(&self) {
        *self.ring.lock() = KeyRing::default();
        self.laufende_ratchets.lock().clear();
    }

    /// Ratchet des Slots `key_index` (ohne Index: aktueller Index)
    ///
    /// Mit `anwenden` wird das Ergebnis installiert, sofern der Slot noch
    /// die Quelle enthaelt, und ein `ratchetKey`-Ereignis gemeldet.
    pub async fn ratchet_key(
        &self,
        key_index: Option<u8>,
        anwenden: bool,
    ) -> CryptoResult<RatchetErgebnis> {
        let key_index = key_index.unwrap_or_else(|| self.current_key_index()) % KEYRING_GROESSE as u8;
        let quelle = self
            .get_key_set(Some(key_index))
            .ok_or_else(|| CryptoError::FehlenderSchluessel {
                participant: self.participant.clone(),
                key_index,
            })?;

        let ergebnis = self.ratchet_von(key_index, quelle).await?;
        if anwenden {
            let quelle = Arc::clone(&ergebnis.quelle);
            self.ratchet_uebernehmen(key_index, &quelle, &ergebnis);
        }
        Ok(ergebnis)
    }

    /// Ratchet von einer bestimmten Quelle, gleichzeitige Aufrufe teilen sich
    /// die Berechnung
    pub async fn ratchet_von(
        &self,
        key_index: u8,
        quelle: Arc<KeySet>,
    ) -> CryptoResult<RatchetErgebnis> {
        let key_index = key_index % KEYRING_GROESSE as u8;
        let zelle = {
            let mut laufend = self.laufende_ratchets.lock();
            let geteilt = laufend
                .get(&key_index)
                .filter(|l| Arc::ptr_eq(&l.quelle, &quelle))
                .map(|l| Arc::clone(&l.zelle));
            match geteilt {
                Some(zelle) => zelle,
                None => {
                    let zelle = Arc::new(OnceCell::new());
                    laufend.insert(
                        key_index,
                        LaufenderRatchet {
                            quelle: Arc::clone(&quelle),
                            zelle: Arc::clone(&zelle),
                        },
                    );
                    zelle
                }
            }
        };

        let salt = Arc::clone(&self.salt);
        let ergebnis = zelle
            .get_or_try_init(|| derive::ratchet_async(quelle, salt))
            .await
            .cloned();

        let mut laufend = self.laufende_ratchets.lock();
        if laufend
            .get(&key_index)
            .is_some_and(|l| Arc::ptr_eq(&l.zelle, &zelle))
        {
            laufend.remove(&key_index);
        }
        ergebnis
    }

    /// Installiert ein Ratchet-Ergebnis per Compare-and-Set
    ///
    /// Schlaegt fehl (gibt `false` zurueck), wenn der Slot inzwischen nicht
    /// mehr `erwartet` enthaelt. Bei Erfolg: aktueller Index = `key_index`,
    /// Fehlerzustand zurueckgesetzt, `ratchetKey` gemeldet.
    pub fn ratchet_uebernehmen(
        &self,
        key_index: u8,
        erwartet: &Arc<KeySet>,
        ergebnis: &RatchetErgebnis,
    ) -> bool {
        {
            let mut ring = self.ring.lock();
            let eintrag = &mut ring.slots[slot(key_index)];
            if !eintrag.as_ref().is_some_and(|aktuell| Arc::ptr_eq(aktuell, erwartet)) {
                tracing::debug!(
                    participant = ?self.participant,
                    key_index,
                    "Slot wurde zwischenzeitlich ersetzt, Ratchet verworfen"
                );
                return false;
            }
            *eintrag = Some(Arc::clone(&ergebnis.key_set));
            ring.current_key_index = key_index % KEYRING_GROESSE as u8;
            ring.decryption_failure_count = 0;
            ring.has_valid_key = true;
        }

        tracing::info!(participant = ?self.participant, key_index, "Schluessel geratchet");
        self.events.senden(WorkerEvent::RatchetKey {
            participant_identity: self.participant.clone(),
            key_index,
            material: ergebnis.material.as_bytes().to_vec(),
        });
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
