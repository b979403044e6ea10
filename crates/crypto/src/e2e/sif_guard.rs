//! Begrenzung vom Server injizierter Frames (SIF)
//!
//! Der Server darf unverschluesselte Platzhalter-Frames einspielen, etwa
//! solange ein Teilnehmer stummgeschaltet ist. Damit das nicht zum
//! Klartext-Kanal wird, gilt pro Track:
//!
//! - hoechstens [`MAX_SIF_ANZAHL`] aufeinanderfolgende SIFs
//! - hoechstens [`MAX_SIF_DAUER`] seit dem ersten SIF der Folge
//!
//! Echte Frames beenden eine Folge, sobald mehr echte Frames als SIFs
//! gesehen wurden oder der letzte SIF laenger als [`MAX_SIF_DAUER`] her ist.

use std::time::{Duration, Instant};

pub const MAX_SIF_ANZAHL: u32 = 100;
pub const MAX_SIF_DAUER: Duration = Duration::from_millis(2000);

#[derive(Debug, Default)]
pub struct SifGuard {
    consecutive_sif_count: u32,
    sif_sequence_started_at: Option<Instant>,
    last_sif_received_at: Option<Instant>,
    user_frames_since_sif: u32,
}

impl SifGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sif(&mut self) {
        self.record_sif_at(Instant::now());
    }

    pub fn record_sif_at(&mut self, jetzt: Instant) {
        self.consecutive_sif_count = self.consecutive_sif_count.saturating_add(1);
        self.sif_sequence_started_at.get_or_insert(jetzt);
        self.last_sif_received_at = Some(jetzt);
    }

    pub fn record_user_frame(&mut self) {
        self.record_user_frame_at(Instant::now());
    }

    pub fn record_user_frame_at(&mut self, jetzt: Instant) {
        if self.sif_sequence_started_at.is_none() {
            return;
        }
        self.user_frames_since_sif = self.user_frames_since_sif.saturating_add(1);

        let sif_veraltet = self
            .last_sif_received_at
            .is_some_and(|zuletzt| jetzt.saturating_duration_since(zuletzt) > MAX_SIF_DAUER);
        if self.user_frames_since_sif > self.consecutive_sif_count || sif_veraltet {
            self.reset();
        }
    }

    pub fn is_sif_allowed(&self) -> bool {
        self.is_sif_allowed_at(Instant::now())
    }

    pub fn is_sif_allowed_at(&self, jetzt: Instant) -> bool {
        self.consecutive_sif_count < MAX_SIF_ANZAHL
            && self
                .sif_sequence_started_at
                .map_or(true, |start| jetzt.saturating_duration_since(start) < MAX_SIF_DAUER)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn consecutive_sif_count(&self) -> u32 {
        self.consecutive_sif_count
    }
}
