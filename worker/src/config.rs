//! Worker-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, der Worker laeuft also auch ohne Konfigurationsdatei.

use funkstille_observability::{logging, LoggingConfig};
use funkstille_protocol::control::KeyProviderOptions;
use serde::{Deserialize, Serialize};

/// Umgebungsvariable fuer den Pfad der Konfigurationsdatei
pub const ENV_CONFIG: &str = "FUNKSTILLE_CONFIG";

/// Standardpfad, falls `FUNKSTILLE_CONFIG` nicht gesetzt ist
pub const STANDARD_CONFIG_PFAD: &str = "funkstille.toml";

/// Vollstaendige Worker-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Anfangsoptionen des Key Providers (bis zum ersten `init`)
    pub key_provider: KeyProviderOptions,
    /// Logging-Einstellungen
    pub logging: LoggingConfig,
    /// Warteschlangen der Bridge
    pub worker: WorkerEinstellungen,
}

/// Groessen der internen Kanaele
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerEinstellungen {
    /// Kapazitaet des Ereignis-Kanals
    pub event_queue_groesse: usize,
    /// Kapazitaet der Frame-Kanaele pro Track
    pub frame_queue_groesse: usize,
}

impl Default for WorkerEinstellungen {
    fn default() -> Self {
        Self {
            event_queue_groesse: 256,
            frame_queue_groesse: 64,
        }
    }
}

impl WorkerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.pruefen()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Pfad aus `FUNKSTILLE_CONFIG` oder der Standardpfad
    pub fn pfad_aus_umgebung() -> String {
        std::env::var(ENV_CONFIG).unwrap_or_else(|_| STANDARD_CONFIG_PFAD.into())
    }

    fn pruefen(&self) -> anyhow::Result<()> {
        if self.worker.event_queue_groesse == 0 || self.worker.frame_queue_groesse == 0 {
            anyhow::bail!("Warteschlangen-Groessen muessen groesser als 0 sein");
        }
        // Filter-Direktiven wie "funkstille_crypto=debug" durchlassen
        let level = &self.logging.level;
        if !logging::log_level_gueltig(level) && !level.contains('=') {
            anyhow::bail!("Unbekanntes Log-Level '{level}'");
        }
        if !logging::log_format_gueltig(&self.logging.format) {
            anyhow::bail!("Unbekanntes Log-Format '{}'", self.logging.format);
        }
        Ok(())
    }
}
