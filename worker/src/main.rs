//! Funkstille Worker – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging (stderr) und
//! verbindet die Bridge mit stdin/stdout.

use anyhow::Result;
use funkstille_observability::logging_initialisieren;
use funkstille_worker::config::WorkerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config_pfad = WorkerConfig::pfad_aus_umgebung();
    let config = WorkerConfig::laden(&config_pfad)?;

    // stdout gehoert der Bridge, Logs gehen nach stderr
    logging_initialisieren(&config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        shared_key = config.key_provider.shared_key,
        "Funkstille Worker wird initialisiert"
    );

    funkstille_worker::ausfuehren(config, tokio::io::stdin(), tokio::io::stdout()).await?;

    tracing::info!("Funkstille Worker beendet");
    Ok(())
}
