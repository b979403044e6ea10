//! funkstille-worker – Bibliotheks-Root
//!
//! Stellt die JSON-Lines-Bridge bereit, ueber die eine Host-Anwendung
//! die E2EE-Engine steuert und Frames durch sie schickt.

pub mod bridge;
pub mod config;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use bridge::Bridge;
use config::WorkerConfig;

/// Liest Eingabezeilen bis EOF und schreibt alle Ausgaben als JSON-Lines
///
/// Ungueltige Zeilen werden geloggt und uebersprungen. Nach EOF werden
/// alle Pipelines geleert, bevor die Funktion zurueckkehrt.
pub async fn ausfuehren<R, W>(config: WorkerConfig, eingabe: R, ausgabe: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (mut bridge, mut ausgabe_rx) = Bridge::new(&config);

    let schreiber = tokio::spawn(async move {
        let mut ausgabe = ausgabe;
        while let Some(nachricht) = ausgabe_rx.recv().await {
            let mut zeile = serde_json::to_string(&nachricht)?;
            zeile.push('\n');
            ausgabe.write_all(zeile.as_bytes()).await?;
            ausgabe.flush().await?;
        }
        Ok::<(), anyhow::Error>(())
    });

    let mut zeilen = BufReader::new(eingabe).lines();
    while let Some(zeile) = zeilen.next_line().await? {
        let zeile = zeile.trim();
        if zeile.is_empty() {
            continue;
        }
        if let Err(e) = bridge.verarbeiten(zeile).await {
            tracing::warn!(fehler = %e, "Eingabezeile verworfen");
        }
    }

    tracing::info!("Eingabe beendet, Pipelines werden geleert");
    bridge.beenden().await;
    schreiber.await??;
    Ok(())
}
