//! The outbound bus: drains the emitter's channel into JSON lines.

use hostmeter_types::CanonicalEvent;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Writes each received event as one JSON line until every sender is gone.
///
/// # Errors
///
/// Returns the first write error; events still queued are not written.
pub async fn run_event_sink<W>(
    mut rx: mpsc::Receiver<CanonicalEvent>,
    mut writer: W,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(event) = rx.recv().await {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        written += 1;
        tracing::debug!(
            event_id = %event.event_id,
            org_id = %event.org_id,
            event_type = event.event_type.as_str(),
            "published canonical event"
        );
    }
    tracing::info!(written, "event sink closed");
    Ok(written)
}
