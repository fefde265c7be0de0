//! One prompt → output exchange against the loaded engine.

use offline_types::{GenerationOutput, GenerationRequest, OfflineError};
use offline_worker::WorkerBridge;
use tokio_util::sync::CancellationToken;

/// Chunk sink for a session.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Streaming generation with cooperative cancellation.
///
/// The returned text is always the in-order concatenation of the chunks
/// passed to `on_chunk`. Cancellation is not an error: the session resolves
/// with `cancelled: true` and whatever was delivered before the token fired.
pub struct GenerationSession;

impl GenerationSession {
    pub async fn run(
        bridge: &WorkerBridge,
        request: &GenerationRequest,
        on_chunk: ChunkSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, OfflineError> {
        if cancel.is_cancelled() {
            return Ok(GenerationOutput::cancelled(""));
        }

        let mut stream = bridge.start_generation(request).await?;
        let mut delivered = String::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("[SESSION] Cancelling generation {}", stream.id);
                    bridge.abort(stream.id);
                    // Wait for the worker to settle so the engine is Ready again.
                    while stream.chunks.recv().await.is_some() {}
                    return match stream.outcome().await {
                        Ok(_) | Err(OfflineError::GenerationFailure(_)) => {
                            Ok(GenerationOutput::cancelled(delivered))
                        }
                        Err(e) => Err(e),
                    };
                }
                chunk = stream.chunks.recv() => match chunk {
                    Some(text) => {
                        on_chunk(&text);
                        delivered.push_str(&text);
                    }
                    None => break,
                }
            }
        }

        let output = stream.outcome().await?;
        Ok(GenerationOutput {
            text: delivered,
            cancelled: output.cancelled,
        })
    }
}
