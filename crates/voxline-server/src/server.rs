//! TCP ingress server.
//!
//! Accepts PBX connections, runs the Identify handshake with a bounded
//! deadline, rejects duplicates, and spawns one pipeline per call. On
//! shutdown it stops accepting, asks every pipeline to drain into an
//! operator transfer, and force-cancels whatever is left when the drain
//! window closes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use voxline_core::CallSession;
use voxline_protocol::{Frame, FrameReader, FrameWriter};

use crate::pipeline::{CallPipeline, PipelineConfig, PipelineDeps};
use crate::registry::CallRegistry;

/// Ingress server policy.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Deadline for the Identify frame on a fresh connection.
    pub identify_deadline: Duration,
    /// How long pipelines get to drain on shutdown before force-close.
    pub drain_deadline: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            identify_deadline: Duration::from_secs(5),
            drain_deadline: Duration::from_secs(30),
        }
    }
}

/// The ingress accept loop and its shutdown choreography.
pub struct CallServer {
    deps: PipelineDeps,
    pipeline_config: PipelineConfig,
    config: ServerConfig,
    registry: Arc<CallRegistry>,
}

impl CallServer {
    #[must_use]
    pub fn new(
        deps: PipelineDeps,
        pipeline_config: PipelineConfig,
        config: ServerConfig,
        registry: Arc<CallRegistry>,
    ) -> Self {
        Self {
            deps,
            pipeline_config,
            config,
            registry,
        }
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        let addr = listener.local_addr().ok();
        tracing::info!(addr = ?addr, "Call server listening");

        let drain = CancellationToken::new();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "Connection accepted");
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(handle_connection(
                            stream,
                            self.deps.clone(),
                            self.pipeline_config.clone(),
                            Arc::clone(&self.registry),
                            drain.clone(),
                            self.config.identify_deadline,
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                },
            }
        }

        drop(listener);
        self.drain_calls(&drain).await;
        tracing::info!("Call server stopped");
    }

    /// Signal every pipeline to hand its caller off, wait out the drain
    /// window, then force-cancel the rest.
    async fn drain_calls(&self, drain: &CancellationToken) {
        let live = self.registry.len();
        if live == 0 {
            return;
        }

        tracing::info!(live, drain_s = self.config.drain_deadline.as_secs(), "Draining live calls");
        drain.cancel();

        let deadline = Instant::now() + self.config.drain_deadline;
        while !self.registry.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        if !self.registry.is_empty() {
            tracing::warn!(remaining = self.registry.len(), "Drain deadline expired, force-closing");
            self.registry.cancel_all();
            // Give the cancelled pipelines a moment to release resources.
            while !self.registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// Run one connection: Identify handshake, duplicate check, pipeline.
pub(crate) async fn handle_connection<S>(
    stream: S,
    deps: PipelineDeps,
    pipeline_config: PipelineConfig,
    registry: Arc<CallRegistry>,
    drain: CancellationToken,
    identify_deadline: Duration,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);

    // Identify must be the first frame, within the deadline.
    let call_id = match tokio::time::timeout(identify_deadline, reader.read_frame()).await {
        Ok(Ok(Some(Frame::Identify(call_id)))) => call_id,
        Ok(Ok(other)) => {
            tracing::warn!(frame = ?other, "First frame was not Identify, closing");
            reject(&mut writer, "expected identify frame").await;
            return;
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Protocol error before Identify, closing");
            reject(&mut writer, "malformed identify frame").await;
            return;
        }
        Err(_) => {
            tracing::warn!("No Identify frame within the deadline, closing");
            reject(&mut writer, "identify timeout").await;
            return;
        }
    };

    let cancel = CancellationToken::new();
    if !registry.register(call_id, cancel.clone()) {
        tracing::warn!(call_id = %call_id, "Duplicate call id, rejecting connection");
        reject(&mut writer, "call id already active").await;
        return;
    }

    // Caller id resolution happens out-of-band before the PBX dials us in;
    // it is not part of the wire handshake.
    let session = CallSession::new(call_id, None);
    let (pipeline, _events) = CallPipeline::new(deps, pipeline_config, session, cancel, drain);

    let end = pipeline.run(reader, writer).await;
    tracing::info!(call_id = %call_id, end = ?end, "Call finished");
    registry.remove(call_id);
}

/// Best-effort Error frame before closing a rejected connection.
async fn reject<W: AsyncWrite + Unpin>(writer: &mut FrameWriter<W>, message: &str) {
    let _ = writer
        .write_frame(&Frame::Error(Some(message.to_string())))
        .await;
    writer.shutdown().await;
}
