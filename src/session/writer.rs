//! Serialized outbound frame writer.
//!
//! Protocol replies and host commands share one sink behind a mutex, so a
//! frame is always written whole before the next one starts.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Sink, SinkExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::core::frame::Frame;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::Metrics;

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ProtocolError> + Send>>;

pub struct FrameWriter {
    sink: Mutex<Option<FrameSink>>,
    metrics: Arc<Metrics>,
}

impl FrameWriter {
    pub fn new(sink: FrameSink, metrics: Arc<Metrics>) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
            metrics,
        }
    }

    pub async fn send(&self, frame: Frame) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| ProtocolError::CommunicationError(constants::ERR_WRITER_RELEASED.into()))?;

        let size = frame.encoded_len();
        let call_type = frame.call_type;
        sink.send(frame).await?;
        self.metrics.message_sent(size);
        trace!(call_type, size, "Frame written");
        Ok(())
    }

    /// Flush and drop the sink. Later sends fail.
    pub async fn release(&self) {
        let taken = self.sink.lock().await.take();
        if let Some(mut sink) = taken {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Error closing writer");
            }
        }
    }

    pub async fn is_released(&self) -> bool {
        self.sink.lock().await.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::FrameCodec;
    use futures::StreamExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[tokio::test]
    async fn concurrent_sends_do_not_interleave() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let sink: FrameSink = Box::pin(FramedWrite::new(server, FrameCodec::default()));
        let writer = Arc::new(FrameWriter::new(sink, Arc::new(Metrics::new())));

        let mut tasks = Vec::new();
        for i in 0..16u32 {
            let w = writer.clone();
            tasks.push(tokio::spawn(async move {
                w.send(Frame::new(23, i, 40, vec![i as u8; 200])).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        writer.release().await;

        let frames: Vec<_> = FramedRead::new(client, FrameCodec::default())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(frames.len(), 16);
        for f in frames {
            let f = f.unwrap();
            assert!(f.payload.iter().all(|b| *b == f.rr_id as u8));
        }
    }

    #[tokio::test]
    async fn send_after_release_fails() {
        let (_client, server) = tokio::io::duplex(1024);
        let sink: FrameSink = Box::pin(FramedWrite::new(server, FrameCodec::default()));
        let writer = FrameWriter::new(sink, Arc::new(Metrics::new()));
        writer.release().await;
        assert!(writer.is_released().await);
        assert!(writer.send(Frame::new(23, 1, 40, vec![])).await.is_err());
    }
}
