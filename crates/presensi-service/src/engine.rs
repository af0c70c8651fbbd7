//! Vision engine: the ONNX pipeline on a dedicated OS thread.
//!
//! The detector and embedding sessions are process-wide singletons, loaded
//! once at startup and owned by a single engine thread. Requests arrive over
//! an mpsc channel and are answered through oneshot replies, so each
//! locate/embed call runs to completion before the next starts — one
//! synchronous pipeline pass per request, no internal timeouts.

use image::{GrayImage, RgbImage};
use presensi_core::{Embedding, FacePipeline, PipelineError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum VisionError {
    /// Nothing usable in frame: localizer found no region, or the embedder's
    /// independent confidence gate rejected the crop.
    #[error("no face detected")]
    NoFace,
    #[error("pipeline: {0}")]
    Pipeline(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<PipelineError> for VisionError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NoFaceDetected => Self::NoFace,
            PipelineError::GateRejected { confidence } => {
                tracing::debug!(confidence, "embedding gate rejected face");
                Self::NoFace
            }
            other => Self::Pipeline(other.to_string()),
        }
    }
}

/// Face pipeline interface as seen by the orchestrator. Implemented by the
/// real engine handle and by test stubs.
pub trait Vision {
    /// Find and crop the dominant face in a decoded color image.
    fn locate(
        &self,
        image: RgbImage,
    ) -> impl std::future::Future<Output = Result<GrayImage, VisionError>> + Send;

    /// Extract the identity vector from a localized face crop.
    fn embed(
        &self,
        crop: GrayImage,
    ) -> impl std::future::Future<Output = Result<Embedding, VisionError>> + Send;
}

enum EngineRequest {
    Locate {
        image: RgbImage,
        reply: oneshot::Sender<Result<GrayImage, VisionError>>,
    },
    Embed {
        crop: GrayImage,
        reply: oneshot::Sender<Result<Embedding, VisionError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl Vision for EngineHandle {
    async fn locate(&self, image: RgbImage) -> Result<GrayImage, VisionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Locate {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| VisionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| VisionError::ChannelClosed)?
    }

    async fn embed(&self, crop: GrayImage) -> Result<Embedding, VisionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                crop,
                reply: reply_tx,
            })
            .await
            .map_err(|_| VisionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| VisionError::ChannelClosed)?
    }
}

/// Load both models and spawn the engine on a dedicated OS thread.
/// Fails fast at startup if either model file is unavailable.
pub fn spawn_engine(
    detector_path: &str,
    embedder_path: &str,
) -> Result<EngineHandle, VisionError> {
    let mut pipeline =
        FacePipeline::load(detector_path, embedder_path).map_err(VisionError::from)?;
    tracing::info!(detector_path, embedder_path, "face pipeline loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("presensi-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Locate { image, reply } => {
                        let result = pipeline.locate(&image).map_err(VisionError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Embed { crop, reply } => {
                        let result = pipeline.embed(&crop).map_err(VisionError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}
