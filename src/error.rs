use thiserror::Error;

/// Failures the frame pipeline recovers from by pausing.
///
/// Cancellation is not an error and has no variant here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The output surface could not hand out a draw target
    #[error("output surface unavailable")]
    SurfaceUnavailable,

    /// The pipeline was asked to start before any viewport was known
    #[error("no viewport dimensions available")]
    NoViewport,

    /// A pixel buffer could not be allocated
    #[error("failed to allocate {bytes} byte pixel buffer")]
    AllocationFailed { bytes: usize },

    /// The generation thread panicked
    #[error("generation thread panicked")]
    GenerationPanicked,

    /// The generation thread could not be spawned
    #[error("failed to spawn generation thread: {0}")]
    Spawn(#[from] std::io::Error),
}
