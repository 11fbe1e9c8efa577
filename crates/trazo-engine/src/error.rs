use thiserror::Error;

/// Failures of a single logical generation call, after rotation has run
/// its course. All variants are fatal for the call that produced them.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no API credentials configured")]
    NoCredentials,
    #[error("all credentials rate limited after {attempts} attempts")]
    AllCredentialsExhausted { attempts: usize },
    #[error("upstream service error (status {status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Local rasterization failure; never involves the network.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("invalid vector markup: {0}")]
    InvalidMarkup(String),
    #[error("pixel buffer allocation failed for {width}x{height}")]
    Allocation { width: u32, height: u32 },
    #[error("raster encoding failed: {0}")]
    Encoding(String),
}

/// A pipeline stage failure. The first failing stage's error propagates
/// unchanged; stages never aggregate or retry each other's failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("stage {stage} produced no vector markup")]
    MissingVector { stage: &'static str },
    #[error("invalid scene description: {0}")]
    InvalidScene(String),
}

impl PipelineError {
    /// User-facing gallery label for a failed item.
    pub fn gallery_label(&self) -> String {
        match self {
            Self::Api(ApiError::NoCredentials) => "no API credentials".to_string(),
            Self::Api(ApiError::AllCredentialsExhausted { .. }) => {
                "all credentials rate limited".to_string()
            }
            Self::Api(ApiError::Upstream { status, .. }) => {
                format!("service error ({status})")
            }
            Self::Api(ApiError::Transport(_)) => "connection failed".to_string(),
            Self::Api(ApiError::MalformedResponse(_)) => "unusable reply".to_string(),
            Self::Raster(_) => "preview render failed".to_string(),
            Self::MissingVector { .. } => "no drawing produced".to_string(),
            Self::InvalidScene(_) => "unusable scene".to_string(),
        }
    }
}
