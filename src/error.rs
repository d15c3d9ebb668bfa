use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

/// Request rejected before a job is built.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("link is not a valid URL")]
    Malformed,
    #[error("link must be an https {domain} .m3u8 playlist")]
    Untrusted { domain: String },
    #[error("quality must be between 1 and 4, got {0}")]
    Quality(u8),
    #[error("delivery URL must be an http(s) URL")]
    DeliveryTarget,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDenied {
    #[error("you already have an active download, wait until it finishes")]
    AlreadyActive,
    #[error("you are temporarily blocked, try again later")]
    Blocked,
    #[error("you are on cooldown, try again later")]
    Cooldown,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Denied(#[from] AdmissionDenied),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("could not read artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("upload failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Unexpected fault while a worker handles a job.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}
