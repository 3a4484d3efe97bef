use thiserror::Error;

/// Failures building the client itself. Request-level failures are reported
/// through the `shipgate_core::error` taxonomy instead.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid api base '{0}': expected an http(s) URL")]
    InvalidBase(String),

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}
