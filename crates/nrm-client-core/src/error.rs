#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no access token is available")]
    NoCredential,
    #[error("credential refresh is not supported by the host")]
    RefreshUnsupported,
    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
    #[error("development override is malformed: {0}")]
    MalformedOverride(String),
    #[error("development overrides are disabled outside development mode")]
    OverridesDisabled,
    #[error("request failed: {0}")]
    Request(String),
}
