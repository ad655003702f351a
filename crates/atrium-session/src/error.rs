/// Errors from identity resolution and equipment persistence.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The presented token was rejected outright. Distinct from "no
    /// token": callers treat that case as a guest without calling the
    /// authenticator at all.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The equipment store could not be reached.
    #[error("equipment store unavailable: {0}")]
    StoreUnavailable(String),
}
