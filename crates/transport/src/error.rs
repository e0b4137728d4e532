/// Errors that end a transport's serve loop.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Failed to subscribe to {subject}: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("Identity registration failed: {0}")]
    Register(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Connection to the broker was lost: {0}")]
    Disconnected(String),

    #[error("Transport is already being served")]
    AlreadyServing,

    #[error("Dispatch engine has stopped")]
    EngineStopped,
}
