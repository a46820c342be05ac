use thiserror::Error;

/// Failure of a request against the remote contract.
///
/// Connection failures and call failures share this type; the underlying
/// reason is kept as the cause.
#[derive(Debug, Error)]
#[error("remote call `{operation}` failed: {cause:#}")]
pub struct RemoteCallError {
    operation: &'static str,
    #[source]
    cause: anyhow::Error,
}

impl RemoteCallError {
    pub fn new(operation: &'static str, cause: anyhow::Error) -> Self {
        Self { operation, cause }
    }

    /// Name of the operation that failed (`connect`, `store`, `load` or `remove`).
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// True when the request never reached the contract because the session was disposed.
    pub fn is_disposed(&self) -> bool {
        self.cause.downcast_ref::<SessionDisposed>().is_some()
    }
}

#[derive(Debug, Error)]
#[error("session disposed")]
pub struct SessionDisposed;

/// Raised while turning a raw contract event into a notification.
#[derive(Debug, Error)]
pub enum EventError {
    /// The contract emitted an event this client has no decoder for.
    #[error("unknown event `{tag}`")]
    UnknownEvent { tag: String },

    #[error("malformed `{tag}` event payload")]
    MalformedPayload {
        tag: String,
        #[source]
        source: anyhow::Error,
    },
}

impl EventError {
    pub fn tag(&self) -> &str {
        match self {
            EventError::UnknownEvent { tag } | EventError::MalformedPayload { tag, .. } => tag,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {name}")]
    Invalid { name: &'static str, value: String },
}
