use std::fmt::{Display, Formatter};

/// Transport-level failure kinds reported by fetch clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientErrorReason {
    Timeout,
    Network,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteConfigErrorCode {
    /// Fetch denied by the minimum fetch interval.
    Throttled,
    Client(ClientErrorReason),
    InvalidArgument,
    NotInitialized,
    Internal,
}

impl RemoteConfigErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteConfigErrorCode::Throttled => "remote-config/fetch-throttle",
            RemoteConfigErrorCode::Client(ClientErrorReason::Timeout) => {
                "remote-config/fetch-timeout"
            }
            RemoteConfigErrorCode::Client(ClientErrorReason::Network) => {
                "remote-config/fetch-client-network"
            }
            RemoteConfigErrorCode::InvalidArgument => "remote-config/invalid-argument",
            RemoteConfigErrorCode::NotInitialized => "remote-config/not-initialized",
            RemoteConfigErrorCode::Internal => "remote-config/internal",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteConfigError {
    pub code: RemoteConfigErrorCode,
    message: String,
}

impl RemoteConfigError {
    pub fn new(code: RemoteConfigErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_throttled(&self) -> bool {
        self.code == RemoteConfigErrorCode::Throttled
    }

    /// Returns the transport failure kind when this is a client error.
    pub fn client_reason(&self) -> Option<ClientErrorReason> {
        match self.code {
            RemoteConfigErrorCode::Client(reason) => Some(reason),
            _ => None,
        }
    }
}

impl Display for RemoteConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for RemoteConfigError {}

pub type RemoteConfigResult<T> = Result<T, RemoteConfigError>;

pub fn invalid_argument(message: impl Into<String>) -> RemoteConfigError {
    RemoteConfigError::new(RemoteConfigErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> RemoteConfigError {
    RemoteConfigError::new(RemoteConfigErrorCode::Internal, message)
}

pub fn throttled(message: impl Into<String>) -> RemoteConfigError {
    RemoteConfigError::new(RemoteConfigErrorCode::Throttled, message)
}

pub fn client_timeout(message: impl Into<String>) -> RemoteConfigError {
    RemoteConfigError::new(
        RemoteConfigErrorCode::Client(ClientErrorReason::Timeout),
        message,
    )
}

pub fn client_network(message: impl Into<String>) -> RemoteConfigError {
    RemoteConfigError::new(
        RemoteConfigErrorCode::Client(ClientErrorReason::Network),
        message,
    )
}

pub fn not_initialized(message: impl Into<String>) -> RemoteConfigError {
    RemoteConfigError::new(RemoteConfigErrorCode::NotInitialized, message)
}
