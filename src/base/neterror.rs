use std::io;
use thiserror::Error;

/// Every failure the engine reports, synchronously or through `on_error`.
///
/// Codes follow Chromium's `net_error_list.h` where an equivalent exists;
/// engine-specific conditions live in the -900 range.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Per-exchange failures, surfaced through `on_error`
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {message}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        message: String,
    },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Could not resolve {domain}: {message}")]
    NameNotResolvedFor { domain: String, message: String },
    #[error("Operation timed out")]
    TimedOut,
    #[error("Stream reset by peer")]
    StreamReset,
    #[error("Disallowed URL scheme")]
    DisallowedUrlScheme,
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Empty response")]
    EmptyResponse,

    // Caller misuse and lifecycle errors, returned synchronously
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },
    #[error("Configuration is frozen once the engine has started")]
    ConfigurationFrozen,
    #[error("Engine is not running")]
    EngineNotRunning,
    #[error("Engine failed to start: {message}")]
    EngineStartFailed { message: String },
    #[error("Engine cannot be terminated from its own thread")]
    TerminateOnEngineThread,
    #[error("read_data requires explicit flow control")]
    InvalidFlowControlMode,
    #[error("Stream already closed for writing")]
    StreamAlreadyClosed,
    #[error("Request headers have not been sent")]
    HeadersNotSent,
    #[error("Request headers were already sent")]
    HeadersAlreadySent,
    #[error("Missing required pseudo-header {name}")]
    MissingPseudoHeader { name: &'static str },
    #[error("Invalid header")]
    InvalidHeader,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::TimedOut => -7,
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved => -105,
            NetError::NameNotResolvedFor { .. } => -105,

            NetError::InvalidUrl => -300,
            NetError::DisallowedUrlScheme => -301,
            NetError::InvalidResponse => -320,
            NetError::EmptyResponse => -324,
            NetError::StreamReset => -376,

            NetError::Configuration { .. } => -900,
            NetError::ConfigurationFrozen => -901,
            NetError::EngineNotRunning => -902,
            NetError::EngineStartFailed { .. } => -903,
            NetError::TerminateOnEngineThread => -904,
            NetError::InvalidFlowControlMode => -905,
            NetError::StreamAlreadyClosed => -906,
            NetError::HeadersNotSent => -907,
            NetError::HeadersAlreadySent => -908,
            NetError::MissingPseudoHeader { .. } => -909,
            NetError::InvalidHeader => -910,
            NetError::Unknown(code) => *code,
        }
    }

    /// Whether this error describes a failed exchange rather than API misuse.
    pub fn is_transport_error(&self) -> bool {
        (-899..=-1).contains(&self.as_i32())
    }

    /// Build a connection error carrying the target host and port.
    pub fn connection_failed_to(host: &str, port: u16, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::TimedOut => NetError::TimedOut,
            _ => NetError::ConnectionFailedTo {
                host: host.to_string(),
                port,
                message: err.to_string(),
            },
        }
    }

    /// Build a resolution error for `domain`.
    pub fn dns_failed(domain: &str, err: io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            message: err.to_string(),
        }
    }

    /// Build a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        NetError::Configuration {
            reason: reason.into(),
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -7 => NetError::TimedOut,
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,

            -300 => NetError::InvalidUrl,
            -301 => NetError::DisallowedUrlScheme,
            -320 => NetError::InvalidResponse,
            -324 => NetError::EmptyResponse,
            -376 => NetError::StreamReset,

            -901 => NetError::ConfigurationFrozen,
            -902 => NetError::EngineNotRunning,
            -904 => NetError::TerminateOnEngineThread,
            -905 => NetError::InvalidFlowControlMode,
            -906 => NetError::StreamAlreadyClosed,
            -907 => NetError::HeadersNotSent,
            -908 => NetError::HeadersAlreadySent,
            -910 => NetError::InvalidHeader,
            _ => NetError::Unknown(code),
        }
    }
}
