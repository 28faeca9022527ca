//! Error types for SQLGate backend operations.

use std::fmt;

/// The primary error type for SQLGate backend operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, socket closure)
    Connection(ConnectionError),
    /// Protocol errors (malformed or out-of-grammar packet sequences)
    Protocol(ProtocolError),
    /// Caller errors detected before any socket I/O
    Request(RequestError),
    /// The backend returned an ERR packet
    Server(ServerError),
    /// I/O errors
    Io(std::io::Error),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during an exchange
    Disconnected,
    /// Connection refused
    Refused,
    /// Socket reported closure while an exchange was active
    Closed,
}

/// A malformed or out-of-grammar packet sequence.
///
/// The resolver makes no attempt at recovery; a protocol violation
/// aborts the whole exchange.
#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    /// First bytes of the offending payload, when available
    pub raw_data: Option<Vec<u8>>,
}

/// A caller error, checked synchronously before any socket I/O.
#[derive(Debug)]
pub struct RequestError {
    pub kind: RequestErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    /// Request payload exceeds the chunk or protocol packet limit
    Oversized,
    /// An exchange is already in flight on this connection
    ExchangeInFlight,
}

/// An ERR packet returned by the backend server.
///
/// Surfaced as a failed-but-well-formed completion; the message is the
/// server's own error text.
#[derive(Debug, Clone)]
pub struct ServerError {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

impl Error {
    /// Create a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            raw_data: None,
        })
    }

    /// Create an oversized-request error.
    pub fn oversized(message: impl Into<String>) -> Self {
        Error::Request(RequestError {
            kind: RequestErrorKind::Oversized,
            message: message.into(),
        })
    }

    /// Create an exchange-in-flight error.
    pub fn exchange_in_flight(message: impl Into<String>) -> Self {
        Error::Request(RequestError {
            kind: RequestErrorKind::ExchangeInFlight,
            message: message.into(),
        })
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Protocol(_) | Error::Io(_))
    }

    /// Is this a caller error caught before any socket I/O?
    pub fn is_request_error(&self) -> bool {
        matches!(self, Error::Request(_))
    }

    /// The backend's error code, if the backend returned an ERR packet.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Server(e) => Some(e.code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Request(e) => write!(f, "Request error: {}", e.message),
            Error::Server(e) => {
                if e.sql_state.is_empty() {
                    write!(f, "Server error {}: {}", e.code, e.message)
                } else {
                    write!(f, "Server error {} ({}): {}", e.code, e.sql_state, e.message)
                }
            }
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        Error::Request(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

/// Result type alias for SQLGate backend operations.
pub type Result<T> = std::result::Result<T, Error>;
