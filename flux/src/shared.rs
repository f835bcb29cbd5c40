use std::io;
use std::net;

/// Result alias for fallible network operations that distinguish "try again" from "give up".
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Two-tier network error: `Wait` means the caller should retry later (e.g. the transport
/// would have blocked), anything else is `Fatal` and the connection should be torn down.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorKind),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Duplicate,
    AlreadyConnected,
    CapacityExceeded,
    PayloadTooLarge,
    EmptyPayload,
    UnknownMessageId,
    NotAuthenticated,
    Serialization,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorKind::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for NetworkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetworkError::Fatal(ErrorKind::AddrParse)
    }
}

/// Convenience trait for telling apart recoverable waits from conditions that demand a
/// disconnect, without matching on the variant at every call site.
pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        !matches!(self, Ok(_) | Err(NetworkError::Wait))
    }
}
