use std::io;

/// Malformed framing from the client: bad version byte, unknown ATYP, short read.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("unsupported auth sub-negotiation version: {0:#04x}")]
    UnsupportedAuthVersion(u8),

    #[error("no acceptable authentication methods offered")]
    NoAcceptableMethods,

    #[error("address type not supported: {0:#04x}")]
    AddressTypeNotSupported(u8),

    #[error("domain name is not valid UTF-8")]
    InvalidDomainName,

    #[error("command not supported: {0:#04x}")]
    CommandNotSupported(u8),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Bad credentials or a protocol violation during RFC 1929 auth.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("concurrent-connection quota exceeded")]
    QuotaExceeded,

    #[error("user store error: {0}")]
    Store(#[from] UserStoreError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// `UserStore::lookup` failure.
#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("user not found")]
    NotFound,

    #[error("user store failed: {0}")]
    Storage(String),
}

/// `Resolver::resolve` failure.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("no addresses returned for {0:?}")]
    Empty(String),

    #[error("resolution failed for {domain:?}: {source}")]
    Failed { domain: String, source: io::Error },
}

/// Classified dial failure, mapped to a SOCKS5 reply code by `Session`.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("dial timed out")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("host unreachable: {0}")]
    HostUnreachable(io::Error),

    #[error("dial failed: {0}")]
    Other(io::Error),
}

impl DialError {
    /// Classify a raw connect error by its `ErrorKind`, per spec: timeout maps to TTL
    /// expired, refused/unreachable map to their own reply codes, anything else falls
    /// back to host-unreachable.
    pub fn classify(err: io::Error) -> DialError {
        match err.kind() {
            io::ErrorKind::TimedOut => DialError::Timeout,
            io::ErrorKind::ConnectionRefused => DialError::ConnectionRefused,
            io::ErrorKind::NetworkUnreachable => DialError::NetworkUnreachable,
            io::ErrorKind::HostUnreachable | io::ErrorKind::AddrNotAvailable => {
                DialError::HostUnreachable(err)
            }
            _ => DialError::Other(err),
        }
    }
}

/// Top-level error threaded through `Session::run`. Every variant corresponds to an
/// exit path that must still reach the `[Closed]` teardown handler.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error("relay error: {0}")]
    Relay(io::Error),
}
