//! Wire framing for the SOCKS5 handshake (RFC 1928) and the username/password
//! sub-negotiation (RFC 1929). All multi-byte integers are big-endian; all
//! lengths are single unsigned bytes unless noted.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::ProtocolError;

// Socks Allowable Methods
pub const NO_AUTHENTICATION_REQUIRED: u8 = 0x00;
pub const GSSAPI: u8 = 0x01;
pub const USERNAME_AND_PASSWORD: u8 = 0x02;
pub const NO_ACCEPTABLE_METHODS: u8 = 0xff;

// COMMANDs
pub const CONNECT: u8 = 0x01;
pub const BIND: u8 = 0x02;
pub const UDP_ASSOCIATE: u8 = 0x03;

// ADDR TYPEs
pub const DST_IPV4: u8 = 0x01;
pub const DST_DOMAIN: u8 = 0x03;
pub const DST_IPV6: u8 = 0x04;

// RESPONSE CODEs
pub const SUCCEEDED: u8 = 0x00;
pub const GENERAL_SOCKS_SERVER_FAILURE: u8 = 0x01;
pub const CONNECTION_NOT_ALLOWED_BY_RULESET: u8 = 0x02;
pub const NETWORK_UNREACHABLE: u8 = 0x03;
pub const HOST_UNREACHABLE: u8 = 0x04;
pub const CONNECTION_REFUSED: u8 = 0x05;
pub const TTL_EXPIRED: u8 = 0x06;
pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

pub const SOCKS_VERSION: u8 = 0x05;
pub const AUTH_VERSION: u8 = 0x01;
pub const AUTH_SUCCEED: u8 = 0x00;
pub const AUTH_FAILED: u8 = 0x01;

/// The destination or bind address carried by a `Command`/`Reply` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DstAddr {
    IPv4([u8; 4]),
    IPv6([u8; 16]),
    Domain(String),
}

impl DstAddr {
    pub fn atyp(&self) -> u8 {
        match self {
            DstAddr::IPv4(_) => DST_IPV4,
            DstAddr::IPv6(_) => DST_IPV6,
            DstAddr::Domain(_) => DST_DOMAIN,
        }
    }

    /// The unspecified IPv4 bind address used on every error reply (`0.0.0.0:0`).
    pub fn unspecified() -> DstAddr {
        DstAddr::IPv4([0, 0, 0, 0])
    }
}

impl std::fmt::Display for DstAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DstAddr::IPv4(b) => write!(f, "{}.{}.{}.{}", b[0], b[1], b[2], b[3]),
            DstAddr::IPv6(b) => write!(f, "{}", std::net::Ipv6Addr::from(*b)),
            DstAddr::Domain(d) => write!(f, "{d}"),
        }
    }
}

/// `05 01 02` — ver, nmethods, methods[nmethods].
pub async fn read_greeting<R>(r: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let ver = r.read_u8().await?;
    if ver != SOCKS_VERSION {
        return Err(ProtocolError::UnsupportedVersion(ver));
    }
    let nmethods = r.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    r.read_exact(&mut methods).await?;
    Ok(methods)
}

/// Picks `0x02` (username/password) if offered, else `0xFF` (no acceptable methods).
/// The server never offers `0x00` (no-auth).
pub fn select_method(methods: &[u8]) -> u8 {
    if methods.contains(&USERNAME_AND_PASSWORD) {
        USERNAME_AND_PASSWORD
    } else {
        NO_ACCEPTABLE_METHODS
    }
}

/// `05 selected_method`.
pub async fn write_method_selection<W>(w: &mut W, selected: u8) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&[SOCKS_VERSION, selected]).await
}

/// `01 ulen uname[ulen] plen passwd[plen]`. The password is opaque on the
/// wire (RFC 1929 gives no charset) and is returned as raw bytes so it can
/// be hashed byte-for-byte; only the username is treated as text, since it
/// doubles as the `UserStore`/`QuotaTable` lookup key.
pub async fn read_auth_request<R>(r: &mut R) -> Result<(String, Vec<u8>), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let ver = r.read_u8().await?;
    if ver != AUTH_VERSION {
        return Err(ProtocolError::UnsupportedAuthVersion(ver));
    }
    let ulen = r.read_u8().await?;
    let mut uname = vec![0u8; ulen as usize];
    r.read_exact(&mut uname).await?;
    let plen = r.read_u8().await?;
    let mut passwd = vec![0u8; plen as usize];
    r.read_exact(&mut passwd).await?;
    Ok((String::from_utf8_lossy(&uname).into_owned(), passwd))
}

/// `01 status` — `0x00` success, any non-zero failure.
pub async fn write_auth_reply<W>(w: &mut W, status: u8) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&[AUTH_VERSION, status]).await
}

/// `05 cmd 00 atyp dst.addr dst.port`.
pub async fn read_request<R>(r: &mut R) -> Result<(u8, DstAddr, u16), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    r.read_exact(&mut head).await?;
    let [ver, cmd, _rsv, atyp] = head;
    if ver != SOCKS_VERSION {
        return Err(ProtocolError::UnsupportedVersion(ver));
    }
    let addr = match atyp {
        DST_IPV4 => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b).await?;
            DstAddr::IPv4(b)
        }
        DST_IPV6 => {
            let mut b = [0u8; 16];
            r.read_exact(&mut b).await?;
            DstAddr::IPv6(b)
        }
        DST_DOMAIN => {
            let len = r.read_u8().await?;
            let mut b = vec![0u8; len as usize];
            r.read_exact(&mut b).await?;
            let domain = String::from_utf8(b).map_err(|_| ProtocolError::InvalidDomainName)?;
            DstAddr::Domain(domain)
        }
        other => return Err(ProtocolError::AddressTypeNotSupported(other)),
    };
    let port = r.read_u16().await?;
    Ok((cmd, addr, port))
}

/// `05 rep 00 atyp bnd.addr bnd.port`.
pub async fn write_reply<W>(w: &mut W, rep: u8, bnd: &DstAddr, port: u16) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(22);
    buf.put_u8(SOCKS_VERSION);
    buf.put_u8(rep);
    buf.put_u8(0x00);
    buf.put_u8(bnd.atyp());
    match bnd {
        DstAddr::IPv4(b) => buf.put_slice(b),
        DstAddr::IPv6(b) => buf.put_slice(b),
        DstAddr::Domain(d) => {
            buf.put_u8(d.len() as u8);
            buf.put_slice(d.as_bytes());
        }
    }
    buf.put_u16(port);
    w.write_all(&buf).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn greeting_round_trips_methods() {
        let mut buf = Cursor::new(vec![0x05, 0x02, 0x00, 0x02]);
        let methods = read_greeting(&mut buf).await.unwrap();
        assert_eq!(methods, vec![0x00, 0x02]);
        assert_eq!(select_method(&methods), USERNAME_AND_PASSWORD);
    }

    #[tokio::test]
    async fn greeting_rejects_bad_version() {
        let mut buf = Cursor::new(vec![0x04, 0x01, 0x00]);
        let err = read_greeting(&mut buf).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(0x04)));
    }

    #[tokio::test]
    async fn auth_request_decodes_username_password() {
        let mut frame = vec![0x01, 0x04];
        frame.extend_from_slice(b"user");
        frame.push(0x08);
        frame.extend_from_slice(b"password");
        let mut buf = Cursor::new(frame);
        let (user, pass) = read_auth_request(&mut buf).await.unwrap();
        assert_eq!(user, "user");
        assert_eq!(pass, b"password");
    }

    #[tokio::test]
    async fn auth_request_preserves_non_utf8_password_bytes() {
        let mut frame = vec![0x01, 0x04];
        frame.extend_from_slice(b"user");
        let passwd = vec![0xff, 0x00, 0xfe, 0x80];
        frame.push(passwd.len() as u8);
        frame.extend_from_slice(&passwd);
        let mut buf = Cursor::new(frame);
        let (_, pass) = read_auth_request(&mut buf).await.unwrap();
        assert_eq!(pass, passwd);
    }

    #[tokio::test]
    async fn request_rejects_non_utf8_domain() {
        let mut frame = vec![0x05, 0x01, 0x00, 0x03, 2, 0xff, 0xfe];
        frame.extend_from_slice(&0x0050u16.to_be_bytes());
        let mut buf = Cursor::new(frame);
        let err = read_request(&mut buf).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidDomainName));
    }

    #[tokio::test]
    async fn request_decodes_ipv4_connect() {
        let mut frame = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        frame.extend_from_slice(&0x0050u16.to_be_bytes());
        let mut buf = Cursor::new(frame);
        let (cmd, addr, port) = read_request(&mut buf).await.unwrap();
        assert_eq!(cmd, CONNECT);
        assert_eq!(addr, DstAddr::IPv4([127, 0, 0, 1]));
        assert_eq!(port, 0x0050);
    }

    #[tokio::test]
    async fn request_decodes_domain() {
        let mut frame = vec![0x05, 0x01, 0x00, 0x03, 9];
        frame.extend_from_slice(b"localhost");
        frame.extend_from_slice(&0x0050u16.to_be_bytes());
        let mut buf = Cursor::new(frame);
        let (_, addr, _) = read_request(&mut buf).await.unwrap();
        assert_eq!(addr, DstAddr::Domain("localhost".to_string()));
    }

    #[tokio::test]
    async fn request_rejects_unknown_atyp() {
        let mut buf = Cursor::new(vec![0x05, 0x01, 0x00, 0x7f]);
        let err = read_request(&mut buf).await.unwrap_err();
        assert!(matches!(err, ProtocolError::AddressTypeNotSupported(0x7f)));
    }

    #[tokio::test]
    async fn reply_is_well_formed_on_error() {
        let mut out = Vec::new();
        write_reply(&mut out, CONNECTION_REFUSED, &DstAddr::unspecified(), 0)
            .await
            .unwrap();
        assert_eq!(
            out,
            vec![0x05, CONNECTION_REFUSED, 0x00, DST_IPV4, 0, 0, 0, 0, 0, 0]
        );
    }
}
