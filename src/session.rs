//! Per-connection state machine: handshake -> auth -> request -> relay ->
//! teardown. Owns the client socket exclusively for its entire lifetime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::codec::{self, DstAddr};
use crate::errors::{AuthError, DialError, ProtocolError, SessionError};
use crate::quota::{Admission, QuotaTable};
use crate::relay::{self, Limiter};
use crate::resolver::Resolver;
use crate::user_store::UserStore;

/// Session phases, as named in the spec's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingGreeting,
    AwaitingAuth,
    AwaitingRequest,
    Relaying,
    Closed,
}

/// Shared, immutable configuration every session consults. Cloned cheaply
/// (an `Arc` clone) into each spawned session task.
pub struct SessionContext {
    pub user_store: Arc<dyn UserStore>,
    pub resolver: Arc<dyn Resolver>,
    pub quota: Arc<QuotaTable>,
    pub dial_timeout: Duration,
    pub rate_limit_bps: u64,
    pub burst_bytes: u64,
}

pub struct Session {
    ctx: Arc<SessionContext>,
    client_endpoint: SocketAddr,
    phase: Phase,
    authenticated_user: Option<String>,
    /// Set exactly once, at admission; guarantees `QuotaTable::release` is
    /// called exactly once from the `Closed` teardown handler.
    admitted: bool,
}

impl Session {
    pub fn new(ctx: Arc<SessionContext>, client_endpoint: SocketAddr) -> Self {
        Session {
            ctx,
            client_endpoint,
            phase: Phase::AwaitingGreeting,
            authenticated_user: None,
            admitted: false,
        }
    }

    /// Drives the session to completion. Every exit path — success or
    /// failure — flows through `teardown`, which releases the quota entry
    /// exactly once if it was admitted.
    pub async fn run(mut self, client: TcpStream) {
        let result = self.drive(client).await;
        if let Err(err) = &result {
            log::warn!("session {} ended: {err}", self.client_endpoint);
        }
        self.teardown();
    }

    async fn drive(&mut self, mut client: TcpStream) -> Result<(), SessionError> {
        self.phase = Phase::AwaitingGreeting;
        let methods = match codec::read_greeting(&mut client).await {
            Ok(methods) => methods,
            Err(err) => {
                self.phase = Phase::Closed;
                return Err(err.into());
            }
        };

        let selected = codec::select_method(&methods);
        codec::write_method_selection(&mut client, selected).await.map_err(ProtocolError::Io)?;
        if selected == codec::NO_ACCEPTABLE_METHODS {
            self.phase = Phase::Closed;
            return Err(ProtocolError::NoAcceptableMethods.into());
        }

        self.phase = Phase::AwaitingAuth;
        if let Err(err) = self.perform_auth(&mut client).await {
            self.phase = Phase::Closed;
            return Err(err.into());
        }
        self.phase = Phase::AwaitingRequest;

        let (cmd, addr, port) = match codec::read_request(&mut client).await {
            Ok(req) => req,
            Err(err) => {
                if matches!(err, ProtocolError::AddressTypeNotSupported(_)) {
                    let _ = codec::write_reply(&mut client, codec::ADDRESS_TYPE_NOT_SUPPORTED, &DstAddr::unspecified(), 0).await;
                }
                self.phase = Phase::Closed;
                return Err(err.into());
            }
        };

        if cmd != codec::CONNECT {
            let _ = codec::write_reply(&mut client, codec::COMMAND_NOT_SUPPORTED, &DstAddr::unspecified(), 0).await;
            self.phase = Phase::Closed;
            return Err(ProtocolError::CommandNotSupported(cmd).into());
        }

        let upstream = match self.dial(&mut client, &addr, port).await {
            Ok(stream) => stream,
            Err(err) => {
                self.phase = Phase::Closed;
                return Err(err);
            }
        };

        let local_addr = upstream.local_addr().map_err(SessionError::Relay)?;
        let bnd = socket_addr_to_dst(local_addr);
        codec::write_reply(&mut client, codec::SUCCEEDED, &bnd, local_addr.port())
            .await
            .map_err(ProtocolError::Io)?;

        self.phase = Phase::Relaying;
        let client_limiter = make_limiter_for(self);
        let upstream_limiter = make_limiter_for(self);
        relay::relay(client, upstream, client_limiter, upstream_limiter).await;
        self.phase = Phase::Closed;
        Ok(())
    }

    async fn perform_auth(&mut self, client: &mut TcpStream) -> Result<(), AuthError> {
        let (username, password) = codec::read_auth_request(client)
            .await
            .map_err(AuthError::Protocol)?;

        let record = match self.ctx.user_store.lookup(&username).await {
            Ok(record) => record,
            Err(store_err) => {
                let _ = codec::write_auth_reply(client, codec::AUTH_FAILED).await;
                return Err(AuthError::Store(store_err));
            }
        };

        if !record.verify(&password) {
            let _ = codec::write_auth_reply(client, codec::AUTH_FAILED).await;
            return Err(AuthError::InvalidCredentials);
        }

        match self.ctx.quota.try_admit(&username, record.max_concurrent) {
            Admission::Admitted => {
                self.admitted = true;
                self.authenticated_user = Some(username);
                codec::write_auth_reply(client, codec::AUTH_SUCCEED)
                    .await
                    .map_err(ProtocolError::Io)?;
                Ok(())
            }
            Admission::Rejected => {
                let _ = codec::write_auth_reply(client, codec::AUTH_FAILED).await;
                Err(AuthError::QuotaExceeded)
            }
        }
    }

    async fn dial(&self, client: &mut TcpStream, addr: &DstAddr, port: u16) -> Result<TcpStream, SessionError> {
        let target_ip = match addr {
            DstAddr::IPv4(b) => std::net::IpAddr::V4(std::net::Ipv4Addr::from(*b)),
            DstAddr::IPv6(b) => std::net::IpAddr::V6(std::net::Ipv6Addr::from(*b)),
            DstAddr::Domain(domain) => match self.ctx.resolver.resolve(domain, port).await {
                Ok(ips) => ips[0],
                Err(err) => {
                    let _ = codec::write_reply(client, codec::HOST_UNREACHABLE, &DstAddr::unspecified(), 0).await;
                    return Err(err.into());
                }
            },
        };

        let socket_addr = SocketAddr::new(target_ip, port);
        let connect = tokio::time::timeout(self.ctx.dial_timeout, TcpStream::connect(socket_addr));
        match connect.await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(io_err)) => {
                let dial_err = DialError::classify(io_err);
                let rep = dial_reply_code(&dial_err);
                let _ = codec::write_reply(client, rep, &DstAddr::unspecified(), 0).await;
                Err(dial_err.into())
            }
            Err(_elapsed) => {
                let _ = codec::write_reply(client, codec::TTL_EXPIRED, &DstAddr::unspecified(), 0).await;
                Err(DialError::Timeout.into())
            }
        }
    }

    /// Terminal `[Closed]` handler. Releases the quota entry exactly once
    /// if the session was admitted; unconditional regardless of which exit
    /// path reached here. Socket closure is left to `drop`: `client`/
    /// `upstream` go out of scope in `drive`/`relay` on every path.
    fn teardown(&mut self) {
        self.phase = Phase::Closed;
        if self.admitted {
            if let Some(user) = &self.authenticated_user {
                self.ctx.quota.release(user);
            }
            self.admitted = false;
        }
    }
}

fn make_limiter_for(session: &Session) -> Limiter {
    relay::make_limiter(session.ctx.rate_limit_bps, session.ctx.burst_bytes)
}

fn socket_addr_to_dst(addr: SocketAddr) -> DstAddr {
    match addr {
        SocketAddr::V4(v4) => DstAddr::IPv4(v4.ip().octets()),
        SocketAddr::V6(v6) => DstAddr::IPv6(v6.ip().octets()),
    }
}

fn dial_reply_code(err: &DialError) -> u8 {
    match err {
        DialError::Timeout => codec::TTL_EXPIRED,
        DialError::ConnectionRefused => codec::CONNECTION_REFUSED,
        DialError::NetworkUnreachable => codec::NETWORK_UNREACHABLE,
        DialError::HostUnreachable(_) => codec::HOST_UNREACHABLE,
        DialError::Other(_) => codec::GENERAL_SOCKS_SERVER_FAILURE,
    }
}
