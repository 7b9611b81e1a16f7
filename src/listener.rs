//! Accept loop: binds the configured endpoint and spawns one `Session` per
//! accepted socket. No admission check happens here — quota is
//! per-authenticated-user, not per-IP.

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::session::{Session, SessionContext};

pub async fn serve(listen_endpoint: std::net::SocketAddr, ctx: Arc<SessionContext>) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_endpoint).await?;
    log::info!("SOCKS5 proxy listening on {listen_endpoint}");

    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let session = Session::new(ctx, peer_addr);
                    session.run(socket).await;
                });
            }
            Err(err) => {
                log::error!("failed to accept connection: {err}");
            }
        }
    }
}
