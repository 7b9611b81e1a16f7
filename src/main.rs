use std::sync::Arc;

use clap::Parser;

use socks5d::config::{Cli, ServerConfig};
use socks5d::listener;
use socks5d::quota::QuotaTable;
use socks5d::resolver::TokioResolver;
use socks5d::session::SessionContext;
use socks5d::user_store::StaticUserStore;

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = ServerConfig::load(&cli)?;
    log::info!(
        "loaded {} configured user(s), rate limit {} bytes/s (0 = unlimited)",
        config.users.len(),
        config.rate_limit_bps
    );

    let ctx = Arc::new(SessionContext {
        user_store: Arc::new(StaticUserStore::new(config.users)),
        resolver: Arc::new(TokioResolver),
        quota: Arc::new(QuotaTable::new()),
        dial_timeout: config.dial_timeout,
        rate_limit_bps: config.rate_limit_bps,
        burst_bytes: config.burst_bytes,
    });

    listener::serve(config.listen_endpoint, ctx).await?;
    Ok(())
}
