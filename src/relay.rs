//! Bidirectional byte pump between the authenticated client and the
//! connected upstream, with optional per-direction token-bucket shaping.

use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const BUFFER_SIZE: usize = 4 * 1024;

/// Token-bucket rate limiter: `capacity` tokens, refilled at `rate`
/// tokens/second. Tokens accrue from elapsed wall-clock time rather than a
/// background refill task, so an idle limiter costs nothing.
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    available: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_bps: u64, burst_bytes: u64) -> Self {
        TokenBucket {
            rate: rate_bps as f64,
            capacity: burst_bytes as f64,
            available: burst_bytes as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Blocks until `n` tokens are available, then removes them.
    pub async fn acquire(&mut self, n: usize) {
        loop {
            self.refill();
            if self.available >= n as f64 {
                self.available -= n as f64;
                return;
            }
            let deficit = n as f64 - self.available;
            let wait = Duration::from_secs_f64((deficit / self.rate).max(0.0));
            tokio::time::sleep(wait).await;
        }
    }
}

/// Per-direction shaping configuration. `None` is a true no-op: the copy
/// loop skips the wait branch entirely instead of constructing a limiter
/// with effectively-unlimited constants.
pub type Limiter = Option<TokenBucket>;

pub fn make_limiter(rate_bps: u64, burst_bytes: u64) -> Limiter {
    if rate_bps == 0 {
        None
    } else {
        Some(TokenBucket::new(rate_bps, burst_bytes))
    }
}

/// Copies `src -> dst` until EOF or error, honoring an optional limiter.
/// Returns the number of bytes transferred.
async fn pump<R, W>(mut src: R, mut dst: W, mut limiter: Limiter) -> (u64, std::io::Result<()>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut transferred = 0u64;
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => return (transferred, Ok(())),
            Ok(n) => n,
            Err(e) => return (transferred, Err(e)),
        };
        if let Some(bucket) = limiter.as_mut() {
            bucket.acquire(n).await;
        }
        if let Err(e) = dst.write_all(&buf[..n]).await {
            return (transferred, Err(e));
        }
        transferred += n as u64;
    }
}

/// Runs both relay directions to completion. Each direction is its own
/// task; when either finishes, the owning sockets are shut down, which
/// causes the peer direction's next read to observe EOF or an error. The
/// two directions are otherwise unordered with respect to each other; byte
/// order within each direction is preserved by the single sequential copy
/// loop.
pub async fn relay(client: TcpStream, upstream: TcpStream, client_limiter: Limiter, upstream_limiter: Limiter) {
    let (client_r, mut client_w) = client.into_split();
    let (upstream_r, mut upstream_w) = upstream.into_split();

    let c2u = tokio::spawn(async move {
        let (n, result) = pump(client_r, &mut upstream_w, client_limiter).await;
        if let Err(e) = &result {
            log::debug!("relay client->upstream ended: {e}");
        }
        let _ = upstream_w.shutdown().await;
        n
    });

    let u2c = tokio::spawn(async move {
        let (n, result) = pump(upstream_r, &mut client_w, upstream_limiter).await;
        if let Err(e) = &result {
            log::debug!("relay upstream->client ended: {e}");
        }
        let _ = client_w.shutdown().await;
        n
    });

    let (sent, received) = tokio::join!(c2u, u2c);
    log::info!(
        "relay finished: {} bytes client->upstream, {} bytes upstream->client",
        sent.unwrap_or(0),
        received.unwrap_or(0)
    );
}
