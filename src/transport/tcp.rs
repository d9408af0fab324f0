//! Stream transport driver.
//!
//! Connects (optionally over TLS), runs the read/write loop, sends client
//! pings and, with auto-reconnect, reconnects with exponential back-off while
//! rotating through the resolved addresses.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, info, warn};

use crate::config::TcpOption;
use crate::core::{TransportError, TransportState};
use crate::core::constants::{
    INITIAL_RECONNECT_WAIT, MAX_RECONNECT_COUNT, MAX_RECONNECT_WAIT, PING_INTERVAL, PING_TIMEOUT,
    RECV_BUFFER_SIZE,
};

use super::stream::{BoxedStream, TlsTarget, connect, resolve};
use super::{DriverContext, Exit, Shared};

/// Back-off state across connect attempts.
#[derive(Debug)]
struct Reconnect {
    addrs: Vec<SocketAddr>,
    index: usize,
    attempts: u32,
    wait: Duration,
    max_wait: Duration,
}

impl Reconnect {
    fn new(addrs: Vec<SocketAddr>, connect_timeout: Duration) -> Self {
        Self {
            addrs,
            index: 0,
            attempts: 0,
            wait: INITIAL_RECONNECT_WAIT,
            max_wait: MAX_RECONNECT_WAIT.min(connect_timeout),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.addrs[self.index]
    }

    fn connected(&mut self) {
        self.attempts = 0;
        self.wait = INITIAL_RECONNECT_WAIT;
    }

    /// Record a failed attempt. Returns the wait before the next one, or
    /// `None` once every address has used up its attempts.
    fn failed(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= MAX_RECONNECT_COUNT {
            if self.index + 1 >= self.addrs.len() {
                return None;
            }
            self.index += 1;
            self.attempts = 0;
            self.wait = INITIAL_RECONNECT_WAIT;
            return Some(Duration::ZERO);
        }
        Some(self.next_wait())
    }

    fn next_wait(&mut self) -> Duration {
        let wait = self.wait;
        self.wait = (self.wait * 2).min(self.max_wait);
        wait
    }
}

pub(crate) async fn run(mut ctx: DriverContext, option: TcpOption) {
    let addrs = match resolve(&ctx.host, ctx.port).await {
        Ok(addrs) => addrs,
        Err(e) => {
            ctx.shared.connect_failed(e);
            return;
        }
    };
    let mut reconnect = Reconnect::new(addrs, option.connect_timeout);
    let host = ctx.host.clone();
    let tls = option.use_tls.then(|| TlsTarget {
        server_name: host.as_str(),
        ca_file: option.ca_file.as_deref(),
    });

    loop {
        let addr = reconnect.addr();
        ctx.shared.set_state(TransportState::Connecting);
        debug!(%addr, "connecting");

        let connected = tokio::select! {
            result = connect(addr, option.connect_timeout, option.disable_nagle, tls) => result,
            _ = &mut ctx.shutdown => {
                ctx.shared.stopped(None);
                return;
            }
        };

        let wait = match connected {
            Ok(stream) => {
                reconnect.connected();
                match run_connection(stream, &mut ctx, &option).await {
                    Exit::Stopped => {
                        ctx.shared.stopped(None);
                        return;
                    }
                    Exit::Fatal(e) => {
                        ctx.shared.stopped(Some(e));
                        return;
                    }
                    Exit::Dropped(e) => {
                        ctx.shared.dropped(e);
                        if !option.auto_reconnect || ctx.stop_requested() {
                            return;
                        }
                        reconnect.next_wait()
                    }
                }
            }
            Err(e) => {
                warn!(%addr, error = %e, "connect attempt failed");
                if !option.auto_reconnect {
                    if reconnect.index + 1 >= reconnect.addrs.len() {
                        ctx.shared.connect_failed(e);
                        return;
                    }
                    reconnect.index += 1;
                    continue;
                }
                match reconnect.failed() {
                    Some(wait) => wait,
                    None => {
                        ctx.shared.connect_failed(e);
                        return;
                    }
                }
            }
        };

        info!(wait_ms = wait.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = sleep(wait) => {}
            _ = &mut ctx.shutdown => {
                ctx.shared.stopped(None);
                return;
            }
        }
    }
}

/// A silent peer counts as a dropped connection when auto-reconnect is on;
/// otherwise it stops the transport.
fn ping_timeout_exit(auto_reconnect: bool) -> Exit {
    if auto_reconnect {
        Exit::Dropped(TransportError::PingTimeout)
    } else {
        Exit::Fatal(TransportError::PingTimeout)
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

/// Write everything the core releases; `send_all` lifts the per-cycle cap.
async fn flush<W: AsyncWrite + Unpin>(
    shared: &Shared,
    writer: &mut W,
    send_all: bool,
) -> Result<(), Exit> {
    loop {
        let frames = shared.core().take_stream_frames(send_all).map_err(Exit::Fatal)?;
        if frames.is_empty() {
            break;
        }
        for frame in &frames {
            writer
                .write_all(frame)
                .await
                .map_err(|e| Exit::Dropped(e.into()))?;
        }
    }
    writer.flush().await.map_err(|e| Exit::Dropped(e.into()))
}

async fn run_connection(stream: BoxedStream, ctx: &mut DriverContext, option: &TcpOption) -> Exit {
    let (mut reader, mut writer): (ReadHalf<BoxedStream>, WriteHalf<BoxedStream>) =
        tokio::io::split(stream);
    let shared = &ctx.shared;
    if let Err(e) = shared.connected() {
        return Exit::Fatal(e);
    }

    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let start = Instant::now();
    let mut ping = interval_at(start + PING_INTERVAL, PING_INTERVAL);
    let mut ping_deadline = start + PING_INTERVAL + PING_TIMEOUT;
    let delayed_ack = !ctx.delayed_ack.is_zero();
    let ack_period = ctx.delayed_ack.max(Duration::from_millis(1));
    let mut ack_timer = interval_at(start + ack_period, ack_period);

    loop {
        if let Err(exit) = flush(shared, &mut writer, false).await {
            return exit;
        }

        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    return Exit::Dropped(TransportError::Io(std::io::ErrorKind::UnexpectedEof.into()));
                }
                Ok(n) => {
                    ping_deadline = Instant::now() + PING_TIMEOUT;
                    let inbound = shared.core().on_stream_bytes(&buf[..n]);
                    if let Some(e) = shared.deliver(inbound) {
                        return Exit::Fatal(e);
                    }
                }
                Err(e) => return Exit::Dropped(e.into()),
            },
            _ = shared.wake.notified() => {}
            _ = ping.tick(), if option.enable_ping => {
                if Instant::now() >= ping_deadline {
                    return ping_timeout_exit(option.auto_reconnect);
                }
                match shared.core().push_ping(now_micros()) {
                    Ok(true) => debug!("ping sent"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "ping not sent"),
                }
            }
            _ = ack_timer.tick(), if delayed_ack => {
                shared.core().flush_delayed_ack();
            }
            _ = &mut ctx.shutdown => {
                let _ = flush(shared, &mut writer, true).await;
                let _ = writer.shutdown().await;
                return Exit::Stopped;
            }
        }
    }
}
