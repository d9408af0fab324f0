//! Datagram transport driver. One frame per datagram, no reconnect.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::debug;

use crate::core::TransportError;
use crate::core::constants::RECV_BUFFER_SIZE;

use super::stream::resolve;
use super::{DriverContext, Exit, Shared};

async fn open(host: &str, port: u16) -> Result<UdpSocket, TransportError> {
    let addr = resolve(host, port).await?[0];
    let local: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;
    debug!(%addr, "datagram socket ready");
    Ok(socket)
}

async fn flush(shared: &Shared, socket: &UdpSocket) -> Result<(), Exit> {
    let datagrams = shared.core().take_datagrams().map_err(Exit::Fatal)?;
    for datagram in &datagrams {
        socket
            .send(datagram)
            .await
            .map_err(|e| Exit::Dropped(e.into()))?;
    }
    Ok(())
}

async fn run_socket(socket: UdpSocket, ctx: &mut DriverContext) -> Exit {
    let shared = &ctx.shared;
    if let Err(e) = shared.connected() {
        return Exit::Fatal(e);
    }
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        if let Err(exit) = flush(shared, &socket).await {
            return exit;
        }
        tokio::select! {
            received = socket.recv(&mut buf) => match received {
                Ok(n) => {
                    let inbound = shared.core().on_datagram(&buf[..n]);
                    if let Some(e) = shared.deliver(inbound) {
                        return Exit::Fatal(e);
                    }
                }
                Err(e) => return Exit::Dropped(e.into()),
            },
            _ = shared.wake.notified() => {}
            _ = &mut ctx.shutdown => {
                let _ = flush(shared, &socket).await;
                return Exit::Stopped;
            }
        }
    }
}

pub(crate) async fn run(mut ctx: DriverContext) {
    let socket = match open(&ctx.host, ctx.port).await {
        Ok(socket) => socket,
        Err(e) => {
            ctx.shared.connect_failed(e);
            return;
        }
    };
    match run_socket(socket, &mut ctx).await {
        Exit::Stopped => ctx.shared.stopped(None),
        Exit::Fatal(e) => ctx.shared.stopped(Some(e)),
        Exit::Dropped(e) => ctx.shared.dropped(e),
    }
}
