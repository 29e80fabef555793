//! Network side of the daemon: the UDP command listener and the SIGINT
//! watcher, both on one current-thread runtime beside the control loop.

use anyhow::{Context, Result};
use lightdip_control::{CommandTarget, ShutdownFlag};
use lightdip_protocol::{CommandSession, MAX_DATAGRAM_LEN, respond};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::net::UdpSocket;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct Services {
    cancel: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    command_addr: Option<SocketAddr>,
}

impl Services {
    /// Start listening for commands on `bind`. SIGINT requests shutdown
    /// from the moment this returns.
    ///
    /// A command socket that cannot be bound is logged and skipped; the
    /// interrupt watcher still runs.
    pub fn start<T>(bind: SocketAddr, target: T, shutdown: Arc<ShutdownFlag>) -> Result<Self>
    where
        T: CommandTarget + Send + 'static,
    {
        Self::start_watching(bind, target, shutdown, SignalKind::interrupt())
    }

    fn start_watching<T>(
        bind: SocketAddr,
        target: T,
        shutdown: Arc<ShutdownFlag>,
        stop_signal: SignalKind,
    ) -> Result<Self>
    where
        T: CommandTarget + Send + 'static,
    {
        let socket = match bind_nonblocking(bind) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(%bind, "command socket unavailable: {e}");
                None
            }
        };
        let command_addr = socket.as_ref().and_then(|s| s.local_addr().ok());
        if let Some(addr) = command_addr {
            info!(%addr, "listening for commands");
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build services runtime")?;
        // Installed on the caller's thread, before the services thread exists.
        let interrupt = {
            let _rt = runtime.enter();
            signal(stop_signal)
        };
        let interrupt = match interrupt {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("cannot watch for interrupts: {e}");
                None
            }
        };
        let (cancel, cancel_rx) = watch::channel(false);
        let handle = std::thread::Builder::new()
            .name("services".to_string())
            .spawn(move || runtime.block_on(serve(socket, interrupt, target, shutdown, cancel_rx)))
            .context("spawn services thread")?;

        Ok(Self {
            cancel,
            handle: Some(handle),
            command_addr,
        })
    }

    /// Bound command address, if the socket came up.
    pub fn command_addr(&self) -> Option<SocketAddr> {
        self.command_addr
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.cancel.send(true);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("services thread panicked");
            }
        }
    }
}

impl Drop for Services {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bind_nonblocking(bind: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    let socket = std::net::UdpSocket::bind(bind)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

async fn serve<T: CommandTarget>(
    socket: Option<std::net::UdpSocket>,
    interrupt: Option<Signal>,
    target: T,
    shutdown: Arc<ShutdownFlag>,
    mut cancel: watch::Receiver<bool>,
) {
    let commands = async {
        let Some(socket) = socket else {
            return std::future::pending::<()>().await;
        };
        match UdpSocket::from_std(socket) {
            Ok(socket) => command_loop(&socket, &target).await,
            Err(e) => {
                warn!("command socket unusable: {e}");
                std::future::pending::<()>().await
            }
        }
    };

    let interrupt = async {
        let Some(mut interrupt) = interrupt else {
            return std::future::pending::<()>().await;
        };
        if interrupt.recv().await.is_some() {
            info!("interrupt received, stopping");
            shutdown.request();
        } else {
            std::future::pending::<()>().await
        }
    };

    tokio::select! {
        _ = cancel.changed() => debug!("services cancelled"),
        _ = commands => {}
        _ = interrupt => {}
    }
}

async fn command_loop<T: CommandTarget>(socket: &UdpSocket, target: &T) {
    let mut session = CommandSession::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                debug!("command recv failed: {e}");
                continue;
            }
        };
        let text = String::from_utf8_lossy(&buf[..n]);
        let cmd = session.resolve(&text);
        debug!(%peer, ?cmd, "command");

        let replies = match respond(cmd, target) {
            Ok(r) => r,
            Err(e) => {
                warn!(%peer, "cannot render reply: {e:?}");
                continue;
            }
        };
        for reply in replies {
            if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
                warn!(%peer, "reply failed: {e}");
                break;
            }
        }
    }
}
