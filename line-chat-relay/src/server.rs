use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    clock::{Clock, SystemClock},
    connection::handle_connection,
    coordinator::{Coordinator, RelayConfig},
};

/// Accepts connections and spawns one session per client.
pub struct Server {
    listener: TcpListener,
    coordinator: Coordinator,
    clock: Arc<dyn Clock>,
}

impl Server {
    /// Starts the coordinator and wraps an already bound listener.
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self::with_clock(listener, config, Arc::new(SystemClock))
    }

    pub fn with_clock(listener: TcpListener, config: RelayConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            listener,
            coordinator: Coordinator::spawn(config),
            clock,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn coordinator(&self) -> Coordinator {
        self.coordinator.clone()
    }

    /// Accepts until `shutdown` resolves. Sessions already running are left
    /// alone and end with the runtime.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            coordinator,
            clock,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("no longer accepting connections");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &coordinator, &clock);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    coordinator: &Coordinator,
    clock: &Arc<dyn Clock>,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, coordinator, clock),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    coordinator: &Coordinator,
    clock: &Arc<dyn Clock>,
) {
    let coordinator = coordinator.clone();
    let clock = Arc::clone(clock);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, coordinator, clock).await {
            warn!(peer = %peer, error = ?err, "client session ended with error");
        }
    });
}
