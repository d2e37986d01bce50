//! Accepts inbound TLS connections, gates them on certificate thumbprint, and hands each
//! authenticated stream to the exchange protocol on its own task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use support::Logger;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use exchange::{MessageExchangeProtocol, QueueMap, RequestHandler};
use wire::Thumbprint;

use crate::error::TransportError;
use crate::tls::{self, Identity};

/// Consulted once per accepted TLS connection with the peer's thumbprint; `true` to continue,
/// `false` to close before any envelope is read.
pub type TrustPredicate = Arc<dyn Fn(&Thumbprint) -> bool + Send + Sync>;

/// A running listener. Dropping this without calling [`Self::dispose`] leaves the accept loop and
/// its connections running in the background; `dispose` is the orderly shutdown path.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    cancellation: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new connections and waits for in-flight ones to observe cancellation and
    /// close. In-flight calls see `ExchangeError::ShuttingDown` rather than hanging.
    pub async fn dispose(self) {
        self.cancellation.cancel();
        let _ = self.accept_task.await;
    }
}

pub struct SecureListener {
    log: Logger,
}

impl SecureListener {
    pub fn new(log: Logger) -> SecureListener {
        SecureListener { log }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn listen(
        &self,
        bind_addr: SocketAddr,
        identity: Identity,
        trust: TrustPredicate,
        handler: Arc<dyn RequestHandler>,
        queues: Arc<QueueMap>,
        idle_deadline: Duration,
        poll_grace: Duration,
    ) -> Result<ListenerHandle, TransportError> {
        let tls_config = tls::server_tls_config(&identity)?;
        let acceptor = TlsAcceptor::from(tls_config);

        let tcp_listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| TransportError::Connect { uri: bind_addr.to_string(), source })?;
        let local_addr = tcp_listener
            .local_addr()
            .map_err(|source| TransportError::Connect { uri: bind_addr.to_string(), source })?;

        let cancellation = CancellationToken::new();
        let log = self.log.clone();

        let loop_cancellation = cancellation.clone();
        let accept_task = tokio::spawn(async move {
            let mut connections = JoinSet::new();

            loop {
                tokio::select! {
                    _ = loop_cancellation.cancelled() => break,
                    accepted = tcp_listener.accept() => {
                        match accepted {
                            Ok((tcp, peer_addr)) => {
                                let conn_log = log.new(support::o!("peer" => peer_addr.to_string()));
                                connections.spawn(serve_one(
                                    tcp,
                                    acceptor.clone(),
                                    trust.clone(),
                                    handler.clone(),
                                    queues.clone(),
                                    idle_deadline,
                                    poll_grace,
                                    loop_cancellation.clone(),
                                    conn_log,
                                ));
                            }
                            Err(err) => support::warn!(log, "accept failed"; "error" => %err),
                        }
                    }
                }
            }

            // Stop taking new connections; let in-flight ones observe the cancellation token
            // inside `exchange_as_server` and wind down on their own.
            while connections.join_next().await.is_some() {}
        });

        Ok(ListenerHandle { local_addr, cancellation, accept_task })
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve_one(
    tcp: TcpStream,
    acceptor: TlsAcceptor,
    trust: TrustPredicate,
    handler: Arc<dyn RequestHandler>,
    queues: Arc<QueueMap>,
    idle_deadline: Duration,
    poll_grace: Duration,
    cancellation: CancellationToken,
    log: Logger,
) {
    let tls_stream = match acceptor.accept(tcp).await {
        Ok(stream) => stream,
        Err(source) => {
            support::warn!(log, "tls handshake failed"; "error" => %source);
            return;
        }
    };

    let thumbprint = match tls::peer_thumbprint_server(&tls_stream) {
        Ok(thumbprint) => thumbprint,
        Err(err) => {
            support::warn!(log, "no peer certificate"; "error" => %err);
            return;
        }
    };

    if !trust(&thumbprint) {
        support::warn!(log, "rejecting untrusted peer"; "thumbprint" => %thumbprint);
        return;
    }

    let mut protocol = match MessageExchangeProtocol::accept_identification(tls_stream, log.clone()).await {
        Ok(protocol) => protocol,
        Err(err) => {
            support::warn!(log, "identification failed"; "error" => %err);
            return;
        }
    };

    let queue = match protocol.subscription_uri() {
        Some(uri) => Some(queues.get_or_create(uri).await),
        None => None,
    };

    if let Err(err) = protocol
        .exchange_as_server(handler, queue, idle_deadline, poll_grace, cancellation)
        .await
    {
        support::debug!(log, "connection closed"; "reason" => %err);
    }
}
