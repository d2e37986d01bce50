//! The runtime dispatcher: `Listen`/`Trust`/`Poll`/`Route`/`CreateClient`/`Discover`/`Dispose`,
//! and the two algorithms that tie everything below it together — `send_outgoing_request` (proxy
//! → transport or queue) and the router-unwrap half of inbound dispatch, realized as a
//! [`RequestHandler`] ([`Dispatcher`]) passed down to every listener and polling client.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use support::Logger;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use exchange::{QueueMap, RequestHandler};
use transport::{
    ConnectionPool, Identity, ListenerHandle, PoolConfig, PollingClient, PollingConfig, SecureClient, SecureListener,
    TrustPredicate,
};
use wire::{Endpoint, RemoteError, RequestMessage, ResponseMessage, Scheme, Thumbprint};

use crate::config::DeadlineSettings;
use crate::error::ClientError;
use crate::routes::RouteTable;
use crate::trust::TrustSet;

/// What the runtime hands an inbound `RequestMessage` that isn't a router call — the opaque
/// service-invocation mechanism the surrounding system (reflection, codegen, whatever) provides.
pub use exchange::RequestHandler as ServiceInvoker;

const EVICTION_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct RuntimeInner {
    log: Logger,
    trust: Arc<TrustSet>,
    routes: Arc<RouteTable>,
    queues: Arc<QueueMap>,
    client: Arc<SecureClient>,
    invoker: Arc<dyn ServiceInvoker>,
    listeners: tokio::sync::Mutex<Vec<ListenerHandle>>,
    pollers: tokio::sync::Mutex<Vec<(CancellationToken, JoinHandle<()>)>>,
    cancellation: CancellationToken,
    deadlines: DeadlineSettings,
}

impl RuntimeInner {
    /// `SendOutgoingRequest`: rewrites the destination through the route table if one applies,
    /// then dispatches by scheme. Both arms are bounded by `self.cancellation` so a call still in
    /// flight when `dispose()` runs fails with `ExchangeError::ShuttingDown` instead of hanging on
    /// a peer that accepted the call but never answers.
    async fn send_outgoing_request(self: &Arc<Self>, request: RequestMessage) -> Result<ResponseMessage, ClientError> {
        let request = match self.routes.get(request.destination().base_uri()).await {
            Some(via) => request
                .wrap_for_routing(via)
                .map_err(exchange::ExchangeError::from)?,
            None => request,
        };

        match request.destination().scheme() {
            Scheme::Https => {
                let endpoint = request.destination().clone();
                let response_deadline = self.deadlines.response_deadline;
                let cancellation = self.cancellation.clone();
                let response = self
                    .client
                    .execute_transaction(&endpoint, |protocol| {
                        protocol.exchange_as_client(request, response_deadline, cancellation)
                    })
                    .await?;
                Ok(response)
            }
            Scheme::Poll => {
                let subscription_uri = request.destination().base_uri().to_string();
                let queue = self.queues.get_or_create(&subscription_uri).await;
                let response = queue
                    .queue_and_wait(
                        request,
                        self.deadlines.collection_deadline,
                        self.deadlines.response_deadline,
                        self.cancellation.clone(),
                    )
                    .await?;
                Ok(response)
            }
        }
    }
}

/// Dispatches one accepted or polled connection's requests: unwraps and relays `Router.Route`
/// calls per the route table, or hands anything else straight to the configured
/// [`ServiceInvoker`].
struct Dispatcher {
    runtime: Weak<RuntimeInner>,
    routes: Arc<RouteTable>,
    invoker: Arc<dyn ServiceInvoker>,
    log: Logger,
}

#[async_trait]
impl RequestHandler for Dispatcher {
    async fn handle(&self, request: RequestMessage) -> ResponseMessage {
        if !request.is_router_call() {
            let response = self.invoker.handle(request).await;
            support::debug!(self.log, "handled request"; "outcome" => response.as_result().is_ok());
            return response;
        }

        let wire_request_id = request.request_id();
        let original = match request.unwrap_routed() {
            Ok(original) => original,
            Err(err) => {
                return ResponseMessage::failure(wire_request_id, RemoteError::new(err.to_string(), "Router.Route"));
            }
        };

        // Consult the route table only on the original destination, never on `via` — this is
        // what keeps a single unwrap-and-resend from chaining into an undetected routing cycle
        // beyond one hop of our own making.
        let has_route = self.routes.get(original.destination().base_uri()).await.is_some();

        let response = if has_route {
            match self.runtime.upgrade() {
                Some(runtime) => match runtime.send_outgoing_request(original.clone()).await {
                    Ok(response) => response,
                    Err(err) => {
                        let remote = match err.remote() {
                            Some(remote) => remote.clone().with_frames(
                                remote.frames.iter().cloned().chain(std::iter::once("Router.Route".to_string())).collect(),
                            ),
                            None => RemoteError::new(err.to_string(), "Router.Route"),
                        };
                        ResponseMessage::failure(original.request_id(), remote)
                    }
                },
                None => ResponseMessage::failure(
                    original.request_id(),
                    RemoteError::new("the runtime is shutting down", "Router.Route"),
                ),
            }
        } else {
            self.invoker.handle(original).await
        };

        support::debug!(self.log, "relayed routed request"; "outcome" => response.as_result().is_ok());
        response.retargeted(wire_request_id)
    }
}

/// A single runtime instance: can simultaneously listen for inbound connections, maintain
/// outbound polling connections, and send calls out as a client.
pub struct Runtime {
    identity: Identity,
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(
        identity: Identity,
        invoker: Arc<dyn ServiceInvoker>,
        pool_config: PoolConfig,
        deadlines: DeadlineSettings,
        log: Logger,
    ) -> Result<Runtime, ClientError> {
        let cancellation = CancellationToken::new();
        let pool = ConnectionPool::new(pool_config);
        pool.spawn_eviction_sweep(EVICTION_SWEEP_INTERVAL, cancellation.clone());

        let client = Arc::new(SecureClient::new(identity.clone(), pool, log.new(support::o!("component" => "client")))?);

        let inner = Arc::new(RuntimeInner {
            log,
            trust: Arc::new(TrustSet::new()),
            routes: Arc::new(RouteTable::new()),
            queues: Arc::new(QueueMap::new()),
            client,
            invoker,
            listeners: tokio::sync::Mutex::new(Vec::new()),
            pollers: tokio::sync::Mutex::new(Vec::new()),
            cancellation,
            deadlines,
        });

        Ok(Runtime { identity, inner })
    }

    fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::new(Dispatcher {
            runtime: Arc::downgrade(&self.inner),
            routes: self.inner.routes.clone(),
            invoker: self.inner.invoker.clone(),
            log: self.inner.log.new(support::o!("component" => "dispatcher")),
        })
    }

    /// `Trust(thumbprint)`: additive and live — affects every connection accepted from here on.
    pub fn trust(&self, thumbprint: Thumbprint) {
        self.inner.trust.trust(thumbprint);
    }

    /// `Route(to, via)`: first registration for `to` wins.
    pub async fn route(&self, to: impl Into<String>, via: Endpoint) {
        self.inner.routes.route(to, via).await;
    }

    /// `Listen([endpoint]) -> port`. Binds `bind_addr` (use port 0 to let the OS choose) and
    /// returns the bound port.
    pub async fn listen(&self, bind_addr: SocketAddr) -> Result<u16, ClientError> {
        let listener = SecureListener::new(self.inner.log.new(support::o!("component" => "listener")));
        let trust = self.inner.trust.clone();
        let predicate: TrustPredicate = Arc::new(move |thumbprint: &Thumbprint| trust.is_trusted(thumbprint));

        let handle = listener
            .listen(
                bind_addr,
                self.identity.clone(),
                predicate,
                self.dispatcher(),
                self.inner.queues.clone(),
                self.inner.deadlines.idle_deadline,
                self.inner.deadlines.poll_grace,
            )
            .await?;

        let port = handle.port();
        self.inner.listeners.lock().await.push(handle);
        Ok(port)
    }

    /// `Poll(subscription, endpoint)`: maintains an outbound connection identified as
    /// `MX-SUBSCRIBER <subscription>` against `endpoint`, serving requests delivered over it.
    pub async fn poll(&self, subscription_uri: impl Into<String>, endpoint: Endpoint) {
        let cancellation = CancellationToken::new();
        let client = PollingClient::new(
            self.inner.client.clone(),
            endpoint,
            subscription_uri,
            self.dispatcher(),
            PollingConfig { idle_deadline: self.inner.deadlines.idle_deadline, ..PollingConfig::default() },
            self.inner.log.new(support::o!("component" => "poller")),
        );
        let handle = client.spawn(cancellation.clone());
        self.inner.pollers.lock().await.push((cancellation, handle));
    }

    /// `SendOutgoingRequest`, exposed as the surface a generated/hand-written proxy calls
    /// through to realize a typed service call (component G).
    pub async fn send(&self, request: RequestMessage) -> Result<ResponseMessage, ClientError> {
        self.inner.send_outgoing_request(request).await
    }

    /// `Discover(uri) -> endpoint metadata`: opens a short TLS-only connection to read the
    /// remote's certificate thumbprint.
    pub async fn discover(&self, base_uri: &str) -> Result<Endpoint, ClientError> {
        Ok(transport::discover(base_uri, &self.identity).await?)
    }

    /// Releases every listener, polling worker, and pooled connection. In-flight calls observe
    /// the shutdown cancellation token and fail with `ExchangeError::ShuttingDown` rather than
    /// hang — the open question the core leaves to implementations.
    pub async fn dispose(&self) {
        self.inner.cancellation.cancel();

        let listeners = std::mem::take(&mut *self.inner.listeners.lock().await);
        for listener in listeners {
            listener.dispose().await;
        }

        let pollers = std::mem::take(&mut *self.inner.pollers.lock().await);
        for (cancellation, handle) in pollers {
            cancellation.cancel();
            let _ = handle.await;
        }
    }
}
