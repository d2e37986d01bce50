//! [`MessageExchangeProtocol`]: the per-connection state machine. Identifies the peer once, then
//! drives either the plain client/server request-response loop or, for a subscriber, the
//! inverted polling loop — see module docs on [`crate`] for the state diagram this realizes.

use std::time::Duration;

use async_trait::async_trait;
use support::Logger;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use wire::frame::{self, Envelope, Identification, Role};
use wire::{RequestMessage, ResponseMessage};

use crate::error::ExchangeError;
use crate::queue::PendingRequestQueue;
use std::sync::Arc;

/// Implemented by whatever invokes local services on behalf of an accepted `MX-CLIENT`
/// connection. The runtime's dispatcher is the production implementation; this trait is the seam
/// that keeps `exchange` ignorant of service invocation, routing, or the opaque `ServiceInvoker`
/// the surrounding runtime defines.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: RequestMessage) -> ResponseMessage;
}

/// Coarse state of a connection. The transient per-call sub-steps (`SentReq`/`RecvResp` on the
/// client side, `RecvReq`/`SentResp` on the server side) live entirely inside one
/// `exchange_as_client`/`exchange_as_server` call and are not persisted on `self` — only the
/// steady states a connection rests in between calls are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    New,
    IdleClient,
    IdleServer,
    Closed,
}

/// Per-connection protocol state machine. Generic over the transport stream so the same code
/// drives both a live `TlsStream<TcpStream>` and, in tests, an in-memory `tokio::io::DuplexStream`.
pub struct MessageExchangeProtocol<S> {
    stream: S,
    role: Role,
    subscription_uri: Option<String>,
    state: ExchangeState,
    log: Logger,
}

impl<S> MessageExchangeProtocol<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// `NEW -> SENT_ID -> IDLE_CLIENT`: identifies as `MX-CLIENT` to the peer on the other end of
    /// `stream`.
    pub async fn identify_as_client(mut stream: S, log: Logger) -> Result<Self, ExchangeError> {
        frame::write_identification(&mut stream, &Identification::client()).await?;
        Ok(MessageExchangeProtocol {
            stream,
            role: Role::Client,
            subscription_uri: None,
            state: ExchangeState::IdleClient,
            log,
        })
    }

    /// `NEW -> SENT_ID -> IDLE_CLIENT`, identifying as `MX-SUBSCRIBER <subscription_uri>`. The
    /// protocol's role stays `Client` for the purpose of who drives reads/writes first after
    /// identification — role inversion happens in `exchange_as_server`'s loop body based on what
    /// *this side* identified as, which the caller already knows (it is the one polling).
    pub async fn identify_as_subscriber(
        mut stream: S,
        subscription_uri: impl Into<String>,
        log: Logger,
    ) -> Result<Self, ExchangeError> {
        let subscription_uri = subscription_uri.into();
        frame::write_identification(&mut stream, &Identification::subscriber(subscription_uri.clone()))
            .await?;
        Ok(MessageExchangeProtocol {
            stream,
            role: Role::Subscriber,
            subscription_uri: Some(subscription_uri),
            state: ExchangeState::IdleClient,
            log,
        })
    }

    /// `NEW -> RECV_ID -> IDLE_SERVER`: reads the identification preamble from an accepted
    /// connection and records which role the peer claimed.
    pub async fn accept_identification(mut stream: S, log: Logger) -> Result<Self, ExchangeError> {
        let identification = frame::read_identification(&mut stream).await?;
        support::debug!(log, "accepted identification"; "role" => ?identification.role);
        Ok(MessageExchangeProtocol {
            stream,
            role: identification.role,
            subscription_uri: identification.subscription_uri,
            state: ExchangeState::IdleServer,
            log,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn subscription_uri(&self) -> Option<&str> {
        self.subscription_uri.as_deref()
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// `IDLE_CLIENT -> SENT_REQ -> RECV_RESP -> IDLE_CLIENT`. Sends `request`, reads exactly one
    /// response envelope, and returns it — the connection remains usable for the next call,
    /// honoring the FIFO/no-demultiplexing ordering guarantee. Bounded by `response_deadline` and
    /// by `cancellation`: a call still in flight when the runtime is disposed fails with
    /// `ExchangeError::ShuttingDown` rather than hanging on a peer that never replies.
    pub async fn exchange_as_client(
        &mut self,
        request: RequestMessage,
        response_deadline: Duration,
        cancellation: CancellationToken,
    ) -> Result<ResponseMessage, ExchangeError> {
        debug_assert_eq!(self.state, ExchangeState::IdleClient, "exchange_as_client from a non-idle state");

        let request_id = request.request_id();

        let write = tokio::select! {
            _ = cancellation.cancelled() => {
                self.state = ExchangeState::Closed;
                return Err(ExchangeError::ShuttingDown);
            }
            write = frame::write_envelope(&mut self.stream, &Envelope::Request(request)) => write,
        };
        if let Err(err) = write {
            self.state = ExchangeState::Closed;
            return Err(err.into());
        }

        let envelope = tokio::select! {
            _ = cancellation.cancelled() => {
                self.state = ExchangeState::Closed;
                return Err(ExchangeError::ShuttingDown);
            }
            read = tokio::time::timeout(response_deadline, frame::read_envelope(&mut self.stream)) => read,
        };
        let envelope = match envelope {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(err)) => {
                self.state = ExchangeState::Closed;
                return Err(err.into());
            }
            Err(_elapsed) => {
                self.state = ExchangeState::Closed;
                return Err(ExchangeError::ResponseTimeout);
            }
        };

        match envelope {
            Envelope::Response(response) if response.request_id() == request_id => {
                self.state = ExchangeState::IdleClient;
                Ok(response)
            }
            Envelope::Response(response) => {
                self.state = ExchangeState::Closed;
                Err(ExchangeError::UnmatchedResponse(response.request_id().to_string()))
            }
            Envelope::Request(_) => {
                self.state = ExchangeState::Closed;
                Err(wire::ProtocolError::RoleMismatch { expected: Role::Client, got: Role::Subscriber }.into())
            }
        }
    }

    /// Drives the accepting side of the connection (the `SERVER_ROLE` state machine) until the peer
    /// closes, the idle deadline elapses, or `cancellation` fires. Dispatches on what the peer
    /// identified as: a plain `MX-CLIENT` peer gets the normal request/response loop (read a
    /// request, invoke `handler`, write the response, repeat — `SERVER_ROLE`'s
    /// `RECV_REQ -> SENT_RESP`). An `MX-SUBSCRIBER` peer (requires `queue` to be `Some`) gets the
    /// inverted `POLL_SERVER` loop: dequeue a locally-originated pending request, send it as a
    /// request envelope, read the matching response envelope, and complete the pending caller.
    ///
    /// Must only be called on a protocol instance produced by [`Self::accept_identification`] —
    /// the dialing side of a polling connection inverts the other way; see
    /// [`Self::serve_as_polling_client`].
    pub async fn exchange_as_server(
        &mut self,
        handler: Arc<dyn RequestHandler>,
        queue: Option<Arc<PendingRequestQueue>>,
        idle_deadline: Duration,
        poll_grace: Duration,
        cancellation: CancellationToken,
    ) -> Result<(), ExchangeError> {
        debug_assert_eq!(self.state, ExchangeState::IdleServer, "exchange_as_server from a non-idle state");

        match self.role {
            Role::Client => self.serve_requests(handler, idle_deadline, cancellation).await,
            Role::Subscriber => {
                let queue = queue.expect("exchange_as_server: subscriber role requires a queue");
                self.serve_polling(queue, poll_grace, cancellation).await
            }
        }
    }

    /// Drives the dialing side of a polling connection (the `POLL_CLIENT` state machine): having
    /// identified as `MX-SUBSCRIBER`, this side inverts into *servicing* requests rather than
    /// sending them — the same `RECV_REQ -> SENT_RESP` loop an ordinary acceptor runs for an
    /// `MX-CLIENT` peer, just driven from the end that dialed out. This is what
    /// [`PollingClient`](../../transport/struct.PollingClient.html) calls each cycle.
    pub async fn serve_as_polling_client(
        &mut self,
        handler: Arc<dyn RequestHandler>,
        idle_deadline: Duration,
        cancellation: CancellationToken,
    ) -> Result<(), ExchangeError> {
        debug_assert_eq!(self.state, ExchangeState::IdleClient, "serve_as_polling_client from a non-idle state");
        debug_assert_eq!(self.role, Role::Subscriber, "serve_as_polling_client on a non-subscriber identification");
        self.state = ExchangeState::IdleServer;
        self.serve_requests(handler, idle_deadline, cancellation).await
    }

    async fn serve_requests(
        &mut self,
        handler: Arc<dyn RequestHandler>,
        idle_deadline: Duration,
        cancellation: CancellationToken,
    ) -> Result<(), ExchangeError> {
        loop {
            let envelope = tokio::select! {
                _ = cancellation.cancelled() => {
                    self.state = ExchangeState::Closed;
                    return Err(ExchangeError::ShuttingDown);
                }
                read = tokio::time::timeout(idle_deadline, frame::read_envelope(&mut self.stream)) => read,
            };

            let envelope = match envelope {
                Ok(Ok(envelope)) => envelope,
                Ok(Err(wire::ProtocolError::UnexpectedEof)) => {
                    self.state = ExchangeState::Closed;
                    return Ok(());
                }
                Ok(Err(err)) => {
                    self.state = ExchangeState::Closed;
                    return Err(err.into());
                }
                Err(_elapsed) => {
                    self.state = ExchangeState::Closed;
                    return Ok(());
                }
            };

            let request = match envelope {
                Envelope::Request(request) => request,
                Envelope::Response(_) => {
                    self.state = ExchangeState::Closed;
                    return Err(wire::ProtocolError::RoleMismatch { expected: Role::Subscriber, got: Role::Client }.into());
                }
            };

            support::debug!(self.log, "servicing request";
                "service" => request.service_name(), "method" => request.method_name());

            let response = handler.handle(request).await;

            if let Err(err) = frame::write_envelope(&mut self.stream, &Envelope::Response(response)).await {
                self.state = ExchangeState::Closed;
                return Err(err.into());
            }
        }
    }

    async fn serve_polling(
        &mut self,
        queue: Arc<PendingRequestQueue>,
        poll_grace: Duration,
        cancellation: CancellationToken,
    ) -> Result<(), ExchangeError> {
        loop {
            let pending = tokio::select! {
                _ = cancellation.cancelled() => {
                    self.state = ExchangeState::Closed;
                    return Err(ExchangeError::ShuttingDown);
                }
                pending = queue.dequeue(poll_grace) => pending,
            };

            let Some(pending) = pending else {
                // Nothing claimable this cycle; loop again (bounded by cancellation only — a
                // polling connection is meant to sit open and idle between requests).
                continue;
            };

            let request_id = pending.request().request_id();

            if let Err(err) =
                frame::write_envelope(&mut self.stream, &Envelope::Request(pending.request().clone())).await
            {
                self.state = ExchangeState::Closed;
                return Err(err.into());
            }

            let envelope = match frame::read_envelope(&mut self.stream).await {
                Ok(envelope) => envelope,
                Err(err) => {
                    self.state = ExchangeState::Closed;
                    return Err(err.into());
                }
            };

            match envelope {
                Envelope::Response(response) if response.request_id() == request_id => {
                    pending.complete(response);
                }
                Envelope::Response(response) => {
                    self.state = ExchangeState::Closed;
                    return Err(ExchangeError::UnmatchedResponse(response.request_id().to_string()));
                }
                Envelope::Request(_) => {
                    self.state = ExchangeState::Closed;
                    return Err(wire::ProtocolError::RoleMismatch { expected: Role::Client, got: Role::Subscriber }.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wire::{ActivityId, Endpoint, Value};

    struct EchoHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, request: RequestMessage) -> ResponseMessage {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = match request.params().first() {
                Some(Value::Str(s)) => s.clone(),
                _ => "?".to_string(),
            };
            ResponseMessage::success(request.request_id(), Value::Str(format!("{name}...")))
        }
    }

    #[tokio::test]
    async fn client_server_exchange_round_trips() {
        let (client_stream, server_stream) = tokio::io::duplex(8192);

        let client_log = support::logging::discard();
        let server_log = support::logging::discard();

        let client_task = tokio::spawn(async move {
            let mut client =
                MessageExchangeProtocol::identify_as_client(client_stream, client_log).await.unwrap();
            let request = RequestMessage::new(
                ActivityId::new(),
                Endpoint::https("https://localhost:9999/", "AA".repeat(32).parse().unwrap()),
                "IEchoService",
                "SayHello",
                vec![Value::Str("Paul".to_string())],
            );
            client.exchange_as_client(request, Duration::from_secs(5), CancellationToken::new()).await
        });

        let server_task = tokio::spawn(async move {
            let mut server =
                MessageExchangeProtocol::accept_identification(server_stream, server_log).await.unwrap();
            assert_eq!(server.role(), Role::Client);
            let handler = Arc::new(EchoHandler { calls: AtomicUsize::new(0) });
            server
                .exchange_as_server(
                    handler,
                    None,
                    Duration::from_millis(200),
                    Duration::from_millis(50),
                    CancellationToken::new(),
                )
                .await
        });

        let response = client_task.await.unwrap().unwrap();
        assert_eq!(response.into_result().unwrap(), Value::Str("Paul...".to_string()));

        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn polling_role_inverts_send_and_receive() {
        let (sub_stream, listener_stream) = tokio::io::duplex(8192);
        let queue = Arc::new(PendingRequestQueue::new());

        let producer_queue = queue.clone();
        let producer = tokio::spawn(async move {
            let request = RequestMessage::new(
                ActivityId::new(),
                Endpoint::poll("poll://SQ-TEST"),
                "IEchoService",
                "SayHello",
                vec![Value::Str("Paul".to_string())],
            );
            producer_queue
                .queue_and_wait(request, Duration::from_secs(5), Duration::from_secs(5), CancellationToken::new())
                .await
        });

        // Acceptor side: peer identifies as MX-SUBSCRIBER, so this is POLL_SERVER — it drains
        // `queue` and sends requests out over the wire instead of servicing them.
        let listener_cancellation = CancellationToken::new();
        let listener_task = {
            let cancellation = listener_cancellation.clone();
            tokio::spawn(async move {
                let mut listener_side =
                    MessageExchangeProtocol::accept_identification(listener_stream, support::logging::discard())
                        .await
                        .unwrap();
                assert_eq!(listener_side.role(), Role::Subscriber);
                assert_eq!(listener_side.subscription_uri(), Some("poll://SQ-TEST"));

                let unused_handler: Arc<dyn RequestHandler> = Arc::new(EchoHandler { calls: AtomicUsize::new(0) });
                listener_side
                    .exchange_as_server(
                        unused_handler,
                        Some(queue),
                        Duration::from_secs(5),
                        Duration::from_millis(50),
                        cancellation,
                    )
                    .await
            })
        };

        // Dialing side: identified as MX-SUBSCRIBER itself, so this is POLL_CLIENT — it inverts
        // into servicing requests delivered over the connection it dialed.
        let subscriber_task = tokio::spawn(async move {
            let mut subscriber = MessageExchangeProtocol::identify_as_subscriber(
                sub_stream,
                "poll://SQ-TEST",
                support::logging::discard(),
            )
            .await
            .unwrap();
            let handler: Arc<dyn RequestHandler> = Arc::new(EchoHandler { calls: AtomicUsize::new(0) });
            subscriber
                .serve_as_polling_client(handler, Duration::from_millis(200), CancellationToken::new())
                .await
        });

        let response = producer.await.unwrap().unwrap();
        assert_eq!(response.into_result().unwrap(), Value::Str("Paul...".to_string()));

        listener_cancellation.cancel();
        let _ = listener_task.await;
        subscriber_task.abort();
    }
}
