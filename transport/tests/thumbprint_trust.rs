//! End-to-end TLS trust: a listener that only accepts a known thumbprint, a client that only
//! accepts the listener's known thumbprint, and the mismatch case that must close the connection
//! before any envelope is exchanged.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use exchange::{QueueMap, RequestHandler};
use tokio_util::sync::CancellationToken;
use transport::{ConnectionPool, Identity, PoolConfig, SecureClient, SecureListener};
use wire::{ActivityId, Endpoint, RequestMessage, ResponseMessage, Value};

fn self_signed_identity(name: &str) -> (Identity, wire::Thumbprint) {
    let certified = generate_simple_self_signed(vec![name.to_string()]).unwrap();
    let der: CertificateDer<'static> = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    let thumbprint = wire::Thumbprint::of_der_certificate(der.as_ref());
    (
        Identity { cert_chain: vec![der], key: Arc::new(key) },
        thumbprint,
    )
}

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
async fn trusted_thumbprint_completes_a_round_trip() {
    let (server_identity, server_thumbprint) = self_signed_identity("localhost");
    let (client_identity, client_thumbprint) = self_signed_identity("localhost-client");

    let handler = Arc::new(EchoHandler { calls: AtomicUsize::new(0) });
    let queues = Arc::new(QueueMap::new());
    let trust_client = client_thumbprint;
    let trust: transport::TrustPredicate = Arc::new(move |got| *got == trust_client);

    let listener = SecureListener::new(support::logging::discard());
    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let handle = listener
        .listen(
            bind_addr,
            server_identity,
            trust,
            handler.clone(),
            queues,
            Duration::from_secs(5),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

    let endpoint = Endpoint::https(format!("https://127.0.0.1:{}/", handle.port()), server_thumbprint);
    let pool = ConnectionPool::new(PoolConfig::default());
    let client = SecureClient::new(client_identity, pool, support::logging::discard()).unwrap();

    let request = RequestMessage::new(
        ActivityId::new(),
        endpoint.clone(),
        "IEchoService",
        "SayHello",
        vec![Value::Str("Paul".to_string())],
    );

    let response = client
        .execute_transaction(&endpoint, |protocol| {
            protocol.exchange_as_client(request, Duration::from_secs(5), CancellationToken::new())
        })
        .await
        .unwrap();

    assert_eq!(response.into_result().unwrap(), Value::Str("Paul...".to_string()));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    handle.dispose().await;
}

#[tokio::test]
async fn untrusted_thumbprint_is_rejected_before_any_handler_call() {
    let (server_identity, _server_thumbprint) = self_signed_identity("localhost");
    let (client_identity, _client_thumbprint) = self_signed_identity("localhost-client");

    let handler = Arc::new(EchoHandler { calls: AtomicUsize::new(0) });
    let queues = Arc::new(QueueMap::new());
    // Trust nobody — simulates the peer presenting an unrecognized certificate.
    let trust: transport::TrustPredicate = Arc::new(|_got| false);

    let listener = SecureListener::new(support::logging::discard());
    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let handle = listener
        .listen(
            bind_addr,
            server_identity,
            trust,
            handler.clone(),
            queues,
            Duration::from_secs(5),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

    // The client doesn't know the server's real thumbprint either — any placeholder will do
    // since the listener closes before the client gets to read anything back.
    let bogus_server_thumbprint: wire::Thumbprint = "AA".repeat(32).parse().unwrap();
    let endpoint = Endpoint::https(format!("https://127.0.0.1:{}/", handle.port()), bogus_server_thumbprint);
    let pool = ConnectionPool::new(PoolConfig::default());
    let client = SecureClient::new(client_identity, pool, support::logging::discard()).unwrap();

    let request = RequestMessage::new(
        ActivityId::new(),
        endpoint.clone(),
        "IEchoService",
        "SayHello",
        vec![Value::Str("Paul".to_string())],
    );

    let result = client
        .execute_transaction(&endpoint, |protocol| {
            protocol.exchange_as_client(request, Duration::from_secs(5), CancellationToken::new())
        })
        .await;

    assert!(result.is_err(), "client should reject the server's unexpected thumbprint");
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0, "handler must never be invoked");

    handle.dispose().await;
}
