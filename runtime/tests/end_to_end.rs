//! Exercises the runtime's public surface the way a service integrator would: a direct call over
//! `https`, a call relayed through one `Route` hop, and a call delivered over a `poll`
//! subscription to an outbound-only peer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use exchange::RequestHandler;
use runtime::config::DeadlineSettings;
use runtime::Runtime;
use transport::{Identity, PoolConfig};
use wire::{ActivityId, Endpoint, RemoteError, RequestMessage, ResponseMessage, Thumbprint, Value};

fn self_signed_identity(name: &str) -> (Identity, Thumbprint) {
    let certified = generate_simple_self_signed(vec![name.to_string()]).unwrap();
    let der: CertificateDer<'static> = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    let thumbprint = Thumbprint::of_der_certificate(der.as_ref());
    (Identity { cert_chain: vec![der], key: Arc::new(key) }, thumbprint)
}

struct EchoHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(&self, request: RequestMessage) -> ResponseMessage {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match request.params().first() {
            Some(Value::Str(name)) => ResponseMessage::success(request.request_id(), Value::Str(format!("{name}..."))),
            _ => ResponseMessage::failure(request.request_id(), RemoteError::new("expected a string argument", "IEchoService.say_hello")),
        }
    }
}

struct NeverCalled;

#[async_trait]
impl RequestHandler for NeverCalled {
    async fn handle(&self, request: RequestMessage) -> ResponseMessage {
        ResponseMessage::failure(request.request_id(), RemoteError::new("this runtime never services requests", "unused"))
    }
}

fn new_runtime(identity: Identity, invoker: Arc<dyn RequestHandler>) -> Runtime {
    Runtime::new(identity, invoker, PoolConfig::default(), DeadlineSettings::default(), support::logging::discard()).unwrap()
}

fn say_hello_request(destination: Endpoint) -> RequestMessage {
    RequestMessage::new(ActivityId::new(), destination, "IEchoService", "say_hello", vec![Value::Str("Paul".to_string())])
}

#[tokio::test]
async fn direct_https_call_round_trips() {
    let (server_identity, server_thumbprint) = self_signed_identity("server");
    let (client_identity, client_thumbprint) = self_signed_identity("client");

    let handler = Arc::new(EchoHandler { calls: AtomicUsize::new(0) });
    let server = new_runtime(server_identity, handler.clone());
    server.trust(client_thumbprint);

    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let port = server.listen(bind_addr).await.unwrap();

    let client = new_runtime(client_identity, Arc::new(NeverCalled));
    let endpoint = Endpoint::https(format!("https://127.0.0.1:{port}/"), server_thumbprint);
    let response = client.send(say_hello_request(endpoint)).await.unwrap();

    assert_eq!(response.into_result().unwrap(), Value::Str("Paul...".to_string()));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    server.dispose().await;
    client.dispose().await;
}

#[tokio::test]
async fn call_relayed_through_one_route_hop() {
    let (final_identity, final_thumbprint) = self_signed_identity("final-leg");
    let (router_identity, router_thumbprint) = self_signed_identity("router-leg");
    let (origin_identity, origin_thumbprint) = self_signed_identity("origin-leg");

    let final_handler = Arc::new(EchoHandler { calls: AtomicUsize::new(0) });
    let final_runtime = new_runtime(final_identity, final_handler.clone());
    final_runtime.trust(router_thumbprint);

    let router_runtime = new_runtime(router_identity, Arc::new(NeverCalled));
    router_runtime.trust(origin_thumbprint);

    let origin_runtime = new_runtime(origin_identity, Arc::new(NeverCalled));

    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let final_port = final_runtime.listen(bind_addr).await.unwrap();
    let router_port = router_runtime.listen(bind_addr).await.unwrap();

    let final_endpoint = Endpoint::https(format!("https://127.0.0.1:{final_port}/"), final_thumbprint);
    let router_endpoint = Endpoint::https(format!("https://127.0.0.1:{router_port}/"), router_thumbprint);

    // The origin never dials the final leg directly — its route table sends every call for
    // "service/final" through the router instead, which holds the route that actually reaches it.
    origin_runtime.route("service/final", router_endpoint).await;
    router_runtime.route("service/final", final_endpoint).await;

    let destination = Endpoint::https("service/final", final_thumbprint);
    let response = origin_runtime.send(say_hello_request(destination)).await.unwrap();

    assert_eq!(response.into_result().unwrap(), Value::Str("Paul...".to_string()));
    assert_eq!(final_handler.calls.load(Ordering::SeqCst), 1);

    final_runtime.dispose().await;
    router_runtime.dispose().await;
    origin_runtime.dispose().await;
}

#[tokio::test]
async fn poll_subscription_is_serviced_by_the_dialing_peer() {
    let (sender_identity, sender_thumbprint) = self_signed_identity("poll-sender");
    let (worker_identity, worker_thumbprint) = self_signed_identity("poll-worker");

    let sender = new_runtime(sender_identity, Arc::new(NeverCalled));
    sender.trust(worker_thumbprint);

    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let port = sender.listen(bind_addr).await.unwrap();

    let worker_handler = Arc::new(EchoHandler { calls: AtomicUsize::new(0) });
    let worker = new_runtime(worker_identity, worker_handler.clone());

    let sender_endpoint = Endpoint::https(format!("https://127.0.0.1:{port}/"), sender_thumbprint);
    worker.poll("work-queue", sender_endpoint).await;

    // Give the worker's supervisory loop a beat to dial in and identify before the request is
    // queued, so it lands on an already-open polling connection rather than waiting for the
    // worker's first connection attempt.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let destination = Endpoint::poll("work-queue");
    let response = tokio::time::timeout(Duration::from_secs(5), sender.send(say_hello_request(destination)))
        .await
        .expect("poll round trip should not time out")
        .unwrap();

    assert_eq!(response.into_result().unwrap(), Value::Str("Paul...".to_string()));
    assert_eq!(worker_handler.calls.load(Ordering::SeqCst), 1);

    sender.dispose().await;
    worker.dispose().await;
}
