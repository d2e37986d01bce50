//! Supervises one outbound-initiated, inbound-serving connection: repeatedly dials as
//! `MX-SUBSCRIBER`, serves requests until the connection drops, and retries with capped
//! exponential backoff plus jitter. This is what lets a firewalled host behind outbound-only
//! egress still answer RPC calls — the connection it dials inverts into the request-servicing
//! role once identified.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use support::Logger;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use exchange::RequestHandler;
use wire::Endpoint;

use crate::client::SecureClient;

#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub idle_deadline: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            idle_deadline: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
        }
    }
}

struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Backoff {
        Backoff { current: initial, initial, max }
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }

    fn next_delay(&mut self) -> Duration {
        let jitter_bound = (self.current.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..=jitter_bound);
        let delay = self.current + Duration::from_millis(jitter);
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

pub struct PollingClient {
    client: Arc<SecureClient>,
    remote: Endpoint,
    subscription_uri: String,
    handler: Arc<dyn RequestHandler>,
    config: PollingConfig,
    log: Logger,
}

impl PollingClient {
    pub fn new(
        client: Arc<SecureClient>,
        remote: Endpoint,
        subscription_uri: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
        config: PollingConfig,
        log: Logger,
    ) -> PollingClient {
        PollingClient {
            client,
            remote,
            subscription_uri: subscription_uri.into(),
            handler,
            config,
            log,
        }
    }

    /// Runs the supervisory loop until `cancellation` fires. Spawn this on its own task; the
    /// returned handle resolves once the loop has observed cancellation and wound down.
    pub fn spawn(self, cancellation: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancellation).await })
    }

    async fn run(self, cancellation: CancellationToken) {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);

        loop {
            if cancellation.is_cancelled() {
                return;
            }

            match self.client.dial_as_subscriber(&self.remote, &self.subscription_uri).await {
                Ok(mut protocol) => {
                    backoff.reset();
                    match protocol
                        .serve_as_polling_client(self.handler.clone(), self.config.idle_deadline, cancellation.clone())
                        .await
                    {
                        Ok(()) => {
                            support::debug!(self.log, "polling connection closed by peer; reconnecting";
                                "subscription" => &self.subscription_uri);
                        }
                        Err(exchange::ExchangeError::ShuttingDown) => return,
                        Err(err) => {
                            support::warn!(self.log, "polling connection failed";
                                "subscription" => &self.subscription_uri, "error" => %err);
                        }
                    }
                }
                Err(err) => {
                    support::warn!(self.log, "failed to dial polling endpoint";
                        "subscription" => &self.subscription_uri, "error" => %err);

                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = cancellation.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
