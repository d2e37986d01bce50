//! Dials TLS, verifies the remote's thumbprint, and runs one transaction through the exchange
//! protocol, reusing a pooled connection when one is idle and available.

use std::future::Future;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use support::Logger;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use exchange::MessageExchangeProtocol;
use wire::Endpoint;

use crate::error::TransportError;
use crate::pool::{ClientProtocol, ConnectionPool};
use crate::tls::{self, Identity};

pub struct SecureClient {
    identity: Identity,
    tls_config: Arc<rustls::ClientConfig>,
    pool: Arc<ConnectionPool>,
    log: Logger,
}

impl SecureClient {
    pub fn new(identity: Identity, pool: Arc<ConnectionPool>, log: Logger) -> Result<SecureClient, TransportError> {
        let tls_config = tls::client_tls_config(&identity)?;
        Ok(SecureClient { identity, tls_config, pool, log })
    }

    /// Checks out a connection (pooled or freshly dialed), runs `work` against it, and returns it
    /// to the pool on clean completion or drops it on any error. `work` must leave the protocol
    /// in `IdleClient` state to be pool-eligible; a transport error already closes it internally.
    pub async fn execute_transaction<F, Fut, T>(&self, endpoint: &Endpoint, work: F) -> Result<T, TransportError>
    where
        F: FnOnce(&mut ClientProtocol) -> Fut,
        Fut: Future<Output = Result<T, exchange::ExchangeError>>,
    {
        let mut protocol = match self.pool.take(endpoint).await {
            Some(protocol) => protocol,
            None => self.dial(endpoint).await?,
        };

        match work(&mut protocol).await {
            Ok(value) => {
                self.pool.put_back(endpoint, protocol).await;
                Ok(value)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn dial(&self, endpoint: &Endpoint) -> Result<ClientProtocol, TransportError> {
        let tls_stream = self.dial_tls(endpoint).await?;
        let log = self.log.new(support::o!("endpoint" => endpoint.base_uri().to_string()));
        let protocol = MessageExchangeProtocol::identify_as_client(tls_stream, log).await?;
        Ok(protocol)
    }

    /// Dials and identifies as `MX-SUBSCRIBER <subscription_uri>`. Used by
    /// [`crate::polling::PollingClient`] — these connections are never pool-managed; they are
    /// held open for the lifetime of one polling cycle.
    pub async fn dial_as_subscriber(
        &self,
        endpoint: &Endpoint,
        subscription_uri: &str,
    ) -> Result<ClientProtocol, TransportError> {
        let tls_stream = self.dial_tls(endpoint).await?;
        let log = self.log.new(support::o!("endpoint" => endpoint.base_uri().to_string()));
        let protocol =
            MessageExchangeProtocol::identify_as_subscriber(tls_stream, subscription_uri.to_string(), log).await?;
        Ok(protocol)
    }

    async fn dial_tls(&self, endpoint: &Endpoint) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TransportError> {
        let authority = endpoint.authority();

        let tcp = TcpStream::connect(authority).await.map_err(|source| TransportError::Connect {
            uri: endpoint.base_uri().to_string(),
            source,
        })?;
        let _ = tcp.set_nodelay(true);

        let host = authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority);
        let server_name = ServerName::try_from(host.to_string()).map_err(|_| TransportError::Handshake {
            uri: endpoint.base_uri().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a valid server name"),
        })?;

        let connector = TlsConnector::from(self.tls_config.clone());
        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|source| TransportError::Handshake { uri: endpoint.base_uri().to_string(), source })?;

        let got = tls::peer_thumbprint_client(&tls_stream)?;
        if let Some(expected) = endpoint.thumbprint() {
            if got != *expected {
                return Err(TransportError::ThumbprintMismatch {
                    uri: endpoint.base_uri().to_string(),
                    expected: expected.to_string(),
                    got: got.to_string(),
                });
            }
        }

        Ok(tls_stream)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}
