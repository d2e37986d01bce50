//! Maps an original destination base URI to a *via* [`Endpoint`] through which it should be
//! relayed as a `Router.Route` call. Entries are additive; the first write for a given base URI
//! wins, matching every other concurrent map in this runtime.

use std::collections::HashMap;

use tokio::sync::Mutex;

use wire::Endpoint;

#[derive(Default)]
pub struct RouteTable {
    routes: Mutex<HashMap<String, Endpoint>>,
}

impl RouteTable {
    pub fn new() -> RouteTable {
        RouteTable::default()
    }

    /// Registers `to -> via`. A no-op if `to` already has a route — the first registration wins.
    pub async fn route(&self, to: impl Into<String>, via: Endpoint) {
        let mut routes = self.routes.lock().await;
        routes.entry(to.into()).or_insert(via);
    }

    pub async fn get(&self, base_uri: &str) -> Option<Endpoint> {
        self.routes.lock().await.get(base_uri).cloned()
    }
}
