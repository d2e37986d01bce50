//! The runtime dispatcher: `Runtime` ties the wire data model, the exchange protocol, and the
//! TLS transport together behind the `Listen`/`Trust`/`Poll`/`Route`/`CreateClient`/`Discover`
//! API surface, plus the ambient configuration and error types the demo binaries build on.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod proxy;
pub mod routes;
pub mod trust;

pub use config::Config;
pub use dispatcher::{Runtime, ServiceInvoker};
pub use error::{ClientError, ConfigError};
pub use routes::RouteTable;
pub use trust::TrustSet;
