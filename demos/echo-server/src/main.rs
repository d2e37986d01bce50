use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use echo_service::EchoServiceInvoker;
use runtime::{Config, Runtime};
use transport::PoolConfig;
use wire::{Endpoint, Thumbprint};

#[derive(Parser)]
#[command(name = "echo-server", about = "Demo listener for IEchoService")]
struct Args {
    /// Path to the server's TOML configuration file.
    #[arg(long, default_value = "echo-server.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let log = support::logging::init(&config.logging);

    let identity = config.load_identity()?;
    let invoker = Arc::new(EchoServiceInvoker::new(log.new(support::o!("component" => "invoker"))));

    let pool_config = PoolConfig {
        max_idle_per_endpoint: config.pool.max_idle_per_endpoint,
        max_idle_duration: config.pool.max_idle_duration,
    };

    let runtime = Runtime::new(identity, invoker, pool_config, config.deadlines.clone(), log.clone())?;

    for thumbprint in &config.trust {
        let thumbprint: Thumbprint = thumbprint.parse()?;
        runtime.trust(thumbprint);
    }

    for route in &config.routes {
        let via_thumbprint: Thumbprint = route.via_thumbprint.parse()?;
        runtime.route(route.to.clone(), Endpoint::parse(&route.via, Some(via_thumbprint))?).await;
    }

    if let Some(bind_addr) = config.listen_address {
        let port = runtime.listen(bind_addr).await?;
        support::info!(log, "listening"; "port" => port);
    }

    if let Some(subscription) = &config.poll {
        let endpoint_thumbprint: Thumbprint = subscription.endpoint_thumbprint.parse()?;
        let endpoint = Endpoint::parse(&subscription.endpoint, Some(endpoint_thumbprint))?;
        support::info!(log, "polling"; "subscription" => &subscription.subscription_uri, "endpoint" => &subscription.endpoint);
        runtime.poll(subscription.subscription_uri.clone(), endpoint).await;
    }

    tokio::signal::ctrl_c().await?;
    support::info!(log, "shutting down");
    runtime.dispose().await;

    Ok(())
}
