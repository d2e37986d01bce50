use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use echo_service::{EchoServiceInvoker, IEchoService};
use runtime::{Config, Runtime};
use transport::PoolConfig;
use wire::{Endpoint, Thumbprint};

#[derive(Parser)]
#[command(name = "echo-client", about = "Demo driver for IEchoService end-to-end scenarios")]
struct Args {
    /// Path to this client's TOML configuration file (identity + logging).
    #[arg(long, default_value = "echo-client.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Calls IEchoService.say_hello over https.
    SayHello {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        thumbprint: String,
        #[arg(long, default_value = "Paul")]
        name: String,
    },
    /// Calls IEchoService.crash over https and shows the remote error rendering.
    Crash {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        thumbprint: String,
    },
    /// Listens for an inbound polling peer and calls say_hello over `poll://<subscription>`.
    ServePoll {
        #[arg(long)]
        bind: SocketAddr,
        #[arg(long)]
        subscription: String,
        /// Thumbprint of the polling peer allowed to connect (omit to trust nobody).
        #[arg(long)]
        trust: Option<String>,
        #[arg(long, default_value = "Paul")]
        name: String,
    },
    /// Reads a remote's certificate thumbprint without exchanging any envelopes.
    Discover {
        #[arg(long)]
        uri: String,
    },
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

    match args.command {
        Command::SayHello { endpoint, thumbprint, name } => {
            let endpoint = Endpoint::parse(&endpoint, Some(thumbprint.parse::<Thumbprint>()?))?;
            let client = IEchoService::new(&runtime, endpoint);
            match client.say_hello(name).await {
                Ok(reply) => println!("{reply}"),
                Err(err) => eprintln!("call failed: {err}"),
            }
        }
        Command::Crash { endpoint, thumbprint } => {
            let endpoint = Endpoint::parse(&endpoint, Some(thumbprint.parse::<Thumbprint>()?))?;
            let client = IEchoService::new(&runtime, endpoint);
            match client.crash().await {
                Ok(()) => println!("crash() returned successfully (unexpected)"),
                Err(err) => println!("call failed as expected: {err}"),
            }
        }
        Command::ServePoll { bind, subscription, trust, name } => {
            if let Some(thumbprint) = trust {
                runtime.trust(thumbprint.parse::<Thumbprint>()?);
            }
            let port = runtime.listen(bind).await?;
            support::info!(log, "listening for polling peers"; "port" => port, "subscription" => &subscription);

            let destination = Endpoint::poll(subscription.clone());
            let client = IEchoService::new(&runtime, destination);
            match client.say_hello(name).await {
                Ok(reply) => println!("{reply}"),
                Err(err) => println!("call failed: {err}"),
            }

            runtime.dispose().await;
        }
        Command::Discover { uri } => {
            let endpoint = runtime.discover(&uri).await?;
            println!("{}", endpoint.thumbprint().expect("discovery always yields a thumbprint"));
        }
    }

    Ok(())
}
