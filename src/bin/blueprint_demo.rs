use std::time::Duration;

use anyhow::Result;
use blueprint_massa_client::{
    ChainConnector, ContractSession, InMemoryChain, SessionConfig, UnknownEventPolicy, logging,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

// Roughly one frame at 60 FPS.
const TICK: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(name = "blueprint-demo", about = "Store, load and remove values in the Blueprint contract")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Network::InMemory, env = "BLUEPRINT_NETWORK")]
    network: Network,

    /// Stop processing contract events at the first one that cannot be decoded.
    #[arg(long)]
    halt_on_unknown_events: bool,

    /// Ticks to keep draining events after the command completed.
    #[arg(long, default_value_t = 60)]
    settle_ticks: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Network {
    InMemory,
    #[cfg(feature = "massa")]
    Massa,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    Store { key: String, value: String },
    Load { key: String },
    Remove { key: String },
    /// Stores, loads and removes a value.
    Walkthrough { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("blueprint_massa_client=info,blueprint_demo=info");

    let cli = Cli::parse();

    let mut config = SessionConfig::from_env()?;
    if cli.halt_on_unknown_events {
        config = config.with_unknown_event_policy(UnknownEventPolicy::Halt);
    }

    match cli.network {
        Network::InMemory => {
            info!("Using the in-memory Blueprint contract");
            let session = ContractSession::new(InMemoryChain::new(), config);
            run(session, cli.command, cli.settle_ticks).await
        }
        #[cfg(feature = "massa")]
        Network::Massa => {
            use blueprint_massa_client::client::massa_transport::{MassaConfig, MassaConnector};

            let massa = MassaConfig::from_env()?;
            info!(url = %massa.grpc_url, "Using the Massa network");
            let session = ContractSession::new(MassaConnector::new(massa), config);
            run(session, cli.command, cli.settle_ticks).await
        }
    }
}

async fn run<C: ChainConnector>(
    session: ContractSession<C>,
    command: Command,
    settle_ticks: u32,
) -> Result<()> {
    session.subscribe_value_changed(|key, value| {
        info!(key, value, "Value changed");
    });
    session.subscribe_value_removed(|key| {
        info!(key, "Value removed");
    });

    let mut ticker = tokio::time::interval(TICK);

    let work = execute(&session, command);
    tokio::pin!(work);
    let outcome = loop {
        tokio::select! {
            result = &mut work => break result,
            _ = ticker.tick() => {
                session.drain();
            }
        }
    };

    for _ in 0..settle_ticks {
        ticker.tick().await;
        session.drain();
    }

    session.dispose();
    outcome
}

async fn execute<C: ChainConnector>(session: &ContractSession<C>, command: Command) -> Result<()> {
    match command {
        Command::Store { key, value } => store(session, &key, &value).await,
        Command::Load { key } => load(session, &key).await,
        Command::Remove { key } => remove(session, &key).await,
        Command::Walkthrough { key, value } => {
            store(session, &key, &value).await?;
            load(session, &key).await?;
            remove(session, &key).await?;
            load(session, &key).await
        }
    }
}

async fn store<C: ChainConnector>(session: &ContractSession<C>, key: &str, value: &str) -> Result<()> {
    println!("Storing...");
    session.store(key, value).await?;
    println!("Stored!");
    Ok(())
}

async fn load<C: ChainConnector>(session: &ContractSession<C>, key: &str) -> Result<()> {
    println!("Loading...");
    let value = session.load(key).await?;
    println!("Value of '{}' is '{}'", key, value);
    Ok(())
}

async fn remove<C: ChainConnector>(session: &ContractSession<C>, key: &str) -> Result<()> {
    println!("Removing...");
    session.remove(key).await?;
    println!("Removed!");
    Ok(())
}
