mod cli;

use clap::Parser;
use cli::{Cli, Commands, FetchArgs};
use rand::seq::SliceRandom;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relaybox::archive::METADATA_FILE;
use relaybox::client::{ClientError, RelayClient, Retrieval};
use relaybox::config::Config;
use relaybox::results::ResultStore;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Serve(args) => {
            let address = args.address.unwrap_or(config.server.bind_addr);
            relaybox::api::run(config, address).await?
        }
        Commands::Fetch(args) => fetch(config, args).await?,
        Commands::Prune => {
            let stats = ResultStore::new(&config.relay)
                .prune(config.retention.job_ttl())
                .await?;
            info!(pruned = stats.pruned, failed = stats.failed, "Prune finished");
        }
    }

    Ok(())
}

async fn fetch(config: Config, args: FetchArgs) -> Result<(), AnyError> {
    if !args.path.is_dir() {
        return Err(format!("{} is not an existing directory", args.path.display()).into());
    }

    let user_agent = match args.user_agent {
        Some(user_agent) => user_agent,
        None => config
            .client
            .user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or("client.user_agents is empty")?,
    };
    let relay = args.relay.unwrap_or(config.client.relay_url);

    let outcome = async {
        let client = RelayClient::connect(&relay, args.mode).await?;
        client
            .request_resource(&args.path, args.uri.as_str(), Some(&user_agent))
            .await
    }
    .await;

    match outcome {
        Ok(Retrieval::Fetched(dir)) => {
            info!(url = %args.uri, path = %dir.display(), "Fetch complete");
            if args.verbose {
                let raw = tokio::fs::read(dir.join(METADATA_FILE)).await?;
                let metadata: serde_json::Value = serde_json::from_slice(&raw)?;
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            }
            Ok(())
        }
        Ok(Retrieval::AlreadyFetched(dir)) => {
            warn!(url = %args.uri, path = %dir.display(), "Already fetched, keeping the existing copy");
            Ok(())
        }
        Err(ClientError::RelayUnavailable(reason)) => {
            error!(%relay, %reason, "Relay degraded");
            Err(ClientError::RelayUnavailable(reason).into())
        }
        Err(err) => Err(err.into()),
    }
}
