use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use url::Url;

use relaybox::jobs::FetchMode;

#[derive(Parser, Debug)]
#[command(name = "relaybox")]
#[command(about = "Fetch URLs through a remote relay", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $RELAYBOX_CONFIG or config/relaybox.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay HTTP server
    Serve(ServeArgs),
    /// Fetch a URL through a relay into a local directory
    Fetch(FetchArgs),
    /// Remove stored jobs older than the retention TTL
    Prune,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// Absolute http(s) URL to fetch
    #[arg(value_parser = parse_target_url)]
    pub uri: Url,

    /// Existing directory receiving the result directory
    #[arg(long, short = 'p', default_value = ".")]
    pub path: PathBuf,

    /// Disguise string; picked at random from client.user_agents when absent
    #[arg(long, short = 'u')]
    pub user_agent: Option<String>,

    #[arg(long, short = 'm', value_enum, default_value_t = FetchMode::Basic)]
    pub mode: FetchMode,

    /// Relay base URL (overrides client.relay_url)
    #[arg(long)]
    pub relay: Option<String>,

    /// Print the fetched metadata.json
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

fn parse_target_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("not an absolute URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err("URL must be http(s) with a host".to_string());
    }
    Ok(url)
}
