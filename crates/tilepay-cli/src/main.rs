use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tilepay_wallet::ServiceConfig;

mod commands;

/// tilepay wallet service command-line interface.
#[derive(Parser)]
#[command(name = "tilepay")]
#[command(about = "Session-scoped payment wallet backed by a bitcoind/btcd node")]
#[command(version)]
struct Cli {
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node RPC URL.
    #[arg(long)]
    node_url: Option<String>,

    /// Node RPC username.
    #[arg(long)]
    rpc_user: Option<String>,

    /// Node RPC password.
    #[arg(long)]
    rpc_password: Option<String>,

    /// PEM certificate of the node's RPC server.
    #[arg(long)]
    rpc_cert: Option<String>,

    /// Network (bitcoin, testnet, signet, regtest).
    #[arg(long)]
    network: Option<String>,

    /// Ledger database path.
    #[arg(long)]
    db: Option<String>,

    /// Shared cache database path (omit for an in-process cache).
    #[arg(long)]
    cache_db: Option<String>,

    /// Fixed fee per purchase, in satoshis.
    #[arg(long)]
    fee: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the ledger in sync with the chain and mempool until Ctrl+C.
    Monitor,

    /// Run one chain sync pass with progress output.
    Sync,

    /// Derive a session's addresses.
    Addresses {
        /// Session identifier.
        #[arg(long)]
        session: String,

        /// Number of addresses.
        #[arg(long, default_value = "4")]
        count: u32,
    },

    /// Show the balances of a session's addresses.
    Balances {
        /// Session identifier.
        #[arg(long)]
        session: String,

        /// Number of addresses.
        #[arg(long, default_value = "4")]
        count: u32,
    },

    /// Show the spendable balance of any address.
    Balance {
        /// Address to look up.
        address: String,
    },

    /// Pay from a session address to a destination.
    Purchase {
        /// Session identifier.
        #[arg(long)]
        session: String,

        /// Session address to spend from.
        #[arg(long)]
        from: String,

        /// Destination address.
        #[arg(long)]
        to: String,

        /// Amount in coins, fee included (e.g., "0.5").
        #[arg(long)]
        amount: String,

        /// Number of session addresses to derive before spending.
        #[arg(long, default_value = "4")]
        count: u32,
    },

    /// Show node and ledger status.
    Status,

    /// Print the effective configuration as JSON.
    ShowConfig,
}

/// Application context shared across commands.
pub struct AppContext {
    config: ServiceConfig,
}

impl AppContext {
    fn from_cli(cli: &Cli) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = match &cli.config {
            Some(path) => ServiceConfig::load(path)?,
            None => {
                let mut config = ServiceConfig::default();
                config.db_path = default_data_dir(cli.network.as_deref().unwrap_or(&config.network))
                    .join("tilepay.db")
                    .to_string_lossy()
                    .into_owned();
                config
            }
        };

        if let Some(url) = &cli.node_url {
            config.node.url = url.clone();
        }
        if let Some(user) = &cli.rpc_user {
            config.node.username = Some(user.clone());
        }
        if let Some(password) = &cli.rpc_password {
            config.node.password = Some(password.clone());
        }
        if let Some(cert) = &cli.rpc_cert {
            config.node.cert_path = Some(cert.clone());
        }
        if let Some(network) = &cli.network {
            config.network = network.clone();
        }
        if let Some(db) = &cli.db {
            config.db_path = db.clone();
        }
        if let Some(cache) = &cli.cache_db {
            config.cache_path = Some(cache.clone());
        }
        if let Some(fee) = cli.fee {
            config.fee_sats = fee;
        }

        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

fn default_data_dir(network: &str) -> PathBuf {
    let base = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilepay");
    match network {
        "bitcoin" | "mainnet" | "main" => base,
        other => base.join(other),
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let ctx = match AppContext::from_cli(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Monitor => commands::monitor(&ctx).await,
        Commands::Sync => commands::sync(&ctx).await,
        Commands::Addresses { session, count } => {
            commands::show_addresses(&ctx, &session, count).await
        }
        Commands::Balances { session, count } => {
            commands::show_balances(&ctx, &session, count).await
        }
        Commands::Balance { address } => commands::show_balance(&ctx, &address).await,
        Commands::Purchase {
            session,
            from,
            to,
            amount,
            count,
        } => commands::purchase(&ctx, &session, &from, &to, &amount, count).await,
        Commands::Status => commands::show_status(&ctx).await,
        Commands::ShowConfig => commands::show_config(&ctx),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
