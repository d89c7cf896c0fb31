//! CLI command implementations.

use crate::AppContext;
use std::path::Path;
use tilepay_rpc::NodeRpc;
use tilepay_types::amount::{format_coin, parse_coin_amount};
use tilepay_wallet::{ChainSynchronizer, SyncEvent, WalletError, WalletService};

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn open_service(ctx: &AppContext) -> std::result::Result<WalletService, Box<dyn std::error::Error>> {
    let config = ctx.config();
    ensure_parent_dir(&config.db_path)?;
    if let Some(cache) = &config.cache_path {
        ensure_parent_dir(cache)?;
    }
    Ok(WalletService::open(config).map_err(describe)?)
}

fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

/// Wallet error with its machine-readable reason appended.
fn describe(e: WalletError) -> Box<dyn std::error::Error> {
    format!("{} [{}]", e, e.reason()).into()
}

fn warn_ephemeral_sessions(ctx: &AppContext) {
    if ctx.config().cache_path.is_none() {
        eprintln!("Note: no --cache-db configured; session seeds last only for this run.");
    }
}

// ─── Background ─────────────────────────────────────────────────────────────

pub async fn monitor(ctx: &AppContext) -> Result {
    let config = ctx.config();
    let service = open_service(ctx)?;

    let best = service.node().best_height().await?;
    println!("Connected to node at {} (height: {})", config.node.url, best);
    match service.ledger().processed_height()? {
        Some(height) => println!("Ledger at height {}.", height),
        None => println!("Ledger is empty; starting at height {}.", config.start_height),
    }
    println!("Monitoring. Press Ctrl+C to stop.");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                log::warn!("cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    service.monitor(config).run(shutdown_rx).await.map_err(describe)?;

    if let Some(height) = service.ledger().processed_height()? {
        println!("Stopped at height {}.", height);
    }
    Ok(())
}

pub async fn sync(ctx: &AppContext) -> Result {
    let config = ctx.config();
    let service = open_service(ctx)?;
    let synchronizer = ChainSynchronizer::new(
        service.node().clone(),
        service.ledger().clone(),
        config.sync_interval(),
    )
    .with_start_height(config.start_height);

    let (tx, rx) = tokio::sync::mpsc::channel(32);

    let progress_task = tokio::spawn(async move {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            match event {
                SyncEvent::Started {
                    from_height,
                    target_height,
                } => {
                    println!("Syncing from height {} to {} ...", from_height, target_height);
                }
                SyncEvent::Height {
                    height,
                    target_height,
                    credited,
                    spent,
                } => {
                    let pct = if target_height > 0 {
                        (height as f64 / target_height as f64 * 100.0) as u32
                    } else {
                        100
                    };
                    print!(
                        "\rHeight {}/{} ({}%): {} credited, {} spent",
                        height, target_height, pct, credited, spent
                    );
                }
                SyncEvent::Complete { height } => {
                    println!("\nSync complete at height {}.", height);
                }
            }
        }
    });

    let result = synchronizer.sync_once(Some(&tx)).await;
    drop(tx);
    let _ = progress_task.await;

    match result.map_err(describe)? {
        Some(height) => println!("Ledger synchronized at height {}.", height),
        None => println!("Nothing to sync yet."),
    }
    println!("Unspent outputs tracked: {}", service.ledger().db().unspent_count()?);
    Ok(())
}

// ─── Session operations ─────────────────────────────────────────────────────

pub async fn show_addresses(ctx: &AppContext, session: &str, count: u32) -> Result {
    warn_ephemeral_sessions(ctx);
    let service = open_service(ctx)?;
    let mut wallet = service.session(session);
    let addresses = wallet.make_addresses(count).map_err(describe)?;

    println!("Session {}:", session);
    for (i, address) in addresses.iter().enumerate() {
        println!("  [{}] {}", i, address);
    }
    Ok(())
}

pub async fn show_balances(ctx: &AppContext, session: &str, count: u32) -> Result {
    warn_ephemeral_sessions(ctx);
    let service = open_service(ctx)?;
    let mut wallet = service.session(session);
    let addresses = wallet.make_addresses(count).map_err(describe)?;
    let balances = wallet.get_address_balances(count).map_err(describe)?;

    println!("Session {}:", session);
    let mut total = tilepay_types::Amount::ZERO;
    for (i, (address, balance)) in addresses.iter().zip(&balances).enumerate() {
        println!("  [{}] {}  {}", i, address, format_coin(*balance));
        total += *balance;
    }
    println!("  Total: {}", format_coin(total));
    Ok(())
}

pub async fn show_balance(ctx: &AppContext, address: &str) -> Result {
    let service = open_service(ctx)?;
    let balance = service.get_balance_for_address(address).map_err(describe)?;
    println!("{}: {}", address, format_coin(balance));
    Ok(())
}

pub async fn purchase(
    ctx: &AppContext,
    session: &str,
    from: &str,
    to: &str,
    amount: &str,
    count: u32,
) -> Result {
    warn_ephemeral_sessions(ctx);
    let amount = parse_coin_amount(amount)?;
    let service = open_service(ctx)?;

    let mut wallet = service.session(session);
    wallet.make_addresses(count).map_err(describe)?;

    println!(
        "Paying {} (fee {}) from {} to {} ...",
        format_coin(amount),
        format_coin(service.fee()),
        from,
        to
    );
    let txid = wallet.perform_purchase(from, amount, to).await.map_err(describe)?;
    println!("Broadcast: {}", txid);
    Ok(())
}

// ─── Diagnostics ────────────────────────────────────────────────────────────

pub async fn show_status(ctx: &AppContext) -> Result {
    let config = ctx.config();
    let service = open_service(ctx)?;

    println!("Connecting to {} ...", config.node.url);
    let best = service.node().best_height().await?;
    let mempool = service.node().raw_mempool().await?;

    let ledger = service.ledger();
    println!("Node status:");
    println!("  Network:          {}", config.network);
    println!("  Height:           {}", best);
    println!("  Mempool size:     {}", mempool.len());
    println!();
    println!("Ledger status:");
    match ledger.processed_height()? {
        Some(height) => println!("  Synced height:    {} ({} behind)", height, best.saturating_sub(height)),
        None => println!("  Synced height:    none"),
    }
    println!("  Unspent outputs:  {}", ledger.db().unspent_count()?);
    println!("  Known addresses:  {}", ledger.known_address_count()?);
    println!("  Purchase fee:     {}", format_coin(service.fee()));
    Ok(())
}

pub fn show_config(ctx: &AppContext) -> Result {
    let mut config = ctx.config().clone();
    if config.node.password.is_some() {
        config.node.password = Some("********".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
