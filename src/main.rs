use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use log::info;

use hostcache::cache::HostCache;
use hostcache::cli::{Args, Commands};
use hostcache::config::CacheConfig;
use hostcache::k8s::K8sClient;
use hostcache::plugin::k8s::K8sPlugin;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            config_file,
            cache_config,
            lease_ttl,
            hold_ttl,
            sweep_interval,
            max_match_hosts,
        } => {
            run_daemon(
                config_file,
                cache_config,
                lease_ttl,
                hold_ttl,
                sweep_interval,
                max_match_hosts,
            )
            .await?;
        }
    }

    Ok(())
}

fn build_config(
    cache_config: Option<String>,
    lease_ttl: Option<u64>,
    hold_ttl: Option<u64>,
    sweep_interval: Option<u64>,
    max_match_hosts: Option<usize>,
) -> Result<CacheConfig> {
    let mut config = match cache_config {
        Some(path) => CacheConfig::load(&path)?,
        None => CacheConfig::default(),
    };
    if let Some(secs) = lease_ttl {
        config.lease_ttl_secs = secs;
    }
    if let Some(secs) = hold_ttl {
        config.hold_ttl_secs = secs;
    }
    if let Some(secs) = sweep_interval {
        config.hold_sweep_interval_secs = secs;
    }
    if let Some(cap) = max_match_hosts {
        config.max_match_hosts = Some(cap);
    }
    Ok(config)
}

async fn run_daemon(
    config_file: Option<String>,
    cache_config: Option<String>,
    lease_ttl: Option<u64>,
    hold_ttl: Option<u64>,
    sweep_interval: Option<u64>,
    max_match_hosts: Option<usize>,
) -> Result<()> {
    println!("{}", "🗂  Hostcache - Cluster Placement Cache".bright_cyan().bold());
    println!("{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_cyan());

    let config = build_config(
        cache_config,
        lease_ttl,
        hold_ttl,
        sweep_interval,
        max_match_hosts,
    )?;

    println!("📋 {}", "Configuration:".bright_yellow().bold());
    println!("   Lease TTL: {}", format!("{}s", config.lease_ttl_secs).bright_green());
    println!("   Hold TTL: {}", format!("{}s", config.hold_ttl_secs).bright_green());
    println!(
        "   Hold sweep interval: {}",
        format!("{}s", config.hold_sweep_interval_secs).bright_green()
    );
    println!();

    print!("🔗 Connecting to cluster... ");
    let client = match K8sClient::new(config_file.as_deref()).await {
        Ok(client) => {
            println!("{}", "✅ Success".bright_green());
            client
        }
        Err(e) => {
            println!("{}", "❌ Failed".bright_red());
            eprintln!("Error: {}", e);
            return Err(e);
        }
    };
    if let Ok(Some(version)) = client.server_version().await {
        info!(
            "connected to cluster {} ({})",
            client.cluster_name().unwrap_or("unknown"),
            version
        );
    }

    let plugin = K8sPlugin::new(client, config.default_disk_mb_per_host);
    let sweep_interval = config.hold_sweep_interval();
    let cache = HostCache::new(config);
    cache
        .start(Box::new(plugin))
        .map_err(|e| anyhow::anyhow!("start cache: {}", e))?;
    println!("{}", "🚀 Cache running; press Ctrl-C to stop.".bright_green());

    // Sweep expired holds until shutdown.
    let mut sweeper = tokio::time::interval(sweep_interval);
    sweeper.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = sweeper.tick() => {
                let freed = cache.reset_expired_held_host_summaries(chrono::Utc::now());
                if !freed.is_empty() {
                    info!("hold sweep freed {} host(s): {:?}", freed.len(), freed);
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    eprintln!("Error waiting for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    println!("{}", "🛑 Stopping...".bright_yellow());
    cache.stop().await;
    println!("{}", "👋 Stopped cleanly.".bright_green());
    Ok(())
}
