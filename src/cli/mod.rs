use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "In-memory host cache for cluster workload placement", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the host cache daemon against a Kubernetes cluster
    Run {
        /// Kubernetes config file path
        #[arg(short, long)]
        config_file: Option<String>,

        /// Cache configuration YAML; flags below override file values
        #[arg(long = "cache-config", value_name = "PATH")]
        cache_config: Option<String>,

        /// Lease TTL in seconds (default 120)
        #[arg(long = "lease-ttl", value_name = "SECS")]
        lease_ttl: Option<u64>,

        /// Hold TTL in seconds (default 300)
        #[arg(long = "hold-ttl", value_name = "SECS")]
        hold_ttl: Option<u64>,

        /// Interval between expired-hold sweeps in seconds (default 30)
        #[arg(long = "sweep-interval", value_name = "SECS")]
        sweep_interval: Option<u64>,

        /// Default per-query host cap; unbounded when unset
        #[arg(long = "max-match-hosts", value_name = "N")]
        max_match_hosts: Option<usize>,
    },
}
