//! Command-line configuration.

use clap::Parser;

/// IP allocation controller: reconciles namespace and service IP claims
/// against pools.
#[derive(Parser, Debug, Clone)]
#[command(name = "ip-allocator", version, about)]
pub struct Cli {
    /// Absolute path to the kubeconfig file. Empty means in-cluster
    /// discovery.
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Name of the default pool to bootstrap.
    #[arg(long, default_value = "default")]
    pub pool_name: String,

    /// Comma-separated address ranges for the default pool.
    #[arg(long, value_delimiter = ',', required = true)]
    pub pool_addresses: Vec<String>,

    /// Comma-separated namespaces the default pool ignores. May be passed as
    /// an empty string for "none", but the flag itself must be present.
    #[arg(long, value_delimiter = ',', required = true)]
    pub pool_ignore_namespaces: Vec<String>,

    /// Keep the default pool's fields synced from these flags on every
    /// start.
    #[arg(long, default_value_t = true)]
    pub update: bool,

    /// Bootstrap retry ceiling before treating pool creation as fatal.
    #[arg(long, default_value_t = 10)]
    pub retry: u32,

    /// Worker tasks per controller.
    #[arg(long, default_value_t = 2)]
    pub threads: usize,
}

impl Cli {
    /// Parses argv, filtering the single-empty-string artifact that
    /// `clap`'s comma-delimited parsing leaves behind when a required
    /// list flag is passed an empty value (`--pool-addresses ""`).
    #[must_use]
    pub fn parse_normalized() -> Self {
        let mut cli = Self::parse();
        cli.pool_addresses.retain(|s| !s.is_empty());
        cli.pool_ignore_namespaces.retain(|s| !s.is_empty());
        cli
    }
}
