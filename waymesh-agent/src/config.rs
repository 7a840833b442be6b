use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    Daemon(DaemonArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct DaemonArgs {
    /// Discovery server to subscribe to for workload deltas
    #[arg(long, env = "XDS_ADDRESS", default_value = "http://127.0.0.1:15010")]
    pub xds_address: String,

    /// Directory holding the pinned packet-path maps
    #[arg(long, default_value = "/sys/fs/bpf/waymesh")]
    pub bpf_fs: PathBuf,

    /// Path of the hash-name snapshot
    #[arg(
        long,
        env = "HASH_NAME_SNAPSHOT",
        default_value = "/mnt/workload_hash_name.yaml"
    )]
    pub hash_name_snapshot: PathBuf,

    /// Name of the node the agent is running on
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// Whether this start follows a previous epoch that left live tables
    /// behind
    #[arg(long, value_enum, default_value = "normal")]
    pub start_mode: StartMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StartMode {
    /// Fresh tables, nothing to reconcile.
    Normal,
    /// Tables survived from a previous epoch; stale entries are collected
    /// after the first address batch.
    Restart,
}
