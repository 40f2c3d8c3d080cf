use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
pub(crate) struct Opts {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Generate a validator identity and print it (hex) to stdout
    GenKeys,
    /// Print the public key of a validator identity file
    Pubkey {
        #[arg(long, env = "DAGBFT_KEYS_PATH")]
        keys_path: PathBuf,
    },
    /// Run validators in this process until they finalize `target_period`
    Devnet {
        #[arg(long, env = "DAGBFT_VALIDATORS", default_value = "4")]
        validators: usize,

        #[arg(long, env = "DAGBFT_TARGET_PERIOD", default_value = "10")]
        target_period: u64,

        #[arg(long, env = "DAGBFT_MIN_LAMBDA_MS", default_value = "200")]
        min_lambda_ms: u64,

        #[arg(long, env = "DAGBFT_MAX_LAMBDA_MS", default_value = "5000")]
        max_lambda_ms: u64,

        #[arg(long, env = "DAGBFT_DAG_BLOCK_INTERVAL_MS", default_value = "100")]
        dag_block_interval_ms: u64,

        #[arg(long, env = "DAGBFT_TIMEOUT_SECS", default_value = "600")]
        timeout_secs: u64,

        /// Keep node databases here instead of in memory
        #[arg(long, env = "DAGBFT_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
}
