// SPDX-License-Identifier: MIT

mod logging;
mod opts;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser as _;
use dagbft_consensus::config::PbftConfig;
use dagbft_consensus_core::bincode::CONSENSUS_BINCODE_CONFIG;
use dagbft_consensus_core::keys::ValidatorKeys;
use dagbft_consensus_core::period::Period;
use dagbft_sim::devnet::Devnet;
use dagbft_util_error::WhateverResult;
use opts::{Commands, Opts};
use snafu::{OptionExt as _, ResultExt as _};
use tracing::info;

const LOG_TARGET: &str = "dagbft::cli";

pub struct Dagbft;

#[bon::bon]
impl Dagbft {
    #[builder(finish_fn = run, start_fn = builder)]
    pub async fn build(
        // Base for the devnet config; command line options override timing
        #[builder(default)] config: PbftConfig,
    ) -> WhateverResult<()> {
        logging::init_logging()?;

        let opts = Opts::parse();

        match opts.command {
            Commands::GenKeys => {
                let keys = ValidatorKeys::generate();
                eprintln!("Validator: {}", keys.pubkey());
                eprintln!();
                println!("{}", encode_keys(&keys)?);
                eprintln!();
                eprintln!("These keys are irrecoverable if lost. Please make a back up before using them!");
            }
            Commands::Pubkey { keys_path } => {
                let keys = read_keys(&keys_path).await?;
                println!("{}", keys.pubkey());
            }
            Commands::Devnet {
                validators,
                target_period,
                min_lambda_ms,
                max_lambda_ms,
                dag_block_interval_ms,
                timeout_secs,
                data_dir,
            } => {
                let config = PbftConfig {
                    min_lambda: Duration::from_millis(min_lambda_ms),
                    max_lambda: Duration::from_millis(max_lambda_ms),
                    ..config
                };
                run_devnet(
                    config,
                    validators,
                    target_period,
                    Duration::from_millis(dag_block_interval_ms),
                    Duration::from_secs(timeout_secs),
                    data_dir,
                )
                .await?;
            }
        }

        Ok(())
    }
}

fn encode_keys(keys: &ValidatorKeys) -> WhateverResult<String> {
    let bytes = bincode::encode_to_vec(*keys, CONSENSUS_BINCODE_CONFIG)
        .whatever_context("Failed to encode keys")?;
    Ok(data_encoding::HEXLOWER.encode(&bytes))
}

async fn read_keys(path: &Path) -> WhateverResult<ValidatorKeys> {
    let content = tokio::fs::read_to_string(path)
        .await
        .whatever_context("Failed to read keys file")?;
    let bytes = data_encoding::HEXLOWER_PERMISSIVE
        .decode(content.trim().as_bytes())
        .whatever_context("Keys file is not hex")?;
    let (keys, _) = bincode::decode_from_slice(&bytes, CONSENSUS_BINCODE_CONFIG)
        .whatever_context("Failed to decode keys")?;
    Ok(keys)
}

async fn run_devnet(
    config: PbftConfig,
    validators: usize,
    target_period: u64,
    dag_block_interval: Duration,
    timeout: Duration,
    data_dir: Option<PathBuf>,
) -> WhateverResult<()> {
    if let Some(data_dir) = &data_dir {
        tokio::fs::create_dir_all(data_dir)
            .await
            .whatever_context("Failed to create/open data dir")?;
    }

    let mut devnet = Devnet::builder()
        .num_validators(validators)
        .config(config)
        .maybe_data_dir(data_dir)
        .dag_block_interval(dag_block_interval)
        .build()
        .whatever_context("Failed to set up devnet")?;
    for keys in devnet.keys() {
        info!(target: LOG_TARGET, validator = %keys.pubkey(), "Validator");
    }
    devnet.start_all().whatever_context("Failed to start devnet")?;

    {
        let reached = devnet.wait_for_chain_size(target_period, timeout);
        tokio::pin!(reached);
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                res = &mut reached => {
                    res.whatever_context("Devnet failed")?;
                    break;
                }
                _ = ticker.tick() => {
                    for (idx, status) in devnet.statuses() {
                        info!(
                            target: LOG_TARGET,
                            idx,
                            period = %status.period,
                            round = %status.round,
                            step = %status.step,
                            chain_size = status.chain_size,
                            "Status"
                        );
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(target: LOG_TARGET, "Interrupted");
                    break;
                }
            }
        }
    }

    let handle = devnet
        .handle(0)
        .whatever_context("First validator is not running")?;
    let chain = handle
        .certified_blocks(Period::FIRST, usize::MAX)
        .whatever_context("Failed to read the chain")?;
    for block in chain {
        println!(
            "{} {} anchor={} dag_blocks={} state_root={}",
            block.period(),
            block.block_hash(),
            block.block.anchor_hash,
            block.order.len(),
            block.state_root,
        );
    }

    devnet.stop_all();
    Ok(())
}
