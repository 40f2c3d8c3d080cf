use std::time::Duration;

use dagbft_consensus_core::sortition::SortitionParams;
use snafu::{Snafu, ensure};

use crate::vote_manager::VoteWindow;

/// Immutable consensus configuration, handed to the manager on start
#[derive(Debug, Clone, bon::Builder)]
pub struct PbftConfig {
    /// Base step duration, and the value it resets to every round
    #[builder(default = Duration::from_secs(15))]
    pub min_lambda: Duration,
    /// Cap of the exponential lambda backoff
    #[builder(default = Duration::from_secs(60))]
    pub max_lambda: Duration,
    /// How often polling steps (certify, finish polling) re-check the votes
    #[builder(default = Duration::from_millis(100))]
    pub polling_interval: Duration,
    /// Steps in a round before lambda starts backing off
    #[builder(default = 13)]
    pub max_steps: u64,
    #[builder(default)]
    pub sortition: SortitionParams,
    /// Live votes for rounds this far ahead of ours are dropped; 0 disables
    #[builder(default = 10)]
    pub vote_accepting_rounds: u64,
    /// Live votes for steps this far ahead of ours are dropped; 0 disables
    #[builder(default = 100)]
    pub vote_accepting_steps: u64,
    /// Version blocks must carry in their extra data, if any
    pub extra_data_version: Option<String>,
}

impl Default for PbftConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("min_lambda ({min:?}) must not exceed max_lambda ({max:?})"))]
    LambdaRange { min: Duration, max: Duration },
    #[snafu(display("polling_interval ({polling:?}) must be shorter than min_lambda ({min:?})"))]
    PollingTooLong { polling: Duration, min: Duration },
    #[snafu(display("max_steps must be at least 5, got {max_steps}"))]
    TooFewSteps { max_steps: u64 },
    #[snafu(display("committee_size must be non-zero"))]
    EmptyCommittee,
    #[snafu(display("number_of_proposers must be non-zero"))]
    EmptyProposers,
}

impl PbftConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.min_lambda <= self.max_lambda,
            LambdaRangeSnafu {
                min: self.min_lambda,
                max: self.max_lambda,
            }
        );
        ensure!(
            self.polling_interval < self.min_lambda,
            PollingTooLongSnafu {
                polling: self.polling_interval,
                min: self.min_lambda,
            }
        );
        ensure!(
            5 <= self.max_steps,
            TooFewStepsSnafu {
                max_steps: self.max_steps
            }
        );
        ensure!(0 < self.sortition.committee_size, EmptyCommitteeSnafu);
        ensure!(0 < self.sortition.number_of_proposers, EmptyProposersSnafu);
        Ok(())
    }

    pub fn vote_window(&self) -> VoteWindow {
        VoteWindow {
            rounds: self.vote_accepting_rounds,
            steps: self.vote_accepting_steps,
        }
    }
}

#[cfg(test)]
mod tests;
