use std::time::Duration;

use assert_matches::assert_matches;

use dagbft_consensus_core::sortition::SortitionParams;

use crate::config::{ConfigError, PbftConfig};
use crate::vote_manager::VoteWindow;

#[test]
fn defaults_are_valid() {
    let config = PbftConfig::default();

    assert_eq!(config.min_lambda, Duration::from_secs(15));
    assert_eq!(config.max_lambda, Duration::from_secs(60));
    assert_eq!(config.polling_interval, Duration::from_millis(100));
    assert_eq!(config.max_steps, 13);
    assert_eq!(config.sortition.committee_size, 1000);
    assert_eq!(config.sortition.number_of_proposers, 20);
    assert_eq!(config.vote_accepting_rounds, 10);
    assert_eq!(config.vote_accepting_steps, 100);
    assert!(config.extra_data_version.is_none());
    config.validate().expect("valid");
}

#[test]
fn invalid_timing_is_rejected() {
    let config = PbftConfig::builder()
        .min_lambda(Duration::from_secs(10))
        .max_lambda(Duration::from_secs(5))
        .build();
    assert_matches!(config.validate(), Err(ConfigError::LambdaRange { .. }));

    let config = PbftConfig::builder()
        .min_lambda(Duration::from_millis(50))
        .polling_interval(Duration::from_millis(50))
        .build();
    assert_matches!(config.validate(), Err(ConfigError::PollingTooLong { .. }));

    let config = PbftConfig::builder().max_steps(3).build();
    assert_matches!(config.validate(), Err(ConfigError::TooFewSteps { max_steps: 3 }));
}

#[test]
fn empty_sortition_targets_are_rejected() {
    let config = PbftConfig::builder()
        .sortition(SortitionParams {
            committee_size: 0,
            number_of_proposers: 20,
        })
        .build();
    assert_matches!(config.validate(), Err(ConfigError::EmptyCommittee));

    let config = PbftConfig::builder()
        .sortition(SortitionParams {
            committee_size: 1000,
            number_of_proposers: 0,
        })
        .build();
    assert_matches!(config.validate(), Err(ConfigError::EmptyProposers));
}

#[test]
fn vote_window_follows_config() {
    let config = PbftConfig::builder()
        .vote_accepting_rounds(3)
        .vote_accepting_steps(0)
        .build();
    assert_eq!(config.vote_window(), VoteWindow { rounds: 3, steps: 0 });
}
