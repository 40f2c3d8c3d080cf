use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dagbft_consensus_core::block::{BlockHash, CertifiedBlock, DagBlockHash};
use dagbft_consensus_core::keys::ValidatorKeys;
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_consensus_core::vote::SignedVote;
use dagbft_db::error::DbResult;
use dagbft_util_error::fmt::FmtCompact as _;
use tracing::{debug, info, trace, warn};

use super::{ConsensusResult, Event, PbftState, Shared};
use crate::LOG_TARGET;
use crate::storage::RoundState;
use crate::vote_manager::VotedKind;

/// Step and state to resume in, after restarting in `round` at `step`
///
/// Only a fresh round starts over with a proposal. Anywhere else, re-running
/// the early steps could mean voting differently than before the restart,
/// so we go straight to finishing.
pub(super) fn resume_step(round: Round, step: Step) -> (Step, PbftState) {
    if round == Round::FIRST && step == Step::PROPOSE {
        (Step::PROPOSE, PbftState::ValueProposal)
    } else if step < Step::FIRST_FINISH {
        (Step::FIRST_FINISH, PbftState::Finish)
    } else if step.is_finish() {
        (step, PbftState::Finish)
    } else {
        (step, PbftState::FinishPolling)
    }
}

/// Lambda to use after entering `step`
///
/// Past `max_steps` lambda doubles on every finish polling step (up to
/// `max`), unless the network is already far ahead of us, in which case it
/// goes back to `min` so we catch up quickly.
pub(super) fn backoff_lambda(
    lambda: Duration,
    min: Duration,
    max: Duration,
    step: Step,
    max_steps: u64,
    network_step: Option<Step>,
) -> Duration {
    let step_num = step.to_number();
    if step_num <= max_steps || step_num % 2 == 0 {
        return lambda;
    }

    if let Some(network_step) = network_step {
        if step < network_step && max_steps.saturating_sub(4) <= network_step.to_number() - step_num {
            return min;
        }
    }
    if lambda < max {
        return (lambda * 2).min(max);
    }
    lambda
}

/// Consensus state owned by the manager thread
pub(super) struct ConsensusState {
    pub shared: Arc<Shared>,
    pub keys: Option<ValidatorKeys>,
    events_rx: crossbeam_channel::Receiver<Event>,
    stop_rx: crossbeam_channel::Receiver<()>,

    pub period: Period,
    pub round: Round,
    pub step: Step,
    pub state: PbftState,
    pub lambda: Duration,

    pub round_start: Instant,
    pub second_finish_start: Instant,
    /// When the next step is due, relative to `round_start`
    pub next_step_time: Duration,

    pub cert_voted_block: Option<BlockHash>,
    pub next_voted_soft_value: bool,
    pub next_voted_null: bool,
    /// Own votes of the current round, to rebroadcast
    pub own_votes: Vec<SignedVote>,

    last_rebroadcast: Instant,
    rebroadcast_interval: Duration,

    /// DAG orders of blocks already validated, by block hash
    pub order_cache: HashMap<BlockHash, (DagBlockHash, Vec<DagBlockHash>)>,
    /// Certified blocks received for periods ahead of us
    pub synced: BTreeMap<Period, CertifiedBlock>,
}

enum Wake {
    Timeout,
    Event,
    Stop,
}

impl ConsensusState {
    pub fn restore(
        shared: Arc<Shared>,
        keys: Option<ValidatorKeys>,
        events_rx: crossbeam_channel::Receiver<Event>,
        stop_rx: crossbeam_channel::Receiver<()>,
    ) -> DbResult<Self> {
        let period = shared.chain.current_period();
        let vm = &shared.vote_manager;
        vm.set_current_period(period);

        // Ledger of the current and previous period; these were all
        // validated before being stored
        let prev_period = period.prev().unwrap_or(Period::ZERO);
        let votes = shared.storage.load_votes(prev_period)?;
        let own_pubkey = keys.map(|k| k.pubkey());
        for vote in &votes {
            vm.add_verified_vote(*vote);
        }

        if let Some(head) = shared.chain.head() {
            for vote in &head.cert_votes {
                vm.add_verified_vote(*vote);
            }
            if let Some(first) = head.cert_votes.first() {
                vm.reset_reward_votes(first.period, first.round, first.step, head.block_hash());
            }
        }

        for block in shared.storage.load_proposed_blocks()? {
            if period <= block.period {
                shared.proposed.push(block);
            }
        }

        let now = Instant::now();
        let min_lambda = shared.config.min_lambda;
        let mut state = Self {
            shared: shared.clone(),
            keys,
            events_rx,
            stop_rx,
            period,
            round: Round::FIRST,
            step: Step::PROPOSE,
            state: PbftState::ValueProposal,
            lambda: min_lambda,
            round_start: now,
            second_finish_start: now,
            next_step_time: Duration::ZERO,
            cert_voted_block: None,
            next_voted_soft_value: false,
            next_voted_null: false,
            own_votes: vec![],
            last_rebroadcast: now,
            rebroadcast_interval: min_lambda,
            order_cache: HashMap::new(),
            synced: BTreeMap::new(),
        };

        match shared.storage.load_round_state()? {
            Some(saved) if saved.period == period => {
                let (step, pbft_state) = resume_step(saved.round, saved.step);
                state.round = saved.round;
                state.step = step;
                state.state = pbft_state;
                state.cert_voted_block = saved.cert_voted_block;
                state.next_voted_soft_value = saved.next_voted_soft_value;
                state.next_voted_null = saved.next_voted_null;
                state.own_votes = votes
                    .iter()
                    .filter(|v| {
                        Some(v.voter) == own_pubkey && v.period == period && v.round == saved.round
                    })
                    .copied()
                    .collect();
                info!(
                    target: LOG_TARGET,
                    %period,
                    round = %state.round,
                    step = %state.step,
                    state = %state.state,
                    "Resuming consensus"
                );
            }
            _ => {
                state.persist_round_state()?;
            }
        }
        state.publish_status();
        Ok(state)
    }

    pub fn run(mut self) -> ConsensusResult<()> {
        loop {
            if self.stop_requested() {
                break;
            }
            self.drain_events();

            if self.state_operations()? {
                continue;
            }

            if !self.is_eligible() {
                let polling = self.shared.config.polling_interval;
                if let Wake::Stop = self.wait_until(Instant::now() + polling) {
                    break;
                }
                continue;
            }

            let due = self.round_start + self.next_step_time;
            if Instant::now() < due {
                if let Wake::Stop = self.wait_until(due) {
                    break;
                }
                continue;
            }

            self.run_step()?;
        }
        info!(target: LOG_TARGET, period = %self.period, "Consensus stopped");
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        matches!(
            self.stop_rx.try_recv(),
            Ok(()) | Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    fn wait_until(&mut self, deadline: Instant) -> Wake {
        let timeout = deadline.saturating_duration_since(Instant::now());
        let (stop_rx, events_rx) = (self.stop_rx.clone(), self.events_rx.clone());
        crossbeam_channel::select! {
            recv(stop_rx) -> _ => Wake::Stop,
            recv(events_rx) -> event => {
                if let Ok(event) = event {
                    self.on_event(event);
                }
                Wake::Event
            },
            default(timeout) => Wake::Timeout,
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.on_event(event);
        }
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::NewVote => {}
            Event::SyncedPeriod(block) => {
                let period = block.period();
                if self.period <= period {
                    self.synced.entry(period).or_insert(*block);
                }
            }
        }
    }

    /// Things done every iteration, regardless of the step
    ///
    /// Returns `true` if the period or round changed.
    fn state_operations(&mut self) -> ConsensusResult<bool> {
        if self.process_synced()? {
            return Ok(true);
        }

        self.rebroadcast();

        if self.try_push_cert_votes_block()? {
            return Ok(true);
        }

        self.try_advance_round()
    }

    pub fn is_eligible(&self) -> bool {
        let Some(keys) = self.keys else {
            return false;
        };
        self.shared
            .dpos
            .stake_of(keys.pubkey(), self.period)
            .is_ok_and(|stake| !stake.is_zero())
    }

    fn run_step(&mut self) -> ConsensusResult<()> {
        let polling = self.shared.config.polling_interval;
        match self.state {
            PbftState::ValueProposal => {
                self.propose_block()?;
                self.set_state(PbftState::Filter, Step::FILTER)?;
                self.next_step_time = 2 * self.lambda;
            }
            PbftState::Filter => {
                self.identify_block()?;
                self.set_state(PbftState::Certify, Step::CERTIFY)?;
                self.next_step_time = 2 * self.lambda;
            }
            PbftState::Certify => {
                let go_finish = (4 * self.lambda).saturating_sub(polling) < self.elapsed_in_round();
                if go_finish {
                    self.set_state(PbftState::Finish, Step::FIRST_FINISH)?;
                    self.next_step_time = 4 * self.lambda;
                } else {
                    self.certify_block()?;
                    self.next_step_time += polling;
                }
            }
            PbftState::Finish => {
                self.first_finish()?;
                self.next_voted_soft_value = false;
                self.next_voted_null = false;
                self.second_finish_start = Instant::now();
                self.set_state(PbftState::FinishPolling, self.step.saturating_add(1))?;
                self.next_step_time += polling;
            }
            PbftState::FinishPolling => {
                self.second_finish()?;
                let loop_back = 2 * self.lambda.saturating_sub(polling)
                    < self.second_finish_start.elapsed();
                if loop_back {
                    self.next_voted_soft_value = false;
                    self.next_voted_null = false;
                    self.set_state(PbftState::Finish, self.step.saturating_add(1))?;
                }
                self.next_step_time += polling;
            }
        }
        Ok(())
    }

    pub fn elapsed_in_round(&self) -> Duration {
        self.round_start.elapsed()
    }

    fn set_state(&mut self, state: PbftState, step: Step) -> DbResult<()> {
        self.state = state;
        self.set_step(step);
        trace!(
            target: LOG_TARGET,
            period = %self.period,
            round = %self.round,
            step = %self.step,
            state = %self.state,
            "Step"
        );
        self.persist_round_state()?;
        self.publish_status();
        Ok(())
    }

    fn set_step(&mut self, step: Step) {
        self.step = step;
        let config = &self.shared.config;
        let network_step = self
            .shared
            .vote_manager
            .network_t_plus_one_next_voting_step(self.period, self.round);
        let lambda = backoff_lambda(
            self.lambda,
            config.min_lambda,
            config.max_lambda,
            step,
            config.max_steps,
            network_step,
        );
        if lambda != self.lambda {
            debug!(
                target: LOG_TARGET,
                %step,
                prev = ?self.lambda,
                lambda = ?lambda,
                "Lambda changed"
            );
            self.lambda = lambda;
        }
    }

    /// Start `round` of the current period from scratch
    pub fn reset_round(&mut self, round: Round) -> DbResult<()> {
        let now = Instant::now();
        self.round = round;
        self.step = Step::PROPOSE;
        self.state = PbftState::ValueProposal;
        self.lambda = self.shared.config.min_lambda;
        self.round_start = now;
        self.second_finish_start = now;
        self.next_step_time = Duration::ZERO;
        self.cert_voted_block = None;
        self.next_voted_soft_value = false;
        self.next_voted_null = false;
        self.own_votes.clear();
        self.last_rebroadcast = now;
        self.rebroadcast_interval = self.shared.config.min_lambda;

        self.persist_round_state()?;
        self.publish_status();
        Ok(())
    }

    /// Move on to the period after the chain head
    pub fn advance_period(&mut self) -> DbResult<()> {
        let shared = self.shared.clone();
        let chain_size = shared.chain.size();
        self.period = shared.chain.current_period();
        shared.vote_manager.set_current_period(self.period);
        self.order_cache.clear();
        self.synced = self.synced.split_off(&self.period);

        // Votes of the previous period stay around for reward votes and
        // for late peers
        shared
            .vote_manager
            .cleanup_votes_by_period(Period::new(chain_size));
        shared.proposed.cleanup(self.period);
        shared.storage.prune_below(Period::new(chain_size))?;

        info!(target: LOG_TARGET, period = %self.period, "New period");
        self.reset_round(Round::FIRST)
    }

    fn try_advance_round(&mut self) -> ConsensusResult<bool> {
        let Some(new_round) = self
            .shared
            .vote_manager
            .determine_new_round(self.period, self.round)
        else {
            return Ok(false);
        };
        if new_round <= self.round {
            return Ok(false);
        }
        info!(
            target: LOG_TARGET,
            period = %self.period,
            from = %self.round,
            to = %new_round,
            "Advancing round"
        );
        self.reset_round(new_round)?;
        Ok(true)
    }

    /// Rebroadcast what peers need to catch up on this round
    ///
    /// Backs off exponentially, since a healthy network doesn't need it.
    fn rebroadcast(&mut self) {
        if self.last_rebroadcast.elapsed() < self.rebroadcast_interval {
            return;
        }
        self.last_rebroadcast = Instant::now();
        self.rebroadcast_interval = (self.rebroadcast_interval * 2).min(self.shared.config.max_lambda);

        let vm = &self.shared.vote_manager;
        let mut votes = vm.voted_block_votes(self.period, self.round, VotedKind::SoftVoted);
        if let Some(prev_round) = self.round.prev().filter(|r| Round::ZERO < *r) {
            votes.extend(vm.voted_block_votes(self.period, prev_round, VotedKind::NextVoted));
            votes.extend(vm.voted_block_votes(self.period, prev_round, VotedKind::NextVotedNull));
        }
        votes.extend(vm.reward_votes());
        votes.extend(self.own_votes.iter().copied());

        if votes.is_empty() {
            return;
        }
        trace!(target: LOG_TARGET, num = votes.len(), "Rebroadcasting votes");
        self.shared.network.broadcast_votes(votes);
    }

    pub fn round_state(&self) -> RoundState {
        RoundState {
            period: self.period,
            round: self.round,
            step: self.step,
            cert_voted_block: self.cert_voted_block,
            next_voted_soft_value: self.next_voted_soft_value,
            next_voted_null: self.next_voted_null,
        }
    }

    pub fn persist_round_state(&self) -> DbResult<()> {
        self.shared.storage.save_round_state(&self.round_state())
    }

    pub fn publish_status(&self) {
        let chain = &self.shared.chain;
        let (period, round, step, state) = (self.period, self.round, self.step, self.state);
        self.shared.vote_manager.set_current_round_step(round, step);
        let (chain_size, last_block_hash) = (chain.size(), chain.last_block_hash());
        self.shared.status_tx.send_if_modified(|status| {
            let new = super::PbftStatus {
                period,
                round,
                step,
                state,
                chain_size,
                last_block_hash,
                halted: status.halted.clone(),
            };
            if *status == new {
                return false;
            }
            *status = new;
            true
        });
    }

    /// Log and swallow errors of non-critical collaborators
    pub fn log_warn(&self, msg: &'static str, err: &impl std::error::Error) {
        warn!(
            target: LOG_TARGET,
            period = %self.period,
            round = %self.round,
            err = %err.fmt_compact(),
            "{msg}"
        );
    }
}
