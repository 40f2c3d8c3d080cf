// SPDX-License-Identifier: MIT

//! In-process stand-ins for everything around consensus
//!
//! A [`dag::SimDag`] shared by all nodes, a per-node
//! [`final_chain::SimFinalChain`] executing periods over it, a static
//! [`validators::SimValidators`] set and a [`network::SimNetwork`] router
//! thread moving messages between [`dagbft_consensus::manager::PbftHandle`]s.
//! [`devnet::Devnet`] wires them all together.
pub mod dag;
pub mod devnet;
pub mod final_chain;
pub mod network;
pub mod slashing;
pub mod validators;

const LOG_TARGET: &str = "dagbft::sim";
