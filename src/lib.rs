// SPDX-License-Identifier: AGPL-3.0-or-later

//! Safe Relayer - Account-Abstraction Relay Toolkit
//!
//! This crate gives an owner-controlled EOA a persistent Gnosis-Safe-style
//! smart account on a target chain, operated by a locally generated and
//! faucet-funded relayer key. The owner only ever produces off-chain
//! signatures authorizing relayer actions; after setup the relayer key alone
//! drives the account.
//!
//! ## Modules
//!
//! - `address` - Deterministic CREATE2 smart-account address derivation
//! - `token` - Owner-signed device-authorization tokens
//! - `serial` - FIFO async mutual-exclusion queue
//! - `multicall` - Debounced read-call batching via Multicall3
//! - `relayer` - Relayer key lifecycle, deployment and device authorization
//! - `signer` - Signer facade routing writes through the relay path
//! - `proof` - Signed relayer attestations for third-party verifiers
//! - `storage` - Key-value port for the persisted relayer key (memory / redb)

pub mod address;
pub mod config;
pub mod contracts;
pub mod error;
pub mod multicall;
pub mod proof;
pub mod relayer;
pub mod serial;
pub mod signer;
pub mod storage;
pub mod token;

pub use config::{ContractAddresses, RelayerConfig, SignerOptions};
pub use error::RelayerError;
pub use proof::{ProofOfRelayer, RelayerClaim};
pub use relayer::{AccountRelayer, Faucet, SmartAccount};
pub use signer::{RelayedPendingTransaction, RelayedReceipt, RelayedSigner};
pub use storage::{KeyValueStore, MemoryStore, RedbStore};
pub use token::{AuthToken, OwnerSigner};
