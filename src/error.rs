// SPDX-License-Identifier: AGPL-3.0-or-later

//! Crate-wide error taxonomy.
//!
//! Setup failures poison the shared ready future for every waiter of an
//! `AccountRelayer`; per-send failures only reach the caller that issued the
//! send. No error triggers an automatic retry anywhere in this crate.

use std::sync::Arc;

use alloy::primitives::Bytes;

use crate::storage::KeyStoreError;

/// Errors that can occur inside the relay subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    /// A required piece of configuration is missing or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The owner declined to sign, or signing failed. Provider-specific
    /// detail is deliberately not surfaced.
    #[error("token creation failed")]
    TokenCreation,

    /// A signing operation with the relayer key failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The on-chain account-creation call reverted or failed to confirm.
    #[error("smart account deployment failed: {0}")]
    Deployment(String),

    /// The add-device call reverted or failed to confirm.
    #[error("device authorization failed: {0}")]
    Authorization(String),

    /// The faucet callback failed earlier; the failure is shared by every
    /// waiter of this instance.
    #[error("faucet funding failed: {0}")]
    Faucet(Arc<RelayerError>),

    /// The outer transaction mined but the smart account did not emit its
    /// execution-success marker.
    #[error("relayed call did not execute successfully inside the smart account")]
    RelayExecution,

    /// The submitted transaction reverted before reaching the account logic.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// A batched read call reverted; carries the raw revert bytes for the
    /// caller to decode.
    #[error("batched call reverted")]
    BatchCallReverted(Bytes),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("storage error: {0}")]
    Storage(#[from] KeyStoreError),

    /// The serial executor worker is gone; no further tasks will run.
    #[error("serial executor closed")]
    ExecutorClosed,

    /// Account setup failed earlier; the failure is shared by every waiter.
    #[error("account setup failed: {0}")]
    Setup(Arc<RelayerError>),
}
