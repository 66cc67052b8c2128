// SPDX-License-Identifier: AGPL-3.0-or-later

//! Drop-in signer facade over a relayed smart account.
//!
//! A [`RelayedSigner`] reports the owner's address while signing with the
//! relayer key and routing `send_transaction` through the smart account's
//! `execTransaction`. Sends are serialized on the relayer's executor behind
//! the one-time account setup, so callers get plain wallet semantics on top
//! of the meta-transaction plumbing. Receipts are sanitized: the account's
//! own execution events are stripped so the logs look like those of a direct
//! call.

use std::time::Duration;

use alloy::consensus::SignableTransaction;
use alloy::network::TxSigner;
use alloy::primitives::{keccak256, Address, Bytes, Signature, TxHash, TxKind, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{Log, TransactionRequest};

use crate::contracts::{is_safe_event, IGnosisSafe, Operation, SUCCESS_TOPIC};
use crate::error::RelayerError;
use crate::multicall::BatchCaller;
use crate::relayer::{AccountRelayer, ReadProvider, SmartAccount};
use crate::token::{eth_sign_encode, OwnerSigner};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RECEIPT_POLL_ATTEMPTS: u32 = 120;

/// Signer facade presenting the owner's identity over relayed execution.
#[derive(Clone)]
pub struct RelayedSigner {
    relayer: AccountRelayer,
    batch: Option<BatchCaller>,
}

impl RelayedSigner {
    pub(crate) fn new(relayer: AccountRelayer, batch: Option<BatchCaller>) -> Self {
        Self { relayer, batch }
    }

    /// The identity this signer presents: the owner, not the relayer key.
    pub fn address(&self) -> Address {
        self.relayer.owner_address()
    }

    /// The relayer handle backing this signer.
    pub fn relayer(&self) -> &AccountRelayer {
        &self.relayer
    }

    /// Sign an arbitrary message with the relayer key (`personal_sign`
    /// semantics). Note the asymmetry with [`Self::address`]: messages are
    /// signed by the device, not the owner.
    pub async fn sign_message(&self, message: &[u8]) -> Result<Signature, RelayerError> {
        OwnerSigner::sign_message(&self.relayer.shared().relayer, message).await
    }

    /// Sign a raw transaction with the relayer key.
    pub async fn sign_transaction(
        &self,
        tx: &mut dyn SignableTransaction<Signature>,
    ) -> Result<Signature, RelayerError> {
        TxSigner::sign_transaction(&self.relayer.shared().relayer, tx)
            .await
            .map_err(|err| RelayerError::Signing(err.to_string()))
    }

    /// Execute a read call. With batching enabled, eligible calls (a target
    /// and call data, nothing else of consequence) join the debounced
    /// multicall window; everything else goes straight to the provider.
    pub async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, RelayerError> {
        if let (Some(batch), Some(TxKind::Call(to)), Some(input)) =
            (&self.batch, tx.to, tx.input.input())
        {
            return batch.call(to, input.clone()).await;
        }
        self.relayer
            .shared()
            .provider
            .call(tx.clone())
            .await
            .map_err(|err| RelayerError::Rpc(err.to_string()))
    }

    /// Estimate gas for a call as the node sees it.
    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, RelayerError> {
        self.relayer
            .shared()
            .provider
            .estimate_gas(tx.clone())
            .await
            .map_err(|err| RelayerError::Rpc(err.to_string()))
    }

    /// Send `tx` through the smart account.
    ///
    /// The setup task is enqueued (if it has not run yet) strictly before the
    /// send task, on the same serial executor, so the first send on a fresh
    /// account transparently waits for deployment and device authorization.
    /// Resolves once the meta-transaction is accepted by the node; await the
    /// returned handle's receipt for confirmation.
    pub async fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> Result<RelayedPendingTransaction, RelayerError> {
        let ready = self.relayer.ready_future();
        let shared = self.relayer.shared().clone();

        let handle = self.relayer.executor().push(async move {
            let account = ready.await.map_err(RelayerError::Setup)?;
            relay_through_account(&shared, account, tx).await
        });

        let tx_hash = handle.await??;
        Ok(RelayedPendingTransaction {
            provider: self.relayer.shared().provider.clone(),
            tx_hash,
        })
    }
}

/// Wrap `tx` into the account's `execTransaction` and submit it from the
/// relayer key. Runs inside the serial executor; nothing else of this
/// relayer's is in flight concurrently.
async fn relay_through_account(
    shared: &crate::relayer::RelayerShared,
    account: SmartAccount,
    tx: TransactionRequest,
) -> Result<TxHash, RelayerError> {
    let Some(TxKind::Call(to)) = tx.to else {
        return Err(RelayerError::Config(
            "relayed transactions must name a call target".into(),
        ));
    };
    let value = tx.value.unwrap_or(U256::ZERO);
    let data = tx.input.input().cloned().unwrap_or_default();
    let device = OwnerSigner::address(&shared.relayer);

    let gas_price = match tx.gas_price {
        Some(price) => price,
        None => shared
            .provider
            .get_gas_price()
            .await
            .map_err(|err| RelayerError::Rpc(err.to_string()))?,
    };
    // Pending tag: a send accepted into the mempool moments ago must be
    // counted, or back-to-back relays would reuse the relayer nonce.
    let relayer_nonce = shared
        .provider
        .get_transaction_count(device)
        .pending()
        .await
        .map_err(|err| RelayerError::Rpc(err.to_string()))?;

    let account_view = IGnosisSafe::new(account.address, shared.provider.clone());
    let safe_nonce = account_view
        .nonce()
        .call()
        .await
        .map_err(|err| RelayerError::Rpc(err.to_string()))?;
    let preimage = account_view
        .encodeTransactionData(
            to,
            value,
            data.clone(),
            Operation::Call as u8,
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            Address::ZERO,
            Address::ZERO,
            safe_nonce,
        )
        .call()
        .await
        .map_err(|err| RelayerError::Rpc(err.to_string()))?;

    // The account verifies a personal-sign signature of the transaction hash.
    let digest = keccak256(&preimage);
    let signature = OwnerSigner::sign_message(&shared.relayer, digest.as_slice()).await?;
    let signatures = eth_sign_encode(&signature);

    tracing::debug!(safe = %account.address, %to, %safe_nonce, "relaying transaction");
    let account_exec = IGnosisSafe::new(account.address, shared.sender.clone());
    let mut call = account_exec
        .execTransaction(
            to,
            value,
            data,
            Operation::Call as u8,
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            Address::ZERO,
            Address::ZERO,
            signatures,
        )
        .from(device)
        .gas_price(gas_price)
        .nonce(relayer_nonce);
    if let Some(gas) = tx.gas {
        call = call.gas(gas);
    }

    let pending = call
        .send()
        .await
        .map_err(|err| RelayerError::Rpc(err.to_string()))?;
    Ok(*pending.tx_hash())
}

/// A relayed transaction accepted by the node but not yet confirmed.
pub struct RelayedPendingTransaction {
    provider: ReadProvider,
    tx_hash: TxHash,
}

impl RelayedPendingTransaction {
    /// Hash of the outer `execTransaction`, not of the wrapped call.
    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    /// Poll for the receipt, verify relayed execution succeeded and strip
    /// the account's own events from the logs.
    pub async fn get_receipt(self) -> Result<RelayedReceipt, RelayerError> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt = self
                .provider
                .get_transaction_receipt(self.tx_hash)
                .await
                .map_err(|err| RelayerError::Rpc(err.to_string()))?;
            let Some(receipt) = receipt else {
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
                continue;
            };

            if !receipt.status() {
                return Err(RelayerError::TransactionFailed(format!(
                    "relay transaction {} reverted",
                    self.tx_hash
                )));
            }
            let logs = sanitize_logs(receipt.inner.logs().to_vec())?;
            return Ok(RelayedReceipt {
                tx_hash: self.tx_hash,
                block_number: receipt.block_number,
                gas_used: receipt.gas_used,
                logs,
            });
        }
        Err(RelayerError::Rpc(format!(
            "timed out waiting for receipt of {}",
            self.tx_hash
        )))
    }
}

/// Receipt of a relayed transaction with the account's events removed.
#[derive(Debug, Clone)]
pub struct RelayedReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// The account appends an `ExecutionSuccess` log after the wrapped call's
/// own logs. Pop it, require it, and drop any other account-interface events
/// so the receipt reads like the wrapped call ran directly.
fn sanitize_logs(mut logs: Vec<Log>) -> Result<Vec<Log>, RelayerError> {
    let marker = logs.pop().ok_or(RelayerError::RelayExecution)?;
    if marker.topic0() != Some(&SUCCESS_TOPIC) {
        return Err(RelayerError::RelayExecution);
    }
    logs.retain(|log| !log.topic0().is_some_and(is_safe_event));
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy::primitives::{address, LogData, B256};
    use alloy::signers::local::PrivateKeySigner;

    use crate::config::{ContractAddresses, RelayerConfig, SignerOptions};
    use crate::contracts::IGnosisSafe;
    use crate::relayer::Faucet;
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::token::recover_eth_sign;
    use alloy::sol_types::SolEvent;

    use super::*;

    fn event_log(topic: B256) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: address!("00000000000000000000000000000000000000fe"),
                data: LogData::new_unchecked(vec![topic], Bytes::new()),
            },
            ..Default::default()
        }
    }

    fn foreign_topic(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    #[test]
    fn sanitized_receipt_keeps_only_the_wrapped_calls_logs() {
        let logs = vec![
            event_log(foreign_topic(0x11)),
            event_log(IGnosisSafe::AddedOwner::SIGNATURE_HASH),
            event_log(foreign_topic(0x22)),
            event_log(SUCCESS_TOPIC),
        ];

        let sanitized = sanitize_logs(logs).unwrap();
        let topics: Vec<_> = sanitized
            .iter()
            .map(|log| *log.topic0().unwrap())
            .collect();
        assert_eq!(topics, vec![foreign_topic(0x11), foreign_topic(0x22)]);
    }

    #[test]
    fn a_receipt_without_the_success_marker_is_an_error() {
        let logs = vec![event_log(foreign_topic(0x11))];
        assert!(matches!(
            sanitize_logs(logs),
            Err(RelayerError::RelayExecution)
        ));

        assert!(matches!(
            sanitize_logs(Vec::new()),
            Err(RelayerError::RelayExecution)
        ));
    }

    #[test]
    fn an_execution_failure_marker_is_an_error() {
        let logs = vec![
            event_log(foreign_topic(0x11)),
            event_log(IGnosisSafe::ExecutionFailure::SIGNATURE_HASH),
        ];
        assert!(matches!(
            sanitize_logs(logs),
            Err(RelayerError::RelayExecution)
        ));
    }

    fn offline_signer() -> RelayedSigner {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let owner: Arc<dyn OwnerSigner> = Arc::new(PrivateKeySigner::random());
        let faucet: Faucet = Arc::new(|_| Box::pin(async { Ok(()) }));
        let config = RelayerConfig {
            rpc_url: "http://localhost:8545".parse().unwrap(),
            chain_id: 1_351_057_110,
            contracts: ContractAddresses {
                wallet_deployer: address!("1000000000000000000000000000000000000001"),
                device_authorizer: address!("1000000000000000000000000000000000000002"),
                proxy_factory: address!("1000000000000000000000000000000000000003"),
                safe_singleton: address!("1000000000000000000000000000000000000004"),
                setup_handler: address!("1000000000000000000000000000000000000005"),
                fallback_handler: address!("1000000000000000000000000000000000000006"),
                multicall: address!("1000000000000000000000000000000000000007"),
            },
            storage,
            faucet,
            signer_options: SignerOptions::default(),
        };
        AccountRelayer::new(config, owner).unwrap().wrapped_signer()
    }

    #[tokio::test]
    async fn presents_the_owner_but_signs_with_the_relayer_key() {
        let signer = offline_signer();
        assert_eq!(signer.address(), signer.relayer().owner_address());
        assert_ne!(signer.address(), signer.relayer().relayer_address());

        let signature = signer.sign_message(b"hello").await.unwrap();
        let recovered = recover_eth_sign(b"hello", &signature.as_bytes()).unwrap();
        assert_eq!(recovered, signer.relayer().relayer_address());
    }
}
