// SPDX-License-Identifier: AGPL-3.0-or-later

//! Relayer key lifecycle, smart-account deployment and device authorization.
//!
//! An [`AccountRelayer`] finds or creates a relayer key in injected storage,
//! then drives the account through setup on first use: derive the account
//! address, deploy it if missing, and authorize the relayer key as a device.
//! Setup runs as a single task on the shared serial executor and is memoized
//! as one shared future - every waiter sees the same outcome, including
//! failure. The instance never retries a failed setup on its own.
//!
//! The authorization token and the faucet call are each performed at most
//! once per instance, no matter how many flows (setup, proofs, concurrent
//! waiters) need them.

use std::sync::{Arc, OnceLock};

use alloy::network::{Ethereum, EthereumWallet};
use alloy::primitives::{Address, U256};
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::signers::local::PrivateKeySigner;
use chrono::Utc;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::address::predict_account_address;
use crate::config::{ContractAddresses, RelayerConfig, SignerOptions};
use crate::contracts::{IDeviceAuthorizer, IGnosisSafe, IWalletDeployer};
use crate::error::RelayerError;
use crate::multicall::{BatchCaller, MulticallAggregator};
use crate::proof::{sign_claim, ProofOfRelayer, RelayerClaim, PROOF_TTL_SECS};
use crate::serial::SerialExecutor;
use crate::signer::RelayedSigner;
use crate::storage::KeyValueStore;
use crate::token::{create_token, AuthToken, OwnerSigner};

/// Storage slot holding the relayer private key.
pub const RELAYER_KEY_SLOT: &str = "safe-relayer-pk";

/// Read-only provider for the target chain (with the recommended fillers).
pub type ReadProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Sending provider signing with the relayer key.
pub type RelayerProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider<Ethereum>,
>;

/// Funding callback for the relayer key; invoked at most once per instance.
pub type Faucet =
    Arc<dyn Fn(Address) -> BoxFuture<'static, Result<(), RelayerError>> + Send + Sync>;

/// Handle to the owner's smart account once setup has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmartAccount {
    pub address: Address,
}

type SetupFuture = Shared<BoxFuture<'static, Result<SmartAccount, Arc<RelayerError>>>>;

pub(crate) struct RelayerShared {
    pub(crate) provider: ReadProvider,
    pub(crate) sender: RelayerProvider,
    pub(crate) relayer: PrivateKeySigner,
    pub(crate) owner: Arc<dyn OwnerSigner>,
    pub(crate) chain_id: u64,
    pub(crate) contracts: ContractAddresses,
    pub(crate) options: SignerOptions,
    faucet: Faucet,
    executor: SerialExecutor,
    ready: OnceLock<SetupFuture>,
    token: tokio::sync::OnceCell<Result<AuthToken, ()>>,
    funded: tokio::sync::OnceCell<Result<(), Arc<RelayerError>>>,
    batch: OnceLock<BatchCaller>,
}

/// Orchestrates the relayer key, account deployment and device authorization.
#[derive(Clone)]
pub struct AccountRelayer {
    inner: Arc<RelayerShared>,
}

impl AccountRelayer {
    /// Build a relayer for `owner` from injected configuration.
    ///
    /// Reads (or generates and persists) the relayer key and binds providers
    /// for the target chain. No network traffic happens here; setup starts
    /// lazily on the first call that needs the account.
    pub fn new(config: RelayerConfig, owner: Arc<dyn OwnerSigner>) -> Result<Self, RelayerError> {
        let relayer = find_or_create_relayer_key(config.storage.as_ref())?;

        let provider: ReadProvider = ProviderBuilder::new().connect_http(config.rpc_url.clone());
        let wallet = EthereumWallet::from(relayer.clone());
        let sender: RelayerProvider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(config.rpc_url.clone());

        Ok(Self {
            inner: Arc::new(RelayerShared {
                provider,
                sender,
                relayer,
                owner,
                chain_id: config.chain_id,
                contracts: config.contracts,
                options: config.signer_options,
                faucet: config.faucet,
                executor: SerialExecutor::new("account-relayer"),
                ready: OnceLock::new(),
                token: tokio::sync::OnceCell::new(),
                funded: tokio::sync::OnceCell::new(),
                batch: OnceLock::new(),
            }),
        })
    }

    /// Address of the relayer key (the device).
    pub fn relayer_address(&self) -> Address {
        OwnerSigner::address(&self.inner.relayer)
    }

    /// Address of the owner key.
    pub fn owner_address(&self) -> Address {
        self.inner.owner.address()
    }

    /// The address the factory will assign (or has assigned) to the owner's
    /// smart account. Pure derivation; works before deployment.
    pub fn predicted_safe_address(&self) -> Address {
        predict_account_address(self.owner_address(), self.inner.chain_id, &self.inner.contracts)
    }

    /// Whether the smart account currently has code on chain. Never cached:
    /// deployment can happen out-of-band at any time.
    pub async fn is_deployed(&self) -> Result<bool, RelayerError> {
        self.inner.is_deployed_at(self.predicted_safe_address()).await
    }

    /// Wait for the smart account to be deployed and the relayer authorized.
    ///
    /// The first caller enqueues the setup task; all callers (present and
    /// future) share its outcome. A setup failure is permanent for this
    /// instance.
    pub async fn ready(&self) -> Result<SmartAccount, RelayerError> {
        self.ready_future().await.map_err(RelayerError::Setup)
    }

    /// The signer facade for this relayer. Memoized so repeated calls share
    /// one read batcher.
    pub fn wrapped_signer(&self) -> RelayedSigner {
        let batch = if self.inner.options.multicall {
            let caller = self
                .inner
                .batch
                .get_or_init(|| {
                    let aggregator = MulticallAggregator::new(
                        self.inner.provider.clone(),
                        self.inner.contracts.multicall,
                    );
                    BatchCaller::new(Arc::new(aggregator), self.inner.options.batch_delay)
                })
                .clone();
            Some(caller)
        } else {
            None
        };
        RelayedSigner::new(self.clone(), batch)
    }

    /// Produce a fresh attestation that this relayer acts for the owner.
    ///
    /// Checks deployment and ownership directly instead of waiting for the
    /// full setup, so a third party can accept the relayer while deployment
    /// is still in flight; in that case the memoized authorization token is
    /// embedded as evidence of the owner's delegation.
    pub async fn proof_of_relayer(&self) -> Result<ProofOfRelayer, RelayerError> {
        let shared = &self.inner;
        let owner = shared.owner.address();
        let device = self.relayer_address();
        let claim = RelayerClaim {
            address: device,
            chain_id: shared.chain_id,
            exp: unix_now().saturating_add(PROOF_TTL_SECS),
        };
        let signature = sign_claim(&shared.relayer, owner, &claim).await?;

        let safe_address = self.predicted_safe_address();
        let deployed = shared.is_deployed_at(safe_address).await?
            && IGnosisSafe::new(safe_address, shared.provider.clone())
                .isOwner(device)
                .call()
                .await
                .map_err(|err| RelayerError::Rpc(err.to_string()))?;

        if deployed {
            return Ok(ProofOfRelayer {
                owner,
                relayer: claim,
                signature: signature.as_bytes().into(),
                safe_deployed: true,
                token_request: None,
                token_request_signature: None,
            });
        }

        let token = shared.authorization_token().await?;
        Ok(ProofOfRelayer {
            owner,
            relayer: claim,
            signature: signature.as_bytes().into(),
            safe_deployed: false,
            token_request: Some(token.token_request),
            token_request_signature: Some(token.signature),
        })
    }

    /// Enqueue the setup task if it has not started yet and return the
    /// shared outcome future. Synchronous, so a caller can guarantee its own
    /// executor task is ordered after setup.
    pub(crate) fn ready_future(&self) -> SetupFuture {
        self.inner
            .ready
            .get_or_init(|| {
                let shared = self.inner.clone();
                self.inner
                    .executor
                    .push(async move { shared.setup().await.map_err(Arc::new) })
                    .map(|pushed| match pushed {
                        Ok(outcome) => outcome,
                        Err(closed) => Err(Arc::new(closed)),
                    })
                    .boxed()
                    .shared()
            })
            .clone()
    }

    pub(crate) fn shared(&self) -> &Arc<RelayerShared> {
        &self.inner
    }

    pub(crate) fn executor(&self) -> &SerialExecutor {
        &self.inner.executor
    }
}

impl RelayerShared {
    /// The single setup task: derive, deploy if missing, authorize the
    /// device, hand back the account.
    async fn setup(self: Arc<Self>) -> Result<SmartAccount, RelayerError> {
        let owner = self.owner.address();
        let device = OwnerSigner::address(&self.relayer);
        let safe_address = predict_account_address(owner, self.chain_id, &self.contracts);

        if !self.is_deployed_at(safe_address).await? {
            self.create_safe(safe_address).await?;
        }

        let already_authorized = IGnosisSafe::new(safe_address, self.provider.clone())
            .isOwner(device)
            .call()
            .await
            .map_err(|err| RelayerError::Rpc(err.to_string()))?;
        if already_authorized {
            // Same storage, same owner: nothing left to do.
            tracing::debug!(safe = %safe_address, "relayer device already authorized");
            return Ok(SmartAccount {
                address: safe_address,
            });
        }

        self.add_device(safe_address).await?;
        Ok(SmartAccount {
            address: safe_address,
        })
    }

    pub(crate) async fn is_deployed_at(&self, address: Address) -> Result<bool, RelayerError> {
        let code = self
            .provider
            .get_code_at(address)
            .await
            .map_err(|err| RelayerError::Rpc(err.to_string()))?;
        Ok(!code.is_empty())
    }

    async fn create_safe(&self, expected: Address) -> Result<(), RelayerError> {
        // The owner prompt and the faucet transfer are independent; run them
        // concurrently, each memoized for the lifetime of the instance.
        let (token, ()) = tokio::try_join!(self.authorization_token(), self.ensure_funded())?;

        tracing::info!(safe = %expected, "deploying smart account");
        let deployer = IWalletDeployer::new(self.contracts.wallet_deployer, self.sender.clone());
        let receipt = deployer
            .createSafe(
                token.token_request,
                token.signature,
                self.contracts.device_authorizer,
                Vec::new(),
            )
            .send()
            .await
            .map_err(|err| RelayerError::Deployment(err.to_string()))?
            .get_receipt()
            .await
            .map_err(|err| RelayerError::Deployment(err.to_string()))?;
        if !receipt.status() {
            return Err(RelayerError::Deployment(
                "account creation transaction reverted".into(),
            ));
        }

        // The factory must have assigned exactly the derived address.
        if !self.is_deployed_at(expected).await? {
            return Err(RelayerError::Deployment(format!(
                "no code at derived account address {expected}"
            )));
        }
        Ok(())
    }

    async fn add_device(&self, safe_address: Address) -> Result<(), RelayerError> {
        let (token, ()) = tokio::try_join!(self.authorization_token(), self.ensure_funded())?;

        tracing::info!(safe = %safe_address, device = %OwnerSigner::address(&self.relayer), "authorizing relayer device");
        let authorizer =
            IDeviceAuthorizer::new(self.contracts.device_authorizer, self.sender.clone());
        let receipt = authorizer
            .addDevice(safe_address, token.token_request, token.signature)
            .send()
            .await
            .map_err(|err| RelayerError::Authorization(err.to_string()))?
            .get_receipt()
            .await
            .map_err(|err| RelayerError::Authorization(err.to_string()))?;
        if !receipt.status() {
            return Err(RelayerError::Authorization(
                "add-device transaction reverted".into(),
            ));
        }
        Ok(())
    }

    /// The owner-signed token for this (owner, device) pair. The signing
    /// prompt fires at most once per instance; the outcome is cached either
    /// way, so a declined prompt is final and never re-shown.
    pub(crate) async fn authorization_token(&self) -> Result<AuthToken, RelayerError> {
        let cached = self
            .token
            .get_or_init(|| async {
                let issued_at = U256::from(unix_now());
                create_token(
                    self.owner.as_ref(),
                    OwnerSigner::address(&self.relayer),
                    issued_at,
                )
                .await
                .map_err(|_| ())
            })
            .await;
        match cached {
            Ok(token) => Ok(token.clone()),
            Err(()) => Err(RelayerError::TokenCreation),
        }
    }

    /// Fund the relayer key through the faucet collaborator. The callback
    /// runs at most once per instance; its outcome, success or failure, is
    /// shared by every later caller.
    pub(crate) async fn ensure_funded(&self) -> Result<(), RelayerError> {
        self.funded
            .get_or_init(|| async {
                let device = OwnerSigner::address(&self.relayer);
                tracing::debug!(relayer = %device, "requesting faucet funds");
                (self.faucet)(device).await.map_err(Arc::new)
            })
            .await
            .clone()
            .map_err(RelayerError::Faucet)
    }
}

/// Read the relayer key from storage, or generate and persist a fresh one.
/// The key is never rotated for the lifetime of the storage scope.
pub(crate) fn find_or_create_relayer_key(
    storage: &dyn KeyValueStore,
) -> Result<PrivateKeySigner, RelayerError> {
    if let Some(stored) = storage.get_item(RELAYER_KEY_SLOT)? {
        return stored
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|err| RelayerError::Config(format!("stored relayer key is invalid: {err}")));
    }

    let signer = PrivateKeySigner::random();
    storage.set_item(
        RELAYER_KEY_SLOT,
        &alloy::hex::encode_prefixed(signer.to_bytes()),
    )?;
    tracing::info!(relayer = %OwnerSigner::address(&signer), "generated new relayer key");
    Ok(signer)
}

fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
