// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Relayer Configuration
//!
//! Everything an [`crate::relayer::AccountRelayer`] needs is injected through
//! [`RelayerConfig`] at construction time: the target-chain RPC endpoint, the
//! statically known contract deployments, a storage port for the persisted
//! relayer key, and the faucet callback used to fund the relayer. There is no
//! ambient fallback chain; callers that want in-memory behavior pass a
//! [`crate::storage::MemoryStore`] explicitly.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{address, Address};
use url::Url;

use crate::relayer::Faucet;
use crate::storage::KeyValueStore;

/// Multicall3 deployment used when no aggregator address is configured.
pub const DEFAULT_MULTICALL3: Address = address!("15250E1456243f59397e56E663ACe82eD762Fd12");

/// Default quiet period for the read-call batcher.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(50);

/// Statically known contract deployments on the target chain.
///
/// The proxy factory, singleton, setup handler and fallback handler must be
/// the exact deployments the wallet deployer wires new accounts to; the
/// derived account address depends on all four.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    /// Contract that deploys smart accounts against an authorization token.
    pub wallet_deployer: Address,
    /// Contract that adds an authorized device as an account owner.
    pub device_authorizer: Address,
    /// CREATE2 proxy factory the wallet deployer delegates to.
    pub proxy_factory: Address,
    /// Smart-account singleton (master copy) behind every proxy.
    pub safe_singleton: Address,
    /// Handler invoked by the canonical setup call.
    pub setup_handler: Address,
    /// Compatibility fallback handler installed on new accounts.
    pub fallback_handler: Address,
    /// Multicall3 aggregator used for batched reads.
    pub multicall: Address,
}

impl ContractAddresses {
    /// Addresses with the aggregator slot pointed at the canonical
    /// Multicall3 deployment.
    pub fn with_default_multicall(
        wallet_deployer: Address,
        device_authorizer: Address,
        proxy_factory: Address,
        safe_singleton: Address,
        setup_handler: Address,
        fallback_handler: Address,
    ) -> Self {
        Self {
            wallet_deployer,
            device_authorizer,
            proxy_factory,
            safe_singleton,
            setup_handler,
            fallback_handler,
            multicall: DEFAULT_MULTICALL3,
        }
    }
}

/// Options for the wrapped signer returned by
/// [`crate::relayer::AccountRelayer::wrapped_signer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignerOptions {
    /// Coalesce `call` reads through the Multicall3 aggregator.
    pub multicall: bool,
    /// Quiet period before a batch of reads is flushed.
    pub batch_delay: Duration,
}

impl Default for SignerOptions {
    fn default() -> Self {
        Self {
            multicall: false,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

/// Constructor-injected configuration for an account relayer.
#[derive(Clone)]
pub struct RelayerConfig {
    /// RPC endpoint of the target chain.
    pub rpc_url: Url,
    /// Chain id of the target chain; part of the account address derivation.
    pub chain_id: u64,
    /// Deployed collaborator contracts.
    pub contracts: ContractAddresses,
    /// Storage slot provider for the relayer private key.
    pub storage: Arc<dyn KeyValueStore>,
    /// Funds the relayer key; invoked at most once per relayer instance.
    pub faucet: Faucet,
    /// Wrapped-signer behavior.
    pub signer_options: SignerOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_options_default_to_direct_reads() {
        let options = SignerOptions::default();
        assert!(!options.multicall);
        assert_eq!(options.batch_delay, Duration::from_millis(50));
    }

    #[test]
    fn default_multicall_is_wired_into_the_address_set() {
        let contracts = ContractAddresses::with_default_multicall(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            Address::repeat_byte(4),
            Address::repeat_byte(5),
            Address::repeat_byte(6),
        );
        assert_eq!(contracts.multicall, DEFAULT_MULTICALL3);
        assert_eq!(contracts.wallet_deployer, Address::repeat_byte(1));
        assert_eq!(contracts.fallback_handler, Address::repeat_byte(6));
    }
}
