// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deterministic smart-account address derivation.
//!
//! Mirrors the CREATE2 scheme of the on-chain proxy factory bit-for-bit: the
//! canonical setup payload for a single-owner account is hashed together with
//! the chain id into the salt, and the proxy creation bytecode plus the
//! ABI-encoded singleton address form the init-code hash. A divergence here
//! does not error - it silently yields a valid-looking but wrong address - so
//! keep this in lockstep with the factory deployment.

use alloy::primitives::{keccak256, Address, U256};
use alloy::sol_types::SolCall;

use crate::config::ContractAddresses;
use crate::contracts::{abi_encode_address, IGnosisSafe, PROXY_CREATION_CODE, SETUP_HANDLER_CALL};

/// Compute the address the factory will assign to `owner`'s smart account.
///
/// Pure and deterministic: identical inputs always yield the same address,
/// whether or not the account is deployed yet.
pub fn predict_account_address(
    owner: Address,
    chain_id: u64,
    contracts: &ContractAddresses,
) -> Address {
    let setup_data = setup_call_data(owner, contracts);

    // salt = keccak256(keccak256(setupData) ++ uint256(chainId))
    let mut salt_input = [0u8; 64];
    salt_input[..32].copy_from_slice(keccak256(&setup_data).as_slice());
    salt_input[32..].copy_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
    let salt = keccak256(salt_input);

    // initCodeHash = keccak256(proxyCreationCode ++ abi.encode(singleton))
    let mut init_code = PROXY_CREATION_CODE.to_vec();
    init_code.extend_from_slice(&abi_encode_address(contracts.safe_singleton));
    let init_code_hash = keccak256(&init_code);

    contracts.proxy_factory.create2(salt, init_code_hash)
}

/// Canonical `setup` call the factory encodes for a fresh single-owner
/// account: owners = [owner], threshold = 1, initializer = the setup
/// handler's `setup()` selector, zeroed payment fields.
fn setup_call_data(owner: Address, contracts: &ContractAddresses) -> Vec<u8> {
    IGnosisSafe::setupCall {
        _owners: vec![owner],
        _threshold: U256::from(1),
        to: contracts.setup_handler,
        data: SETUP_HANDLER_CALL.clone(),
        fallbackHandler: contracts.fallback_handler,
        paymentToken: Address::ZERO,
        payment: U256::ZERO,
        paymentReceiver: Address::ZERO,
    }
    .abi_encode()
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    fn test_contracts() -> ContractAddresses {
        ContractAddresses {
            wallet_deployer: address!("1000000000000000000000000000000000000001"),
            device_authorizer: address!("1000000000000000000000000000000000000002"),
            proxy_factory: address!("1000000000000000000000000000000000000003"),
            safe_singleton: address!("1000000000000000000000000000000000000004"),
            setup_handler: address!("1000000000000000000000000000000000000005"),
            fallback_handler: address!("1000000000000000000000000000000000000006"),
            multicall: address!("1000000000000000000000000000000000000007"),
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let owner = address!("2000000000000000000000000000000000000001");
        let contracts = test_contracts();
        let first = predict_account_address(owner, 1_351_057_110, &contracts);
        let second = predict_account_address(owner, 1_351_057_110, &contracts);
        assert_eq!(first, second);
    }

    #[test]
    fn derivation_depends_on_owner() {
        let contracts = test_contracts();
        let a = predict_account_address(
            address!("2000000000000000000000000000000000000001"),
            1,
            &contracts,
        );
        let b = predict_account_address(
            address!("2000000000000000000000000000000000000002"),
            1,
            &contracts,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn derivation_depends_on_chain_id() {
        let owner = address!("2000000000000000000000000000000000000001");
        let contracts = test_contracts();
        let mainnet = predict_account_address(owner, 1, &contracts);
        let testnet = predict_account_address(owner, 5, &contracts);
        assert_ne!(mainnet, testnet);
    }

    #[test]
    fn derivation_depends_on_deployments() {
        let owner = address!("2000000000000000000000000000000000000001");
        let contracts = test_contracts();

        let mut other_factory = contracts;
        other_factory.proxy_factory = address!("3000000000000000000000000000000000000001");

        let mut other_singleton = contracts;
        other_singleton.safe_singleton = address!("3000000000000000000000000000000000000002");

        let mut other_handler = contracts;
        other_handler.fallback_handler = address!("3000000000000000000000000000000000000003");

        let base = predict_account_address(owner, 1, &contracts);
        assert_ne!(base, predict_account_address(owner, 1, &other_factory));
        assert_ne!(base, predict_account_address(owner, 1, &other_singleton));
        assert_ne!(base, predict_account_address(owner, 1, &other_handler));
    }

    #[test]
    fn setup_payload_encodes_single_owner_threshold_one() {
        let owner = address!("2000000000000000000000000000000000000001");
        let contracts = test_contracts();
        let data = setup_call_data(owner, &contracts);

        let decoded = IGnosisSafe::setupCall::abi_decode(&data).unwrap();
        assert_eq!(decoded._owners, vec![owner]);
        assert_eq!(decoded._threshold, U256::from(1));
        assert_eq!(decoded.to, contracts.setup_handler);
        assert_eq!(decoded.data, SETUP_HANDLER_CALL);
        assert_eq!(decoded.fallbackHandler, contracts.fallback_handler);
        assert_eq!(decoded.paymentToken, Address::ZERO);
        assert_eq!(decoded.payment, U256::ZERO);
        assert_eq!(decoded.paymentReceiver, Address::ZERO);
    }
}
