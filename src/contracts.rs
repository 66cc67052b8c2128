// SPDX-License-Identifier: AGPL-3.0-or-later

//! On-chain ABI surfaces consumed by the relay subsystem.
//!
//! The contracts themselves are external collaborators, deployed and upgraded
//! independently; only their call and event encodings live here. Interfaces
//! are defined with alloy's `sol!` macro.

use alloy::primitives::{b256, bytes, Address, Bytes, B256};
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    /// Request body of a device-authorization token. ABI-shared with the
    /// wallet deployer and the device authorizer.
    #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct TokenRequest {
        address owner;
        address device;
        uint256 issuedAt;
    }

    #[sol(rpc)]
    interface IWalletDeployer {
        /// Deploys the owner's smart account, authorizing `tokenRequest.device`
        /// through `authorizer`. Extra modules are enabled on the new account.
        function createSafe(
            TokenRequest calldata tokenRequest,
            bytes calldata signature,
            address authorizer,
            address[] calldata extraModules
        ) external returns (address);
    }

    #[sol(rpc)]
    interface IDeviceAuthorizer {
        /// Adds `tokenRequest.device` as an owner of `safe`, gated on the
        /// owner-signed token.
        function addDevice(
            address safe,
            TokenRequest calldata tokenRequest,
            bytes calldata signature
        ) external;
    }

    #[sol(rpc)]
    interface IGnosisSafe {
        function setup(
            address[] calldata _owners,
            uint256 _threshold,
            address to,
            bytes calldata data,
            address fallbackHandler,
            address paymentToken,
            uint256 payment,
            address payable paymentReceiver
        ) external;

        function nonce() external view returns (uint256);

        function isOwner(address owner) external view returns (bool);

        function encodeTransactionData(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            uint256 _nonce
        ) external view returns (bytes memory);

        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address payable refundReceiver,
            bytes calldata signatures
        ) external payable returns (bool success);

        event ExecutionSuccess(bytes32 txHash, uint256 payment);
        event ExecutionFailure(bytes32 txHash, uint256 payment);
        event AddedOwner(address owner);
        event RemovedOwner(address owner);
        event ChangedThreshold(uint256 threshold);
        event ChangedFallbackHandler(address handler);
        event ChangedGuard(address guard);
        event EnabledModule(address module);
        event DisabledModule(address module);
        event ExecutionFromModuleSuccess(address indexed module);
        event ExecutionFromModuleFailure(address indexed module);
        event ApproveHash(bytes32 indexed approvedHash, address indexed owner);
        event SignMsg(bytes32 indexed msgHash);
        event SafeReceived(address indexed sender, uint256 value);
        event SafeSetup(
            address indexed initiator,
            address[] owners,
            uint256 threshold,
            address initializer,
            address fallbackHandler
        );
    }

    #[sol(rpc)]
    interface IMulticall3 {
        struct Call {
            address target;
            bytes callData;
        }

        struct CallResult {
            bool success;
            bytes returnData;
        }

        function tryAggregate(bool requireSuccess, Call[] calldata calls)
            external
            payable
            returns (CallResult[] memory returnData);
    }
}

/// Meta-transaction operation kinds understood by the smart account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Call = 0,
    DelegateCall = 1,
}

/// Creation bytecode of the account proxy, embedded to save a
/// `proxyCreationCode()` round trip to the factory.
pub static PROXY_CREATION_CODE: Bytes = bytes!("608060405234801561001057600080fd5b506040516101e63803806101e68339818101604052602081101561003357600080fd5b8101908080519060200190929190505050600073ffffffffffffffffffffffffffffffffffffffff168173ffffffffffffffffffffffffffffffffffffffff1614156100ca576040517f08c379a00000000000000000000000000000000000000000000000000000000081526004018080602001828103825260228152602001806101c46022913960400191505060405180910390fd5b806000806101000a81548173ffffffffffffffffffffffffffffffffffffffff021916908373ffffffffffffffffffffffffffffffffffffffff1602179055505060ab806101196000396000f3fe608060405273ffffffffffffffffffffffffffffffffffffffff600054167fa619486e0000000000000000000000000000000000000000000000000000000060003514156050578060005260206000f35b3660008037600080366000845af43d6000803e60008114156070573d6000fd5b3d6000f3fea2646970667358221220d1429297349653a4918076d650332de1a1068c5f3e07c5c82360c277770b955264736f6c63430007060033496e76616c69642073696e676c65746f6e20616464726573732070726f7669646564");

/// Selector of the setup handler's parameterless `setup()` function, used as
/// the initializer payload of every new account.
pub static SETUP_HANDLER_CALL: Bytes = bytes!("ba0bba40");

/// `keccak256("ExecutionSuccess(bytes32,uint256)")` - the marker the smart
/// account emits when a relayed call executed successfully.
pub const SUCCESS_TOPIC: B256 =
    b256!("442e715f626346e8c54381002da614f62bee8d27386535b2521ec8540898556e");

/// Topic0 of every event the smart account itself can emit. Receipts of
/// relayed transactions are stripped of these so the result looks like a
/// plain direct call.
pub const SAFE_EVENT_TOPICS: [B256; 15] = [
    IGnosisSafe::ExecutionSuccess::SIGNATURE_HASH,
    IGnosisSafe::ExecutionFailure::SIGNATURE_HASH,
    IGnosisSafe::AddedOwner::SIGNATURE_HASH,
    IGnosisSafe::RemovedOwner::SIGNATURE_HASH,
    IGnosisSafe::ChangedThreshold::SIGNATURE_HASH,
    IGnosisSafe::ChangedFallbackHandler::SIGNATURE_HASH,
    IGnosisSafe::ChangedGuard::SIGNATURE_HASH,
    IGnosisSafe::EnabledModule::SIGNATURE_HASH,
    IGnosisSafe::DisabledModule::SIGNATURE_HASH,
    IGnosisSafe::ExecutionFromModuleSuccess::SIGNATURE_HASH,
    IGnosisSafe::ExecutionFromModuleFailure::SIGNATURE_HASH,
    IGnosisSafe::ApproveHash::SIGNATURE_HASH,
    IGnosisSafe::SignMsg::SIGNATURE_HASH,
    IGnosisSafe::SafeReceived::SIGNATURE_HASH,
    IGnosisSafe::SafeSetup::SIGNATURE_HASH,
];

/// Whether a log topic belongs to the smart account's own interface.
pub fn is_safe_event(topic0: &B256) -> bool {
    SAFE_EVENT_TOPICS.contains(topic0)
}

/// ABI-encode an address as a single 32-byte word.
pub(crate) fn abi_encode_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}
