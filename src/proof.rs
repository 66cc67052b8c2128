// SPDX-License-Identifier: AGPL-3.0-or-later

//! Signed relayer attestations.
//!
//! A proof of relayer lets a third party accept a relayer key before the
//! on-chain account setup has completed. The relayer signs a short-lived
//! claim over its own address, the chain id and an expiry; when the smart
//! account is not yet deployed the proof additionally embeds the owner-signed
//! authorization token so the verifier can check the owner really did
//! delegate to this device. Expiry is advisory - enforcing it is the
//! verifier's call, not the relayer's.

use alloy::primitives::{Address, Bytes, Signature};
use serde::{Deserialize, Serialize};

use crate::contracts::TokenRequest;
use crate::error::RelayerError;
use crate::token::{authenticate, recover_eth_sign, OwnerSigner};

/// Lifetime of a proof from the moment it is constructed.
pub const PROOF_TTL_SECS: u64 = 10 * 60;

/// Statement prefix of the signed relayer claim.
pub const PROOF_STATEMENT: &str = "This key relays transactions for the account owner.";

/// The claim a relayer signs about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerClaim {
    pub address: Address,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    /// Unix timestamp after which the claim should be considered stale.
    pub exp: u64,
}

/// A relayer attestation, constructed fresh per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOfRelayer {
    pub owner: Address,
    pub relayer: RelayerClaim,
    pub signature: Bytes,
    #[serde(rename = "safeDeployed")]
    pub safe_deployed: bool,
    #[serde(rename = "tokenRequest", skip_serializing_if = "Option::is_none")]
    pub token_request: Option<TokenRequest>,
    #[serde(
        rename = "tokenRequestSignature",
        skip_serializing_if = "Option::is_none"
    )]
    pub token_request_signature: Option<Bytes>,
}

/// The exact byte string a relayer signs for its claim.
pub fn proof_message(owner: Address, claim: &RelayerClaim) -> String {
    format!(
        "{PROOF_STATEMENT}\n\nOwner: {}\nRelayer: {}\nChain: {}\nExpires: {}",
        owner.to_string().to_lowercase(),
        claim.address.to_string().to_lowercase(),
        claim.chain_id,
        claim.exp,
    )
}

/// Sign a relayer claim with the relayer key.
pub(crate) async fn sign_claim(
    relayer: &dyn OwnerSigner,
    owner: Address,
    claim: &RelayerClaim,
) -> Result<Signature, RelayerError> {
    let message = proof_message(owner, claim);
    relayer.sign_message(message.as_bytes()).await
}

/// Off-chain verification of a proof: the claim signature must recover to
/// the claimed relayer address, and an undeployed proof must carry a token
/// that authenticates against the proof's owner for the claimed relayer.
///
/// Deliberately does not check `exp`; staleness policy belongs to the caller.
pub fn verify_proof(proof: &ProofOfRelayer) -> bool {
    let message = proof_message(proof.owner, &proof.relayer);
    match recover_eth_sign(message.as_bytes(), &proof.signature) {
        Some(signer) if signer == proof.relayer.address => {}
        _ => return false,
    }

    if proof.safe_deployed {
        return true;
    }

    let (Some(request), Some(signature)) =
        (&proof.token_request, &proof.token_request_signature)
    else {
        return false;
    };
    request.owner == proof.owner
        && request.device == proof.relayer.address
        && authenticate(request, signature)
}
