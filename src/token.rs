// SPDX-License-Identifier: AGPL-3.0-or-later

//! Owner-signed device-authorization tokens.
//!
//! A token is the owner's `personal_sign` signature over a canonical
//! human-readable statement naming the device being authorized. The locally
//! reconstructed statement is the authoritative encoding; the verifying
//! contract rebuilds the exact same byte string. Tokens are created without
//! any network round trip so mobile wallets are not bounced through extra
//! requests before the signing prompt.

use alloy::primitives::utils::eip191_hash_message;
use alloy::primitives::{Address, Bytes, Signature, U256};
use futures::future::BoxFuture;

use crate::contracts::TokenRequest;
use crate::error::RelayerError;

/// Smallest canonical ECDSA recovery id on Ethereum.
const MIN_VALID_V: u8 = 27;

/// Offset flagging a signature as `eth_sign` (personal-sign) encoded to the
/// verifying contract, distinguishing it from typed-data signatures.
const ETH_SIGN_V_OFFSET: u8 = 4;

/// Statement the owner signs to authorize a device.
pub const TOKEN_STATEMENT: &str =
    "I authorize this device to relay transactions on my behalf.";

/// Externally supplied signing capability of the account owner.
///
/// The relay subsystem never sees the owner's key material, only the address
/// and the signatures it produces. Implemented for every alloy signer.
pub trait OwnerSigner: Send + Sync {
    /// Address of the owner key.
    fn address(&self) -> Address;

    /// Sign `message` with `personal_sign` (EIP-191) semantics.
    fn sign_message<'a>(
        &'a self,
        message: &'a [u8],
    ) -> BoxFuture<'a, Result<Signature, RelayerError>>;
}

impl<S> OwnerSigner for S
where
    S: alloy::signers::Signer + Send + Sync,
{
    fn address(&self) -> Address {
        alloy::signers::Signer::address(self)
    }

    fn sign_message<'a>(
        &'a self,
        message: &'a [u8],
    ) -> BoxFuture<'a, Result<Signature, RelayerError>> {
        Box::pin(async move {
            alloy::signers::Signer::sign_message(self, message)
                .await
                .map_err(|err| RelayerError::Signing(err.to_string()))
        })
    }
}

/// A created device-authorization token: the ABI request body plus the
/// owner's adjusted signature over the canonical statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token_request: TokenRequest,
    pub signature: Bytes,
}

/// The exact byte string the owner signs for a token request: the statement,
/// fixed separators, lower-cased addresses and the decimal issuance time.
pub fn statement_to_sign(request: &TokenRequest) -> String {
    format!(
        "{TOKEN_STATEMENT}\n\nOwner: {}\nDevice: {}\nIssued at: {}",
        lowercase(request.owner),
        lowercase(request.device),
        request.issuedAt,
    )
}

/// Build and sign a token authorizing `device` on behalf of the owner.
///
/// Signing failure (typically the owner declining the prompt) is wrapped into
/// an opaque [`RelayerError::TokenCreation`].
pub async fn create_token(
    owner: &dyn OwnerSigner,
    device: Address,
    issued_at: U256,
) -> Result<AuthToken, RelayerError> {
    let token_request = TokenRequest {
        owner: owner.address(),
        device,
        issuedAt: issued_at,
    };
    let statement = statement_to_sign(&token_request);
    let signature = owner
        .sign_message(statement.as_bytes())
        .await
        .map_err(|err| {
            tracing::warn!(%err, "owner did not sign the authorization statement");
            RelayerError::TokenCreation
        })?;

    Ok(AuthToken {
        token_request,
        signature: eth_sign_encode(&signature),
    })
}

/// Verify a token signature against its claimed owner.
///
/// Rebuilds the signed byte string from the request, recovers the signer and
/// compares it to `request.owner`. Malformed signatures return `false`
/// rather than erroring; this is the same check the verifying contract
/// performs, usable by any off-chain verifier.
pub fn authenticate(request: &TokenRequest, signature: &[u8]) -> bool {
    let statement = statement_to_sign(request);
    match recover_eth_sign(statement.as_bytes(), signature) {
        Some(signer) => signer == request.owner,
        None => false,
    }
}

/// Encode a signature the way the verifying contract expects `eth_sign`
/// signatures: recovery byte lifted to 27/28 if the wallet returned 0/1,
/// then offset by 4 to flag personal-sign encoding.
pub(crate) fn eth_sign_encode(signature: &Signature) -> Bytes {
    let mut bytes = signature.as_bytes();
    if bytes[64] < MIN_VALID_V {
        bytes[64] += MIN_VALID_V;
    }
    bytes[64] += ETH_SIGN_V_OFFSET;
    Bytes::copy_from_slice(&bytes)
}

/// Recover the address that personal-signed `message`, accepting recovery
/// bytes in any of the 0/1, 27/28 or eth_sign-flagged 31/32 encodings.
pub(crate) fn recover_eth_sign(message: &[u8], signature: &[u8]) -> Option<Address> {
    if signature.len() != 65 {
        return None;
    }
    let mut v = signature[64];
    if v >= MIN_VALID_V + ETH_SIGN_V_OFFSET {
        v -= ETH_SIGN_V_OFFSET;
    }
    if v >= MIN_VALID_V {
        v -= MIN_VALID_V;
    }
    if v > 1 {
        return None;
    }

    let signature = Signature::new(
        U256::from_be_slice(&signature[..32]),
        U256::from_be_slice(&signature[32..64]),
        v == 1,
    );
    signature
        .recover_address_from_prehash(&eip191_hash_message(message))
        .ok()
}

fn lowercase(address: Address) -> String {
    address.to_string().to_lowercase()
}
