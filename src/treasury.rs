//! Treasury RPC connection, grounded in the teacher's `ProviderCache`
//! pattern but collapsed to the single configured chain this bridge
//! targets (no multi-network registry).

use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;

use crate::errors::{CoreError, CoreResult};

/// Connects a read-only provider for log scanning / receipt lookups.
pub async fn connect_read_only(rpc_url: &str) -> CoreResult<DynProvider> {
    let url = rpc_url
        .parse()
        .map_err(|e| CoreError::config(format!("invalid TREASURY_RPC_URL: {e}")))?;
    let provider = ProviderBuilder::new().on_http(url);
    Ok(provider.erased())
}

/// Connects a wallet-backed provider able to send transactions (refunds,
/// onramp credit settlement).
pub async fn connect_sending(rpc_url: &str, private_key_hex: &str) -> CoreResult<(DynProvider, Address)> {
    let signer = PrivateKeySigner::from_str(private_key_hex.trim_start_matches("0x"))
        .map_err(|e| CoreError::config(format!("invalid TREASURY_PRIVATE_KEY: {e}")))?;
    let address = signer.address();
    let wallet = EthereumWallet::from(signer);
    let url = rpc_url
        .parse()
        .map_err(|e| CoreError::config(format!("invalid TREASURY_RPC_URL: {e}")))?;
    let provider = ProviderBuilder::new().wallet(wallet).on_http(url);
    Ok((provider.erased(), address))
}
