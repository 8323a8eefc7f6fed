//! Keeper transaction layer.
//!
//! This crate provides:
//! - Unsigned and signed transaction types exchanged with the RPC service
//! - The signing collaborator boundary (`Signer`) and an HTTP wallet signer
//! - Fee policy (named tier or explicit fee-per-cost) and fee estimators

pub mod fee;
mod signer;
mod transaction;

pub use fee::{FeeError, FeeEstimator, FeePolicy, FeeTier, FixedFeeEstimator, RpcFeeEstimator};
pub use signer::{KeyMaterial, Signer, SigningError, WalletSigner};
pub use transaction::{SignedTransaction, UnsignedTransaction};
