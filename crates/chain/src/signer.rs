//! Signing collaborator boundary.
//!
//! Key derivation and signature aggregation live outside the keeper. The
//! keeper only holds opaque key material and hands unsigned bundles to a
//! [`Signer`].

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::transaction::{SignedTransaction, UnsignedTransaction};

/// Errors raised while signing. Fatal for the transaction being signed only.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signer at {url} unavailable: {message}")]
    Unavailable { url: String, message: String },

    #[error("signer refused the bundle: {0}")]
    Refused(String),

    #[error("signer misconfigured: {0}")]
    Config(String),
}

/// Private key material. Never printed, never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    secret: Vec<u8>,
}

impl KeyMaterial {
    /// Parse a 32-byte secret key from hex (with or without `0x` prefix).
    pub fn from_hex(s: &str) -> Result<Self, SigningError> {
        let trimmed = s.trim().trim_start_matches("0x");
        let secret =
            hex::decode(trimmed).map_err(|e| SigningError::InvalidKey(format!("not hex: {e}")))?;
        if secret.len() != 32 {
            return Err(SigningError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                secret.len()
            )));
        }
        Ok(Self { secret })
    }

    pub(crate) fn to_hex(&self) -> String {
        hex::encode(&self.secret)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Signs unsigned bundles on behalf of the keeper wallet.
#[async_trait]
pub trait Signer: Send + Sync + fmt::Debug {
    /// Public key the builders should target for this key.
    async fn public_key(&self, key: &KeyMaterial) -> Result<String, SigningError>;

    async fn sign(
        &self,
        tx: &UnsignedTransaction,
        key: &KeyMaterial,
    ) -> Result<SignedTransaction, SigningError>;

    /// Signer name for logging.
    fn signer_name(&self) -> &'static str;
}

/// Signer backed by a wallet daemon listening on the local machine.
///
/// Key material is sent in the request body, so only loopback URLs are
/// accepted.
#[derive(Debug, Clone)]
pub struct WalletSigner {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct KeyRequest<'a> {
    secret_key: &'a str,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    bundle: &'a serde_json::Value,
    secret_key: &'a str,
}

#[derive(Deserialize)]
struct PublicKeyResponse {
    public_key: String,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

impl WalletSigner {
    /// Create a wallet signer for a loopback URL such as `http://127.0.0.1:9256`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SigningError> {
        let url: String = url.into();
        let url = url.trim_end_matches('/').to_string();
        if !is_loopback(&url) {
            return Err(SigningError::Config(format!(
                "signer URL must point at localhost, got {url}"
            )));
        }
        info!(url = %url, "Wallet signer configured");
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        })
    }

    async fn call<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SigningError> {
        let url = format!("{}{}", self.url, path);
        let unavailable = |message: String| SigningError::Unavailable {
            url: url.clone(),
            message,
        };

        // One deadline covers the request and reading the whole response.
        let exchange = async {
            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| unavailable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(if status.is_server_error() {
                    unavailable(format!("HTTP {status}: {body}"))
                } else {
                    SigningError::Refused(format!("HTTP {status}: {body}"))
                });
            }
            response
                .json::<T>()
                .await
                .map_err(|e| SigningError::Refused(format!("malformed signer response: {e}")))
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| unavailable(format!("timed out after {}s", self.timeout.as_secs())))?
    }
}

#[async_trait]
impl Signer for WalletSigner {
    async fn public_key(&self, key: &KeyMaterial) -> Result<String, SigningError> {
        let secret = key.to_hex();
        let response: PublicKeyResponse = self
            .call("/public_key", &KeyRequest { secret_key: &secret })
            .await?;
        Ok(response.public_key)
    }

    async fn sign(
        &self,
        tx: &UnsignedTransaction,
        key: &KeyMaterial,
    ) -> Result<SignedTransaction, SigningError> {
        let secret = key.to_hex();
        let response: SignResponse = self
            .call(
                "/sign",
                &SignRequest {
                    bundle: &tx.bundle,
                    secret_key: &secret,
                },
            )
            .await?;
        debug!(cost = tx.cost, fee = tx.fee(), "Bundle signed");
        Ok(SignedTransaction {
            bundle: tx.bundle.clone(),
            signature: response.signature,
        })
    }

    fn signer_name(&self) -> &'static str {
        "wallet"
    }
}

fn is_loopback(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    match parsed.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}
