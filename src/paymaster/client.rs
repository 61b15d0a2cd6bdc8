use alloy_primitives::{Address, B256, Bytes, TxHash, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use dashmap::DashMap;
use rand::{Rng, rng};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::chain::ChainId;
use crate::config::PaymasterConfig;
use crate::paymaster::CapabilityProbe;
use crate::transaction::{SubmissionError, SubmissionErrorCause, TransactionData};

/// Response of `GET /paymaster-info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterInfo {
    pub can_sponsor_transactions: bool,
}

sol! {
    /// Typed data the account signs to have the paymaster relay and pay for a call.
    struct SponsoredCall {
        address from;
        address to;
        uint256 value;
        bytes data;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// EIP-712 domain name of [`SponsoredCall`] signatures.
pub const SPONSOR_DOMAIN_NAME: &str = "GaslessPaymaster";
/// EIP-712 domain version of [`SponsoredCall`] signatures.
pub const SPONSOR_DOMAIN_VERSION: &str = "1";

/// Signing domain for sponsored calls on `chain_id`.
pub fn sponsor_domain(chain_id: u64) -> Eip712Domain {
    eip712_domain! {
        name: SPONSOR_DOMAIN_NAME,
        version: SPONSOR_DOMAIN_VERSION,
        chain_id: chain_id,
    }
}

/// Body of `POST /sponsor`: a transaction the paymaster is asked to pay for.
///
/// `signature` is the account's signature over [`SponsorRequest::signing_hash`].
/// The random `nonce` makes every request unique, and the paymaster rejects it
/// outside `[valid_after, valid_before]` (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorRequest {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: B256,
    pub signature: Bytes,
}

impl SponsorRequest {
    /// How long a signed request stays valid.
    pub const VALIDITY: Duration = Duration::from_secs(10 * 60);
    /// Allowed clock skew between the account and the paymaster.
    pub const CLOCK_SKEW: Duration = Duration::from_secs(10 * 60);

    /// Unsigned request for `tx` with a fresh nonce, valid from `now` (minus
    /// clock skew) for [`SponsorRequest::VALIDITY`].
    pub fn unsigned(chain_id: u64, from: Address, tx: &TransactionData, now: u64) -> Self {
        let nonce: [u8; 32] = rng().random();
        Self {
            chain_id,
            from,
            to: tx.to,
            data: tx.data.clone(),
            value: tx.value,
            valid_after: now.saturating_sub(Self::CLOCK_SKEW.as_secs()),
            valid_before: now + Self::VALIDITY.as_secs(),
            nonce: B256::from(nonce),
            signature: Bytes::new(),
        }
    }

    /// EIP-712 hash of the request under [`sponsor_domain`]. Ignores `signature`.
    pub fn signing_hash(&self) -> B256 {
        let call = SponsoredCall {
            from: self.from,
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            validAfter: U256::from(self.valid_after),
            validBefore: U256::from(self.valid_before),
            nonce: self.nonce,
        };
        call.eip712_signing_hash(&sponsor_domain(self.chain_id))
    }
}

/// Response of a successful `POST /sponsor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorResponse {
    pub transaction_hash: TxHash,
}

/// Error body returned by the paymaster on a non-200 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymasterErrorBody {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Errors that can occur while talking to the paymaster.
#[derive(Debug, thiserror::Error)]
pub enum PaymasterError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Paymaster refused: {code}: {message}")]
    Rejected { code: String, message: String },
}

impl From<PaymasterError> for SubmissionError {
    fn from(value: PaymasterError) -> Self {
        let cause = match &value {
            PaymasterError::Http { .. } => SubmissionErrorCause::Network,
            PaymasterError::Rejected { code, .. } => SubmissionErrorCause::from_code(code),
            _ => SubmissionErrorCause::Other,
        };
        SubmissionError::new(cause, value.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
struct SponsorshipCacheEntry {
    can_sponsor: bool,
    fetched_at: Instant,
}

/// Per-chain cache of [`PaymasterInfo::can_sponsor_transactions`].
///
/// Clones share the same state. With no TTL an entry lives until it is
/// overwritten by a refetch.
#[derive(Debug, Clone)]
pub struct SponsorshipCache {
    ttl: Option<Duration>,
    entries: Arc<DashMap<ChainId, SponsorshipCacheEntry>>,
}

impl SponsorshipCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Returns the cached answer for `chain_id` if present and not expired.
    pub fn get(&self, chain_id: ChainId) -> Option<bool> {
        let entry = *self.entries.get(&chain_id)?;
        match self.ttl {
            Some(ttl) if entry.fetched_at.elapsed() >= ttl => None,
            _ => Some(entry.can_sponsor),
        }
    }

    pub fn set(&self, chain_id: ChainId, can_sponsor: bool) {
        self.entries.insert(
            chain_id,
            SponsorshipCacheEntry {
                can_sponsor,
                fetched_at: Instant::now(),
            },
        );
    }
}

/// HTTP client for the paymaster service.
///
/// Handles `GET /paymaster-info` (capability probe) and `POST /sponsor` (relay).
#[derive(Clone, Debug)]
pub struct PaymasterClient {
    base_url: Url,
    info_url: Url,
    sponsor_url: Url,
    client: Client,
    timeout: Option<Duration>,
    cache: SponsorshipCache,
}

impl PaymasterClient {
    /// Default TTL for cached capability answers.
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

    pub fn try_new(base_url: Url) -> Result<Self, PaymasterError> {
        let info_url =
            base_url
                .join("./paymaster-info")
                .map_err(|e| PaymasterError::UrlParse {
                    context: "Failed to construct ./paymaster-info URL",
                    source: e,
                })?;
        let sponsor_url = base_url
            .join("./sponsor")
            .map_err(|e| PaymasterError::UrlParse {
                context: "Failed to construct ./sponsor URL",
                source: e,
            })?;
        Ok(Self {
            base_url,
            info_url,
            sponsor_url,
            client: Client::new(),
            timeout: None,
            cache: SponsorshipCache::new(Some(Self::DEFAULT_CACHE_TTL)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn cache(&self) -> &SponsorshipCache {
        &self.cache
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    /// Replaces the capability cache. `None` keeps answers until refetched.
    pub fn with_cache_ttl(&self, ttl: Option<Duration>) -> Self {
        let mut this = self.clone();
        this.cache = SponsorshipCache::new(ttl);
        this
    }

    /// Sends `GET /paymaster-info?chainId=..`, bypassing the cache.
    #[tracing::instrument(name = "paymaster.info", skip(self), fields(chain = %chain_id), err)]
    pub async fn paymaster_info(&self, chain_id: ChainId) -> Result<PaymasterInfo, PaymasterError> {
        let context = "GET /paymaster-info";
        let mut req = self
            .client
            .get(self.info_url.clone())
            .query(&[("chainId", chain_id.inner())]);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| PaymasterError::Http { context, source: e })?;
        if http_response.status() == StatusCode::OK {
            http_response
                .json::<PaymasterInfo>()
                .await
                .map_err(|e| PaymasterError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| PaymasterError::ResponseBodyRead { context, source: e })?;
            Err(PaymasterError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }

    /// Sends `POST /sponsor` and returns the hash of the relayed transaction.
    ///
    /// A non-200 response carrying a `{code, message}` body is reported as
    /// [`PaymasterError::Rejected`].
    #[tracing::instrument(name = "paymaster.sponsor", skip_all, fields(chain = request.chain_id, from = %request.from), err)]
    pub async fn sponsor(&self, request: &SponsorRequest) -> Result<SponsorResponse, PaymasterError> {
        let context = "POST /sponsor";
        let mut req = self.client.post(self.sponsor_url.clone()).json(request);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| PaymasterError::Http { context, source: e })?;
        if http_response.status() == StatusCode::OK {
            return http_response
                .json::<SponsorResponse>()
                .await
                .map_err(|e| PaymasterError::JsonDeserialization { context, source: e });
        }
        let status = http_response.status();
        let body = http_response
            .text()
            .await
            .map_err(|e| PaymasterError::ResponseBodyRead { context, source: e })?;
        match serde_json::from_str::<PaymasterErrorBody>(&body) {
            Ok(PaymasterErrorBody { code, message }) => Err(PaymasterError::Rejected { code, message }),
            Err(_) => Err(PaymasterError::HttpStatus {
                context,
                status,
                body,
            }),
        }
    }
}

impl CapabilityProbe for PaymasterClient {
    type Error = PaymasterError;

    async fn can_sponsor(&self, chain_id: ChainId) -> Result<bool, Self::Error> {
        if let Some(can_sponsor) = self.cache.get(chain_id) {
            return Ok(can_sponsor);
        }
        tracing::debug!(chain = %chain_id, "paymaster.cache_miss");
        self.refetch(chain_id).await
    }

    async fn refetch(&self, chain_id: ChainId) -> Result<bool, Self::Error> {
        let info = self.paymaster_info(chain_id).await?;
        self.cache.set(chain_id, info.can_sponsor_transactions);
        Ok(info.can_sponsor_transactions)
    }
}

/// Converts a string URL into a `PaymasterClient`, normalizing the trailing slash.
impl TryFrom<&str> for PaymasterClient {
    type Error = PaymasterError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| PaymasterError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        PaymasterClient::try_new(url)
    }
}

/// Builds the client from the `paymaster` section of the config file.
impl TryFrom<&PaymasterConfig> for PaymasterClient {
    type Error = PaymasterError;

    fn try_from(config: &PaymasterConfig) -> Result<Self, Self::Error> {
        let client = PaymasterClient::try_from(config.url().as_str())?.with_cache_ttl(config.cache_ttl());
        Ok(match config.timeout() {
            Some(timeout) => client.with_timeout(timeout),
            None => client,
        })
    }
}
