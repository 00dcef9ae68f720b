//! JungleBus HTTP client: authentication tokens, transaction and block header
//! lookups, and the out-of-band transaction fetch used by subscriptions.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::JungleBusError;
use crate::types::{
    AddressInfo, BlockHeader, JungleBusConfig, LoginRequest, SubscriptionTokenRequest,
    TokenResponse, Transaction,
};

/// Source of the auth token used by the subscription transport.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token, if any.
    fn token(&self) -> Option<String>;

    /// Obtain a fresh token from the server and remember it.
    async fn refresh_token(&self) -> Result<String, JungleBusError>;
}

/// Fetches a transaction body that was not inlined in a publication.
#[async_trait]
pub trait TransactionFetcher: Send + Sync {
    /// Raw transaction bytes for `txid`.
    async fn fetch_transaction(&self, txid: &str) -> Result<Vec<u8>, JungleBusError>;
}

/// HTTP client for the JungleBus API.
///
/// Clones share the auth token.
#[derive(Debug, Clone)]
pub struct JungleBusClient {
    /// Client configuration.
    config: JungleBusConfig,
    /// Current auth token.
    token: Arc<RwLock<Option<String>>>,
    /// Underlying HTTP client.
    client: reqwest::Client,
}

impl JungleBusClient {
    /// Create a new JungleBus client with the given configuration.
    pub fn new(config: JungleBusConfig) -> Self {
        let client = reqwest::Client::new();
        let token = Arc::new(RwLock::new(config.token.clone()));
        Self {
            config,
            token,
            client,
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &JungleBusConfig {
        &self.config
    }

    /// Current auth token.
    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the auth token used for all calls.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    /// Log in with a username and password and keep the returned token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, JungleBusError> {
        let body = LoginRequest { username, password };
        let resp: TokenResponse = self.do_post("user/login", &body).await?;
        self.set_token(resp.token.clone());
        Ok(resp.token)
    }

    /// Obtain an anonymous token scoped to a subscription ID and keep it.
    pub async fn get_token_from_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<String, JungleBusError> {
        let body = SubscriptionTokenRequest { id: subscription_id };
        let resp: TokenResponse = self.do_post("user/subscription-token", &body).await?;
        self.set_token(resp.token.clone());
        Ok(resp.token)
    }

    /// Exchange the current token for a fresh one and keep it.
    pub async fn refresh_token(&self) -> Result<String, JungleBusError> {
        let resp: TokenResponse = self.do_request("user/refresh-token").await?;
        debug!("refreshed JungleBus token");
        self.set_token(resp.token.clone());
        Ok(resp.token)
    }

    /// Get a transaction by its ID.
    pub async fn get_transaction(&self, txid: &str) -> Result<Transaction, JungleBusError> {
        let path = format!("transaction/get/{}", txid);
        self.do_request(&path).await
    }

    /// Get the raw bytes of a transaction by its ID.
    pub async fn get_transaction_bytes(&self, txid: &str) -> Result<Vec<u8>, JungleBusError> {
        let path = format!("transaction/get/{}/bin", txid);
        let resp = self.send_get(&path).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// Get address transaction metadata.
    pub async fn get_address_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<AddressInfo>, JungleBusError> {
        let path = format!("address/get/{}", address);
        self.do_request(&path).await
    }

    /// Get full transaction details for an address.
    pub async fn get_address_transaction_details(
        &self,
        address: &str,
    ) -> Result<Vec<Transaction>, JungleBusError> {
        let path = format!("address/transactions/{}", address);
        self.do_request(&path).await
    }

    /// Get a block header by hash or height.
    pub async fn get_block_header(&self, block: &str) -> Result<BlockHeader, JungleBusError> {
        let path = format!("block_header/get/{}", block);
        self.do_request(&path).await
    }

    /// List block headers starting from a given block.
    pub async fn get_block_headers(
        &self,
        from_block: &str,
        limit: u32,
    ) -> Result<Vec<BlockHeader>, JungleBusError> {
        let path = format!("block_header/list/{}?limit={}", from_block, limit);
        self.do_request(&path).await
    }

    /// Perform a GET request to the JungleBus API and deserialize the response.
    async fn do_request<T: DeserializeOwned>(&self, path: &str) -> Result<T, JungleBusError> {
        let resp = self.send_get(path).await?;
        let text = resp.text().await?;
        let parsed = serde_json::from_str(&text)?;
        Ok(parsed)
    }

    /// Perform a POST request with a JSON body and deserialize the response.
    async fn do_post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, JungleBusError> {
        let url = self.url(path);
        let resp = self
            .client
            .post(&url)
            .headers(self.build_headers())
            .json(body)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let text = resp.text().await?;
        let parsed = serde_json::from_str(&text)?;
        Ok(parsed)
    }

    async fn send_get(&self, path: &str) -> Result<reqwest::Response, JungleBusError> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .headers(self.build_headers())
            .send()
            .await?;
        Self::check_status(resp).await
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, JungleBusError> {
        let status = resp.status();

        if status.as_u16() == 404 {
            return Err(JungleBusError::NotFound);
        }

        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(JungleBusError::ServerError {
                status_code: status.as_u16(),
                message,
            });
        }

        Ok(resp)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base_url(), path)
    }

    /// Build common headers from the current token.
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(token) = self.token() {
            if let Ok(val) = HeaderValue::from_str(&token) {
                headers.insert("token", val);
            }
        }

        headers
    }
}

#[async_trait]
impl TokenProvider for JungleBusClient {
    fn token(&self) -> Option<String> {
        JungleBusClient::token(self)
    }

    async fn refresh_token(&self) -> Result<String, JungleBusError> {
        JungleBusClient::refresh_token(self).await
    }
}

#[async_trait]
impl TransactionFetcher for JungleBusClient {
    async fn fetch_transaction(&self, txid: &str) -> Result<Vec<u8>, JungleBusError> {
        self.get_transaction_bytes(txid).await
    }
}
