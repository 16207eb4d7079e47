//! 2FAuth-compatible HTTP account backend.

use std::time::Duration;

use async_trait::async_trait;
use otpview_core::config::ServerSettings;
use otpview_core::entities::{Account, AccountId};
use otpview_core::ports::AccountSource;
use otpview_core::Error;
use reqwest::Client;
use tracing::{debug, instrument};

/// Default timeout for backend requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const USER_AGENT: &str = concat!("otpview/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client used for backend requests
pub fn build_client() -> Result<Client, Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Network(format!("failed to create HTTP client: {}", e)))
}

/// Account source talking to a 2FAuth server with a personal access token
pub struct TwoFAuthAccountSource {
    client: Client,
    base_url: String,
    token: String,
}

impl TwoFAuthAccountSource {
    pub fn new(base_url: &str, token: &str) -> Result<Self, Error> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Fails with [`Error::NotConfigured`] unless both URL and token are set
    pub fn from_settings(settings: &ServerSettings) -> Result<Self, Error> {
        match (&settings.url, &settings.api_token) {
            (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => {
                Self::new(url, token)
            }
            _ => Err(Error::NotConfigured),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn request_failed(e: reqwest::Error) -> Error {
    Error::Network(format!("request failed: {}", e))
}

fn server_error(e: reqwest::Error) -> Error {
    Error::Backend(format!("server error: {}", e))
}

#[async_trait]
impl AccountSource for TwoFAuthAccountSource {
    #[instrument(skip(self), fields(server = %self.base_url))]
    async fn fetch_accounts(&self) -> Result<Vec<Account>, Error> {
        let accounts = self
            .client
            .get(self.url("/api/v1/twofaccounts"))
            .bearer_auth(&self.token)
            .query(&[("withOtp", "true")])
            .send()
            .await
            .map_err(request_failed)?
            .error_for_status()
            .map_err(server_error)?
            .json::<Vec<Account>>()
            .await
            .map_err(|e| Error::Backend(format!("parse error: {}", e)))?;

        debug!(count = accounts.len(), "received accounts");
        Ok(accounts)
    }

    #[instrument(skip(self), fields(server = %self.base_url))]
    async fn delete_account(&self, id: AccountId) -> Result<(), Error> {
        self.client
            .delete(self.url(&format!("/api/v1/twofaccounts/{}", id)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(request_failed)?
            .error_for_status()
            .map_err(server_error)?;

        debug!(%id, "account deleted");
        Ok(())
    }
}
