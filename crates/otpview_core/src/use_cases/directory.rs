use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, instrument, warn};

use crate::entities::{Account, AccountId};
use crate::error::Error;
use crate::ports::AccountSource;

/// In-memory view over the backend's accounts.
///
/// The latest list is published through a watch channel so readers such as
/// the countdown scheduler always see the current list at the moment they
/// look, never a snapshot captured earlier.
pub struct AccountDirectory<S>
where
    S: AccountSource,
{
    source: Arc<S>,
    accounts: watch::Sender<Vec<Account>>,
    search_query: RwLock<String>,
    last_error: RwLock<Option<String>>,
}

impl<S> AccountDirectory<S>
where
    S: AccountSource + 'static,
{
    pub fn new(source: Arc<S>) -> Self {
        let (accounts, _) = watch::channel(Vec::new());
        Self {
            source,
            accounts,
            search_query: RwLock::new(String::new()),
            last_error: RwLock::new(None),
        }
    }

    /// Receiver always holding the most recently fetched list
    pub fn subscribe(&self) -> watch::Receiver<Vec<Account>> {
        self.accounts.subscribe()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts.borrow().clone()
    }

    /// Reload accounts from the backend.
    ///
    /// On failure the previous list is kept and the error is recorded.
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<(), Error> {
        match self.source.fetch_accounts().await {
            Ok(accounts) => {
                debug!(count = accounts.len(), "accounts fetched");
                self.accounts.send_replace(accounts);
                *self.last_error.write().await = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch accounts");
                *self.last_error.write().await = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Delete an account, then reload the list
    #[instrument(skip(self))]
    pub async fn delete(&self, id: AccountId) -> Result<(), Error> {
        self.source.delete_account(id).await?;
        self.fetch().await
    }

    /// Fetch in a background task; failures are only logged.
    ///
    /// Suitable as the countdown scheduler's rollover callback.
    pub fn refresh_in_background(self: &Arc<Self>) {
        let directory = Arc::clone(self);
        tokio::spawn(async move {
            let _ = directory.fetch().await;
        });
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    pub async fn set_search_query(&self, query: &str) {
        *self.search_query.write().await = query.to_string();
    }

    /// Accounts matching the current search query (all when empty)
    pub async fn filtered(&self) -> Vec<Account> {
        let query = self.search_query.read().await;
        let accounts = self.accounts.borrow();
        if query.is_empty() {
            return accounts.to_vec();
        }
        accounts.iter().filter(|a| a.matches(&query)).cloned().collect()
    }
}
