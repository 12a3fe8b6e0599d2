use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::TokenProvider;

/// Caches the token issued by the wrapped provider and renews it once its
/// expiry passes. The lock is held across the renewal, so concurrent callers
/// wait for the single in-flight exchange instead of issuing their own.
pub struct TokenManager<Provider>
where
    Provider: TokenProvider,
{
    provider: Provider,
    cached_token: Mutex<Option<Record>>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error<RenewalError> {
    #[error("token provider: {0}")]
    Provider(#[source] RenewalError),
}

#[derive(Debug, Clone)]
pub struct Record {
    pub access_token: String,
    pub expires_at: Instant,
}

impl Record {
    pub fn from_expiring_token<T: super::ExpiringToken>(token: T) -> Self {
        Self {
            access_token: token.access_token().to_owned(),
            expires_at: token.expires_at(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

impl super::Token for Record {
    fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl<Provider> TokenManager<Provider>
where
    Provider: TokenProvider,
    <Provider as TokenProvider>::Token: super::ExpiringToken,
{
    pub fn new(provider: Provider) -> Self {
        let cached_token = Mutex::const_new(None);
        Self {
            provider,
            cached_token,
        }
    }

    async fn fetch_new_token(&self) -> Result<Record, Error<Provider::Error>> {
        let token = self
            .provider
            .get_auth_token()
            .await
            .map_err(Error::Provider)?;
        let record = Record::from_expiring_token(token);
        Ok(record)
    }

    /// A failed renewal leaves the cache as it was.
    pub async fn get_token(&self) -> Result<Record, Error<Provider::Error>> {
        let mut cached_token = self.cached_token.lock().await;

        if let Some(ref cached_token) = *cached_token {
            if !cached_token.is_expired() {
                debug!(message = "Using preexisting token", token_expires_at = ?cached_token.expires_at);
                return Ok(cached_token.clone());
            }
            debug!(message = "Existing token expired, refreshing", token_expires_at = ?cached_token.expires_at);
        }

        info!(
            message = "No active token found, about to get a new one",
            token_is_stale = cached_token.is_some(),
        );

        let new_record = self.fetch_new_token().await?;
        cached_token.replace(new_record.clone());

        debug!(message = "Got new token", token_expires_at = ?new_record.expires_at);

        Ok(new_record)
    }
}

#[async_trait::async_trait]
impl<Provider> super::TokenProvider for TokenManager<Provider>
where
    Provider: TokenProvider,
    <Provider as TokenProvider>::Token: super::ExpiringToken,
{
    type Token = Record;
    type Error = Error<Provider::Error>;

    async fn get_auth_token(&self) -> Result<Self::Token, Self::Error> {
        let token = self.get_token().await?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::super::password_credentials;
    use super::*;
    use crate::util::ServerError;

    /// Issues `token-{n}` with the given lifetime and counts the exchanges.
    struct CountingProvider {
        exchanges: AtomicUsize,
        ttl: Duration,
    }

    impl CountingProvider {
        fn with_ttl(ttl: Duration) -> Self {
            Self {
                exchanges: AtomicUsize::new(0),
                ttl,
            }
        }
    }

    #[async_trait::async_trait]
    impl TokenProvider for CountingProvider {
        type Token = password_credentials::Token;
        type Error = password_credentials::Error;

        async fn get_auth_token(&self) -> Result<Self::Token, Self::Error> {
            let n = self.exchanges.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(password_credentials::Token {
                access_token: format!("token-{}", n),
                expires_at: Instant::now() + self.ttl,
            })
        }
    }

    /// Rejects the first exchange with a 401, then behaves.
    struct FlakyProvider {
        exchanges: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TokenProvider for FlakyProvider {
        type Token = password_credentials::Token;
        type Error = password_credentials::Error;

        async fn get_auth_token(&self) -> Result<Self::Token, Self::Error> {
            let n = self.exchanges.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Err(password_credentials::Error::Server(ServerError {
                    status_code: 401,
                }));
            }
            Ok(password_credentials::Token {
                access_token: "recovered".into(),
                expires_at: Instant::now() + Duration::from_secs(3600),
            })
        }
    }

    #[tokio::test]
    async fn live_token_is_reused_without_an_exchange() {
        let manager = TokenManager::new(CountingProvider::with_ttl(Duration::from_secs(3600)));

        let first = manager.get_token().await.unwrap();
        let second = manager.get_token().await.unwrap();

        assert_eq!(first.access_token, second.access_token);
        assert_eq!(manager.provider.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_token_is_replaced() {
        let manager = TokenManager::new(CountingProvider::with_ttl(Duration::ZERO));

        let first = manager.get_token().await.unwrap();
        let second = manager.get_token().await.unwrap();

        assert_ne!(first.access_token, second.access_token);
        assert_eq!(manager.provider.exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_exchange_propagates_and_leaves_the_cache_empty() {
        let manager = TokenManager::new(FlakyProvider {
            exchanges: AtomicUsize::new(0),
        });

        let err = manager.get_token().await.unwrap_err();
        let Error::Provider(password_credentials::Error::Server(server)) = err else {
            panic!("expected the auth rejection to surface");
        };
        assert_eq!(server.status_code, 401);

        // Nothing was cached, so the next call performs a fresh exchange.
        let token = manager.get_token().await.unwrap();
        assert_eq!(token.access_token, "recovered");
        assert_eq!(manager.provider.exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_exchange() {
        let manager = TokenManager::new(CountingProvider::with_ttl(Duration::from_secs(3600)));

        let (first, second) = tokio::join!(manager.get_token(), manager.get_token());

        assert_eq!(
            first.unwrap().access_token,
            second.unwrap().access_token
        );
        assert_eq!(manager.provider.exchanges.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn record_expiry_is_checked_against_now() {
        let live = Record {
            access_token: "a".into(),
            expires_at: Instant::now() + Duration::from_secs(60),
        };
        assert!(!live.is_expired());

        let stale = Record {
            access_token: "b".into(),
            expires_at: Instant::now(),
        };
        assert!(stale.is_expired());
    }
}
