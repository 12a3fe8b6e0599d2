//! Authorize against PocketBase with a superuser identity and password.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::util::{check_status, ServerError};

/// How long an issued token is trusted before a fresh exchange is forced.
/// PocketBase does not report a lifetime alongside the token, so this stays
/// below the server-side default (one hour) with room to spare.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(50 * 60);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("auth rejected: {0}")]
    Server(#[from] ServerError),
}

pub struct PasswordCredentials {
    pub client: reqwest::Client,
    pub base_url: String,
    pub identity: String,
    pub password: String,
    /// Locally assumed token lifetime, since the server does not state one.
    pub token_ttl: Duration,
}

impl PasswordCredentials {
    /// Trade the identity/secret pair for a short-lived bearer token.
    ///
    /// A rejected exchange surfaces the HTTP status and nothing is retried.
    pub async fn perform(&self) -> Result<AuthResponse, Error> {
        let params = &[
            ("identity", self.identity.as_str()),
            ("password", self.password.as_str()),
        ];
        let params = serde_urlencoded::to_string(params).expect("string pairs always encode");

        let url = format!(
            "{}/api/collections/_superusers/auth-with-password",
            self.base_url
        );

        let req = self
            .client
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(params)
            .build()?;

        let res = self.client.execute(req).await?;
        check_status(&res)?;
        let auth_response = res.json().await?;
        Ok(auth_response)
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    /// The issued bearer token, sent verbatim in `Authorization` headers.
    token: String,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: String,
    pub expires_at: Instant,
}

impl Token {
    fn issue(auth: AuthResponse, ttl: Duration) -> Self {
        Self {
            access_token: auth.token,
            expires_at: Instant::now() + ttl,
        }
    }
}

#[async_trait::async_trait]
impl super::TokenProvider for PasswordCredentials {
    type Token = Token;
    type Error = Error;

    async fn get_auth_token(&self) -> Result<Self::Token, Self::Error> {
        let auth_response = self.perform().await?;
        let token = Token::issue(auth_response, self.token_ttl);
        Ok(token)
    }
}

impl super::Token for Token {
    fn access_token(&self) -> &str {
        self.access_token.as_str()
    }
}

impl super::ExpiringToken for Token {
    fn expires_at(&self) -> Instant {
        self.expires_at
    }
}
