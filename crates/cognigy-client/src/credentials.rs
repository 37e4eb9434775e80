//! Credential resolution.
//!
//! A session needs a bearer token. It is either handed in directly or minted
//! once through the backend's `/loginDevice` exchange.

use crate::error::AuthError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

const LOGIN_DEVICE_PATH: &str = "/loginDevice";

/// A resolved bearer token. Immutable once issued.
#[derive(Clone, Debug)]
pub struct Token(SecretString);

impl Token {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// What the caller knows about its identity on the backend.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// Base URL of the backend, used for the credential exchange.
    pub endpoint: String,
    pub token: Option<SecretString>,
    pub user: Option<String>,
    pub api_key: Option<SecretString>,
    pub channel: Option<String>,
}

impl Credentials {
    /// Credentials carrying a pre-issued token.
    pub fn with_token(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: Some(SecretString::from(token.into())),
            user: None,
            api_key: None,
            channel: None,
        }
    }

    /// Credentials from which a token is minted via `/loginDevice`.
    pub fn with_identity(
        endpoint: impl Into<String>,
        user: impl Into<String>,
        api_key: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            user: Some(user.into()),
            api_key: Some(SecretString::from(api_key.into())),
            channel: Some(channel.into()),
        }
    }

    fn preissued_token(&self) -> Option<Token> {
        self.token
            .as_ref()
            .map(|token| token.expose_secret())
            .filter(|token| !token.is_empty())
            .map(Token::new)
    }

    fn login_request(&self) -> Result<LoginRequest<'_>, AuthError> {
        let user = non_empty(self.user.as_deref()).ok_or(AuthError::MissingIdentity("user"))?;
        let apikey = non_empty(self.api_key.as_ref().map(|key| key.expose_secret()))
            .ok_or(AuthError::MissingIdentity("apikey"))?;
        let channel =
            non_empty(self.channel.as_deref()).ok_or(AuthError::MissingIdentity("channel"))?;
        Ok(LoginRequest {
            user,
            apikey,
            channel,
        })
    }

    fn login_url(&self) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), LOGIN_DEVICE_PATH)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    user: &'a str,
    apikey: &'a str,
    channel: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Turns [`Credentials`] into a [`Token`].
///
/// A token that is already present is returned as-is without any network call.
/// Otherwise exactly one `/loginDevice` request is made; there is no retry.
#[derive(Clone, Debug, Default)]
pub struct CredentialResolver {
    http: reqwest::Client,
}

impl CredentialResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    #[instrument(skip_all, fields(endpoint = %credentials.endpoint))]
    pub async fn resolve(&self, credentials: &Credentials) -> Result<Token, AuthError> {
        if let Some(token) = credentials.preissued_token() {
            return Ok(token);
        }

        let body = credentials.login_request()?;
        let resp = self
            .http
            .post(credentials.login_url())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "credential exchange rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let data: LoginResponse = resp.json().await?;
        match data.token.filter(|token| !token.is_empty()) {
            Some(token) => {
                info!("credential exchange succeeded");
                Ok(Token::new(token))
            }
            None => {
                warn!("credential exchange returned no token");
                Err(AuthError::NoToken)
            }
        }
    }
}
