use crate::{Error, Result};
use reqwest::Client as HttpClient;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;
use wagerbook_types::{
    api::{
        AdminLogin, AdminSessionResponse, Adjustment, Credentials, ErrorResponse,
        HealthzResponse, MaxBet, SessionResponse, ADMIN_TOKEN_HEADER,
    },
    Amount, BetReceipt, BetSlip, HouseSummary, PlayerAccount, PlayerId,
};

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy for transient HTTP failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
    /// Whether non-idempotent requests (e.g., a bet) may be retried.
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            retry_non_idempotent: false,
        }
    }
}

/// Wagerbook API client.
///
/// Holds at most one player session and one admin session; the sign-in and admin login
/// calls fill them in.
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub http_client: HttpClient,

    retry_policy: RetryPolicy,
    session: Option<String>,
    admin_token: Option<String>,
}

impl Client {
    #[allow(clippy::result_large_err)]
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidScheme(scheme.to_string())),
        }

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url,
            http_client,
            retry_policy: RetryPolicy::default(),
            session: None,
            admin_token: None,
        })
    }

    /// Returns a copy of the current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Sets the retry policy for subsequent HTTP requests.
    pub fn set_retry_policy(&mut self, retry_policy: RetryPolicy) {
        self.retry_policy = retry_policy;
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Reuses a player session token obtained elsewhere.
    pub fn set_session_token(&mut self, token: Option<String>) {
        self.session = token;
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    pub fn set_admin_token(&mut self, token: Option<String>) {
        self.admin_token = token;
    }

    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let max_attempts =
            if method == reqwest::Method::GET || self.retry_policy.retry_non_idempotent {
                self.retry_policy.max_attempts.max(1)
            } else {
                1
            };

        let mut attempt = 0usize;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            attempt += 1;
            let result = make_request().send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }
                    debug!(%status, attempt, "retrying request");
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                    debug!(?err, attempt, "retrying request");
                }
            }

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, auth: Auth<'_>) -> Result<T> {
        let url = self.base_url.join(path)?;
        let response = self
            .send_with_retry(reqwest::Method::GET, || {
                auth.apply(self.http_client.get(url.clone()))
            })
            .await?;
        decode(response).await
    }

    async fn send_json<B, T>(
        &self,
        method: reqwest::Method,
        path: &str,
        auth: Auth<'_>,
        body: &B,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.base_url.join(path)?;
        self.send_json_to(method, url, auth, body).await
    }

    async fn send_json_to<B, T>(
        &self,
        method: reqwest::Method,
        url: Url,
        auth: Auth<'_>,
        body: &B,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(%method, %url, "sending request");
        let response = self
            .send_with_retry(method.clone(), || {
                auth.apply(self.http_client.request(method.clone(), url.clone()))
                    .json(body)
            })
            .await?;
        decode(response).await
    }

    async fn post_empty(&self, path: &str, auth: Auth<'_>) -> Result<()> {
        let url = self.base_url.join(path)?;
        let response = self
            .send_with_retry(reqwest::Method::POST, || {
                auth.apply(self.http_client.post(url.clone()))
            })
            .await?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        Ok(())
    }

    fn player_auth(&self) -> Result<Auth<'_>> {
        self.session
            .as_deref()
            .map(Auth::Player)
            .ok_or(Error::NotSignedIn)
    }

    fn admin_auth(&self) -> Result<Auth<'_>> {
        self.admin_token
            .as_deref()
            .map(Auth::Admin)
            .ok_or(Error::NotAdmin)
    }

    pub async fn healthz(&self) -> Result<bool> {
        let health: HealthzResponse = self.get_json("healthz", Auth::None).await?;
        Ok(health.ok)
    }

    /// Creates an account and keeps the returned session.
    pub async fn sign_up(&mut self, email: &str, password: &str) -> Result<PlayerId> {
        self.authenticate("auth/sign-up", email, password).await
    }

    /// Signs in and keeps the returned session.
    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<PlayerId> {
        self.authenticate("auth/sign-in", email, password).await
    }

    async fn authenticate(&mut self, path: &str, email: &str, password: &str) -> Result<PlayerId> {
        let credentials = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: SessionResponse = self
            .send_json(reqwest::Method::POST, path, Auth::None, &credentials)
            .await?;
        info!(player = %response.player, "signed in");
        self.session = Some(response.token);
        Ok(response.player)
    }

    pub async fn sign_out(&mut self) -> Result<()> {
        self.post_empty("auth/sign-out", self.player_auth()?).await?;
        self.session = None;
        Ok(())
    }

    /// The signed-in player's account, created with a zero balance on first read.
    pub async fn me(&self) -> Result<PlayerAccount> {
        self.get_json("player/me", self.player_auth()?).await
    }

    pub async fn max_bet(&self) -> Result<Amount> {
        let config: MaxBet = self.get_json("config", Auth::None).await?;
        Ok(config.max_bet)
    }

    pub async fn place_bet(&self, slip: BetSlip) -> Result<BetReceipt> {
        self.send_json(reqwest::Method::POST, "player/bets", self.player_auth()?, &slip)
            .await
    }

    /// Opens an admin session; a wrong secret fails with a 401 status.
    pub async fn admin_login(&mut self, secret: &str) -> Result<()> {
        let login = AdminLogin {
            secret: secret.to_string(),
        };
        let response: AdminSessionResponse = self
            .send_json(reqwest::Method::POST, "admin/login", Auth::None, &login)
            .await?;
        self.admin_token = Some(response.token);
        Ok(())
    }

    pub async fn admin_logout(&mut self) -> Result<()> {
        self.post_empty("admin/logout", self.admin_auth()?).await?;
        self.admin_token = None;
        Ok(())
    }

    pub async fn set_max_bet(&self, max_bet: Amount) -> Result<Amount> {
        let response: MaxBet = self
            .send_json(
                reqwest::Method::PUT,
                "admin/config",
                self.admin_auth()?,
                &MaxBet { max_bet },
            )
            .await?;
        Ok(response.max_bet)
    }

    pub async fn house(&self) -> Result<HouseSummary> {
        self.get_json("admin/house", self.admin_auth()?).await
    }

    pub async fn adjust(&self, player: &PlayerId, change: Amount) -> Result<PlayerAccount> {
        let url = self.adjust_url(player)?;
        self.send_json_to(
            reqwest::Method::POST,
            url,
            self.admin_auth()?,
            &Adjustment { change },
        )
        .await
    }

    /// The player id goes in as one percent-encoded path segment, so ids containing
    /// `#`, `?` or `%` address the right player.
    fn adjust_url(&self, player: &PlayerId) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidScheme(self.base_url.scheme().to_string()))?
            .pop_if_empty()
            .extend(["admin", "players", player.as_str(), "adjust"]);
        Ok(url)
    }
}

#[derive(Clone, Copy)]
enum Auth<'a> {
    None,
    Player(&'a str),
    Admin(&'a str),
}

impl Auth<'_> {
    fn apply(self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Auth::None => request,
            Auth::Player(token) => request.bearer_auth(token),
            Auth::Admin(token) => request.header(ADMIN_TOKEN_HEADER, token),
        }
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(failure(response).await);
    }
    Ok(response.json().await?)
}

async fn failure(response: reqwest::Response) -> Error {
    let status = response.status();
    match response.text().await {
        Ok(body) if !body.is_empty() => {
            let body = serde_json::from_str::<ErrorResponse>(&body)
                .map(|err| err.error)
                .unwrap_or(body);
            Error::FailedWithBody { status, body }
        }
        _ => Error::Failed(status),
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_scheme() {
        assert!(matches!(
            Client::new("ws://localhost:8080"),
            Err(Error::InvalidScheme(scheme)) if scheme == "ws"
        ));
        assert!(matches!(Client::new("not a url"), Err(Error::Url(_))));
    }

    #[test]
    fn test_retry_policy_builder() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let client = Client::new("http://localhost:8080")
            .unwrap()
            .with_retry_policy(policy);
        assert_eq!(client.retry_policy(), policy);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(reqwest::StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(reqwest::StatusCode::CONFLICT));
    }

    #[test]
    fn test_adjust_url_escapes_player_id() {
        let client = Client::new("http://localhost:8080").unwrap();
        let url = client
            .adjust_url(&PlayerId::new("a#b?c%d").unwrap())
            .unwrap();
        assert_eq!(url.path(), "/admin/players/a%23b%3Fc%25d/adjust");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        let client = Client::new("http://localhost:8080/api/").unwrap();
        let url = client.adjust_url(&PlayerId::new("amy").unwrap()).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/admin/players/amy/adjust");
    }

    #[tokio::test]
    async fn test_session_required() {
        let client = Client::new("http://localhost:8080").unwrap();
        assert!(matches!(client.me().await, Err(Error::NotSignedIn)));
        assert!(matches!(client.house().await, Err(Error::NotAdmin)));
    }
}
