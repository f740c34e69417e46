use axum::{
    extract::{Path, State as AxumState},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use wagerbook_execution::{Identity, Session};
use wagerbook_types::{
    api::{
        AdminLogin, AdminSessionResponse, Adjustment, Credentials, ErrorResponse,
        HealthzResponse, MaxBet, SessionResponse, ADMIN_TOKEN_HEADER,
    },
    BetReceipt, BetSlip, HouseSummary, LedgerError, PlayerAccount, PlayerId,
};

use crate::Server;

/// Ledger failure rendered as a JSON error body.
pub(super) struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self(err)
    }
}

pub(super) fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
        LedgerError::NotFound => StatusCode::NOT_FOUND,
        LedgerError::AccountExists => StatusCode::CONFLICT,
        LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Overflow => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::InvalidConfiguration(_)
        | LedgerError::InvalidBet(_)
        | LedgerError::InvalidMultiplier(_)
        | LedgerError::InvalidIdentifier(_)
        | LedgerError::WeakPassword { .. } => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn player_session(server: &Server, headers: &HeaderMap) -> Result<Session, ApiError> {
    let token = bearer_token(headers).ok_or(LedgerError::AuthenticationFailed)?;
    let session = server
        .identity
        .current_session(token)
        .await
        .ok_or(LedgerError::AuthenticationFailed)?;
    Ok(session)
}

/// Accepts the admin token from `x-admin-token` or an `Authorization: Bearer` header.
pub(super) fn admin_auth_error(server: &Server, headers: &HeaderMap) -> Option<ApiError> {
    let header_token = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    let authenticated = [header_token, bearer_token(headers)]
        .into_iter()
        .flatten()
        .any(|token| server.admin.is_authenticated(token));
    if authenticated {
        None
    } else {
        Some(ApiError(LedgerError::AuthenticationFailed))
    }
}

pub(super) async fn healthz() -> impl IntoResponse {
    Json(HealthzResponse { ok: true })
}

pub(super) async fn sign_up(
    AxumState(server): AxumState<Arc<Server>>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<SessionResponse> {
    let session = server
        .identity
        .create_account(&credentials.email, &credentials.password)
        .await?;
    let player = session.player_id()?;
    server.ledger.get_or_initialize(&player).await?;
    Ok(Json(SessionResponse {
        token: session.token,
        player,
    }))
}

pub(super) async fn sign_in(
    AxumState(server): AxumState<Arc<Server>>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<SessionResponse> {
    let session = server
        .identity
        .sign_in(&credentials.email, &credentials.password)
        .await?;
    let player = session.player_id()?;
    Ok(Json(SessionResponse {
        token: session.token,
        player,
    }))
}

pub(super) async fn sign_out(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session = player_session(&server, &headers).await?;
    server.identity.sign_out(&session.token).await;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn me(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
) -> ApiResult<PlayerAccount> {
    let session = player_session(&server, &headers).await?;
    let player = session.player_id()?;
    Ok(Json(server.ledger.get_or_initialize(&player).await?))
}

pub(super) async fn config(AxumState(server): AxumState<Arc<Server>>) -> ApiResult<MaxBet> {
    let config = server.ledger.house_config().await?;
    Ok(Json(MaxBet {
        max_bet: config.max_bet(),
    }))
}

pub(super) async fn place_bet(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    Json(slip): Json<BetSlip>,
) -> ApiResult<BetReceipt> {
    let session = player_session(&server, &headers).await?;
    let player = session.player_id()?;
    Ok(Json(server.ledger.place_bet(&player, slip).await?))
}

pub(super) async fn admin_login(
    AxumState(server): AxumState<Arc<Server>>,
    Json(login): Json<AdminLogin>,
) -> ApiResult<AdminSessionResponse> {
    // Hashed secrets take an argon2 verification.
    let token = tokio::task::spawn_blocking(move || server.admin.login(&login.secret))
        .await
        .map_err(|err| LedgerError::StoreUnavailable(format!("admin login: {err}")))?
        .ok_or(LedgerError::AuthenticationFailed)?;
    Ok(Json(AdminSessionResponse { token }))
}

pub(super) async fn admin_logout(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    if let Some(err) = admin_auth_error(&server, &headers) {
        return Err(err);
    }
    if let Some(token) = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .or_else(|| bearer_token(&headers))
    {
        server.admin.logout(token);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn set_max_bet(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    Json(body): Json<MaxBet>,
) -> ApiResult<MaxBet> {
    if let Some(err) = admin_auth_error(&server, &headers) {
        return Err(err);
    }
    let config = server.ledger.set_max_bet(body.max_bet).await?;
    Ok(Json(MaxBet {
        max_bet: config.max_bet(),
    }))
}

pub(super) async fn house(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
) -> ApiResult<HouseSummary> {
    if let Some(err) = admin_auth_error(&server, &headers) {
        return Err(err);
    }
    Ok(Json(server.ledger.house_summary().await?))
}

pub(super) async fn adjust(
    AxumState(server): AxumState<Arc<Server>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Adjustment>,
) -> ApiResult<PlayerAccount> {
    if let Some(err) = admin_auth_error(&server, &headers) {
        return Err(err);
    }
    let player = PlayerId::new(id)?;
    Ok(Json(server.ledger.admin_adjust(&player, body.change).await?))
}
