//! Join ticket verification and the auth middleware

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::app::AppState;
use crate::util::time::unix_secs;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a join ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Nickname requested by the lobby
    #[serde(default)]
    pub name: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Sign claims into a `payload.signature` ticket
pub fn issue_ticket(claims: &TicketClaims, secret: &str) -> Result<String, AuthError> {
    let payload = serde_json::to_vec(claims).map_err(|_| AuthError::InvalidToken)?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(payload_b64.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", payload_b64, signature_b64))
}

/// Verify a join ticket and extract claims
pub fn verify_ticket(ticket: &str, secret: &str) -> Result<TicketClaims, AuthError> {
    let (payload_b64, signature_b64) = ticket.split_once('.').ok_or(AuthError::InvalidToken)?;

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: TicketClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < unix_secs() {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Extract the ticket from an Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Authentication error types
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid ticket")]
    InvalidToken,

    #[error("Ticket expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            AuthError::MissingHeader | AuthError::InvalidToken | AuthError::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
        };

        (status, self.to_string()).into_response()
    }
}

/// Authenticated participant, inserted into request extensions
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

/// Middleware to require a valid ticket
pub async fn require_ticket(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let ticket = extract_bearer_token(auth_header).ok_or(AuthError::InvalidFormat)?;
    let claims = verify_ticket(ticket, &state.config.session_secret)?;

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: claims.sub,
    });

    Ok(next.run(request).await)
}
