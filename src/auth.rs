//! Sign-in state and the route guard
//!
//! There is one account slot. Login issues a bearer token, logout revokes
//! it, and [`require_auth`] rejects requests that don't present it.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::AppState;

#[derive(Debug, Clone, Default)]
pub enum AuthState {
    #[default]
    SignedOut,
    SignedIn {
        token: String,
        email: String,
        since: DateTime<Utc>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
}

impl AuthState {
    /// Sign in, replacing any previous session, and return the new token
    pub fn login(&mut self, email: &str, password: &str) -> Result<String, AuthError> {
        let email = email.trim();
        if !email.contains('@') || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        *self = AuthState::SignedIn {
            token: token.clone(),
            email: email.to_string(),
            since: Utc::now(),
        };
        info!(%email, "Signed in");
        Ok(token)
    }

    /// Sign out. Returns false if nobody was signed in.
    pub fn logout(&mut self) -> bool {
        let was_signed_in = self.is_signed_in();
        *self = AuthState::SignedOut;
        was_signed_in
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthState::SignedIn { .. })
    }

    pub fn authorizes(&self, presented: &str) -> bool {
        match self {
            AuthState::SignedIn { token, .. } => token == presented,
            AuthState::SignedOut => false,
        }
    }
}

/// Reject requests without the current bearer token
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let authorized = match presented {
        Some(token) => state.auth.read().await.authorizes(token),
        None => false,
    };

    if !authorized {
        debug!(path = %request.uri().path(), "Rejected unauthenticated request");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_logout() {
        let mut auth = AuthState::default();
        assert!(!auth.is_signed_in());
        assert!(!auth.authorizes(""));

        let token = auth.login("student@example.com", "hunter2").unwrap();
        assert!(auth.is_signed_in());
        assert!(auth.authorizes(&token));
        assert!(!auth.authorizes("someone-else"));

        // a second login replaces the token
        let second = auth.login("student@example.com", "hunter2").unwrap();
        assert!(!auth.authorizes(&token));
        assert!(auth.authorizes(&second));

        assert!(auth.logout());
        assert!(!auth.authorizes(&second));
        assert!(!auth.logout());
    }

    #[test]
    fn test_invalid_credentials() {
        let mut auth = AuthState::default();
        assert!(auth.login("not-an-email", "pw").is_err());
        assert!(auth.login("a@b.c", "").is_err());
        assert!(!auth.is_signed_in());
    }
}
