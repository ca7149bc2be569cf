//! Request auth gate (§9 "dynamic request dispatch" note: a single gate
//! in front of the mux, not a per-handler type hierarchy). Credentials
//! come in two shapes: a GitHub OAuth `code`, exchanged once via
//! `AuthPort` for an identity, and the session token minted from that
//! identity for every request after. The session token is a `jsonwebtoken`
//! HS256 JWT signed with `Settings::session_signing_key` so later requests
//! never have to round-trip through the code host.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use conductor_core::ports::{AuthedUser, Role};
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    name: String,
    role: String,
    exp: i64,
}

fn role_as_str(role: Role) -> &'static str {
    match role {
        Role::Viewer => "viewer",
        Role::User => "user",
        Role::Admin => "admin",
    }
}

fn role_from_str(s: &str) -> Option<Role> {
    match s {
        "viewer" => Some(Role::Viewer),
        "user" => Some(Role::User),
        "admin" => Some(Role::Admin),
        _ => None,
    }
}

const SESSION_TTL_SECS: i64 = 60 * 60 * 24 * 7;

pub fn mint_session(signing_key: &str, user: &AuthedUser) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.email.clone(),
        name: user.name.clone(),
        role: role_as_str(user.role).to_string(),
        exp: (chrono::Utc::now().timestamp()) + SESSION_TTL_SECS,
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(signing_key.as_bytes()),
    )?;
    Ok(token)
}

fn verify_session(signing_key: &str, token: &str) -> anyhow::Result<AuthedUser> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(signing_key.as_bytes()),
        &jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256),
    )?;
    let role = role_from_str(&data.claims.role).ok_or_else(|| anyhow::anyhow!("unknown role in session token"))?;
    Ok(AuthedUser {
        email: data.claims.sub,
        name: data.claims.name,
        role,
    })
}

/// Runs in front of every non-open route. Rejects with 401 if the bearer
/// token is missing or does not verify; otherwise attaches `AuthedUser`
/// to the request for handlers to read via `Extension`.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let token = match token {
        Some(t) => t,
        None => return Err(StatusCode::UNAUTHORIZED),
    };

    let user = verify_session(&state.session_signing_key, token).map_err(|_| StatusCode::UNAUTHORIZED)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

pub fn require_role(user: &AuthedUser, minimum: Role) -> Result<(), conductor_core::ConductorError> {
    if user.role < minimum {
        return Err(conductor_core::ConductorError::Forbidden);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> AuthedUser {
        AuthedUser {
            email: "dev@example.com".to_string(),
            name: "dev".to_string(),
            role,
        }
    }

    #[test]
    fn mint_then_verify_round_trips_the_identity() {
        let token = mint_session("test-signing-key", &user(Role::User)).unwrap();
        let verified = verify_session("test-signing-key", &token).unwrap();
        assert_eq!(verified.email, "dev@example.com");
        assert_eq!(verified.role, Role::User);
    }

    #[test]
    fn verify_rejects_a_token_signed_with_a_different_key() {
        let token = mint_session("right-key", &user(Role::Admin)).unwrap();
        assert!(verify_session("wrong-key", &token).is_err());
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(verify_session("test-signing-key", "not-a-jwt").is_err());
    }

    #[test]
    fn require_role_admits_equal_or_higher_role_only() {
        assert!(require_role(&user(Role::Admin), Role::User).is_ok());
        assert!(require_role(&user(Role::User), Role::User).is_ok());
        assert!(require_role(&user(Role::Viewer), Role::User).is_err());
    }

    #[test]
    fn role_round_trips_through_its_string_form() {
        for role in [Role::Viewer, Role::User, Role::Admin] {
            assert_eq!(role_from_str(role_as_str(role)), Some(role));
        }
        assert_eq!(role_from_str("nonsense"), None);
    }
}
