//! Authentication: JWT validation and the role predicate

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::types::Request;

/// JWT claims issued by the web application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Application role, e.g. `team_leader`
    pub role: String,
    /// Issued at (unix timestamp)
    pub iat: usize,
    /// Expiration (unix timestamp)
    pub exp: usize,
}

/// Roles allowed to upload lists and read records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Administrator,
    DivisionLeader,
    TeamLeader,
    LoanSpecialist,
}

impl Role {
    /// Case-insensitive; unknown roles are `None`
    pub fn parse(role: &str) -> Option<Self> {
        match role.trim().to_ascii_lowercase().as_str() {
            "administrator" => Some(Role::Administrator),
            "division_leader" => Some(Role::DivisionLeader),
            "team_leader" => Some(Role::TeamLeader),
            "loan_specialist" => Some(Role::LoanSpecialist),
            _ => None,
        }
    }
}

/// Authentication result from extract_auth
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub user_id: String,
    pub role: Option<Role>,
}

impl AuthInfo {
    /// Whether the caller may upload lists and read records
    pub fn can_access(&self) -> bool {
        self.role.is_some()
    }
}

/// Validate a JWT token and return claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("Invalid token: {}", e))?;

    Ok(token_data.claims)
}

/// Extract authentication info from a NATS request
pub fn extract_auth<T>(request: &Request<T>, jwt_secret: &str) -> Result<AuthInfo> {
    let token = request
        .token
        .as_deref()
        .ok_or_else(|| anyhow!("Missing authentication token"))?;
    let claims = validate_token(token, jwt_secret)?;
    if claims.sub.trim().is_empty() {
        return Err(anyhow!("Token has no subject"));
    }

    Ok(AuthInfo {
        role: Role::parse(&claims.role),
        user_id: claims.sub,
    })
}

#[cfg(test)]
pub(crate) fn generate_token(user_id: &str, role: &str, secret: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        iat: now,
        exp: now + 60 * 60,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}
