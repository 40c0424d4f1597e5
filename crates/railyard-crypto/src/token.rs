use anyhow::Result;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use railyard_types::api::{ACCESS_TOKEN_TYPE, Claims};

use crate::keys::random_bytes;

/// Build access claims for a user. `iat` and `jti` make every issued token
/// distinct, even two logins inside the same second.
pub fn access_claims(user_id: i64, email: &str, name: Option<&str>) -> Claims {
    Claims {
        sub: user_id,
        email: email.to_string(),
        name: name.map(str::to_string),
        typ: ACCESS_TOKEN_TYPE.to_string(),
        iat: chrono::Utc::now().timestamp(),
        jti: hex::encode(random_bytes::<16>()),
    }
}

pub fn issue_token(claims: &Claims, secret: &str) -> Result<String> {
    let token = encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Decode and check a token. Any failure (bad structure, wrong secret,
/// tampered payload, wrong token type) yields `None`.
pub fn verify_token(token: &str, secret: &str) -> Option<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Sessions are bounded by `current_token` rotation, not by expiry.
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .ok()?;

    (data.claims.typ == ACCESS_TOKEN_TYPE).then_some(data.claims)
}
