use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{AuthError, Identity, TokenVerifier};

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Serialize)]
struct AccessTokenClaims<'a> {
    user_id: i64,
    username: &'a str,
    iat: i64,
    exp: i64,
}

/// HS256 verifier for access tokens minted by the forum auth service.
#[derive(Clone)]
pub struct JwtTokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Mints a token the way the auth service does. Used by local tooling and tests.
    pub fn issue_token(&self, user_id: i64, username: &str) -> anyhow::Result<String> {
        self.issue_token_at(user_id, username, current_unix_timestamp()?)
    }

    fn issue_token_at(
        &self,
        user_id: i64,
        username: &str,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            user_id,
            username,
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }
}

impl TokenVerifier for JwtTokenVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)
            .map_err(|error| AuthError::InvalidToken(error.to_string()))?
            .claims;

        identity_from_claims(&claims)
    }
}

/// Claims are read from a raw map so that absent and mistyped fields are
/// reported separately.
fn identity_from_claims(claims: &Map<String, Value>) -> Result<Identity, AuthError> {
    let user_id = match claims.get("user_id") {
        None | Some(Value::Null) => return Err(AuthError::MissingUserId),
        Some(value) => numeric_user_id(value).ok_or(AuthError::InvalidUserId)?,
    };

    let username = match claims.get("username") {
        None | Some(Value::Null) => return Err(AuthError::MissingUsername),
        Some(Value::String(username)) => username.clone(),
        Some(_) => return Err(AuthError::InvalidUsername),
    };

    Ok(Identity::authenticated(user_id, username))
}

// Issuers that serialize ids as floats produce `7.0`; those are accepted.
fn numeric_user_id(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    let user_id = match number.as_i64() {
        Some(user_id) => user_id,
        None => {
            let float = number.as_f64()?;
            if float.fract() != 0.0 || float < 1.0 || float > i64::MAX as f64 {
                return None;
            }
            float as i64
        }
    };

    (user_id > 0).then_some(user_id)
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
