use anyhow::{anyhow, bail, Context};
use banter_common::types::UserId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Validates the access tokens minted by the account service.
///
/// Tokens are HS256-signed with a shared secret; the subject claim carries
/// the numeric user ID.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_access_token(&self, user_id: UserId) -> anyhow::Result<String> {
        self.issue_access_token_at(user_id, current_unix_timestamp()?)
    }

    fn issue_access_token_at(&self, user_id: UserId, issued_at: i64) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<UserId> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        claims
            .sub
            .parse::<UserId>()
            .with_context(|| format!("access token subject '{}' is not a user id", claims.sub))
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{current_unix_timestamp, TokenVerifier, ACCESS_TOKEN_TTL_SECONDS};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde::Serialize;

    const TEST_SECRET: &str = "banter_test_secret_that_is_definitely_long_enough";

    #[test]
    fn issues_and_verifies_access_tokens() {
        let verifier = TokenVerifier::new(TEST_SECRET).expect("verifier should initialize");

        let token = verifier.issue_access_token(42).expect("token should be issued");
        let user_id = verifier.verify(&token).expect("token should verify");

        assert_eq!(user_id, 42);
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(TokenVerifier::new("too_short").is_err());
    }

    #[test]
    fn rejects_tampered_tokens() {
        let verifier = TokenVerifier::new(TEST_SECRET).expect("verifier should initialize");
        let token = verifier.issue_access_token(42).expect("token should be issued");
        let tampered = format!("{token}x");

        assert!(verifier.verify(&tampered).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let verifier = TokenVerifier::new(TEST_SECRET).expect("verifier should initialize");
        let issued_at = current_unix_timestamp().expect("current timestamp should resolve")
            - ACCESS_TOKEN_TTL_SECONDS
            - 1;
        let token =
            verifier.issue_access_token_at(42, issued_at).expect("token should be issued");

        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn rejects_tokens_with_non_numeric_subject() {
        #[derive(Serialize)]
        struct InvalidSubjectClaims {
            sub: &'static str,
            iat: i64,
            exp: i64,
        }

        let verifier = TokenVerifier::new(TEST_SECRET).expect("verifier should initialize");
        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let claims = InvalidSubjectClaims {
            sub: "not-a-number",
            iat: now,
            exp: now + ACCESS_TOKEN_TTL_SECONDS,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token should encode");

        assert!(verifier.verify(&token).is_err());
    }
}
