//! Signed, time-bounded access and refresh tokens.
//!
//! Security notes:
//! - Tokens are HS256 JWTs. Each class has its own secret and lifetime, and
//!   carries a `typ` claim, so a refresh token never verifies as an access
//!   token (and vice versa).
//! - Every token carries a random `jti`; two tokens minted for the same
//!   subject in the same second still differ, which session rotation relies on.
//! - Verification has zero leeway: a token is expired the second after `exp`.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::domain::TokenClass;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    Invalid,

    #[error("Token configuration error: {0}")]
    Config(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Payload stored in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account id
    pub sub: String,
    pub typ: TokenClass,
    pub jti: String,
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_default()
    }
}

/// A freshly minted token together with its expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// An access/refresh pair minted at the same instant.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

struct ClassKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: TimeDelta,
}

pub struct TokenIssuer {
    access: ClassKeys,
    refresh: ClassKeys,
    issuer: String,
}

fn ttl_from_secs(secs: u64, what: &str) -> Result<TimeDelta, TokenError> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .filter(|d| *d > TimeDelta::zero())
        .ok_or_else(|| TokenError::Config(format!("{what} lifetime out of range: {secs}s")))
}

impl TokenIssuer {
    pub fn new(config: &TokenConfig) -> Result<Self, TokenError> {
        if config.access_token_secret.is_empty() || config.refresh_token_secret.is_empty() {
            return Err(TokenError::Config("token secrets must be set".into()));
        }
        if config.access_token_secret == config.refresh_token_secret {
            return Err(TokenError::Config(
                "access and refresh secrets must differ".into(),
            ));
        }

        let access_ttl = ttl_from_secs(config.access_token_ttl_seconds, "access token")?;
        let refresh_ttl = ttl_from_secs(config.refresh_token_ttl_seconds, "refresh token")?;

        Ok(Self {
            access: ClassKeys {
                encoding: EncodingKey::from_secret(config.access_token_secret.as_bytes()),
                decoding: DecodingKey::from_secret(config.access_token_secret.as_bytes()),
                ttl: access_ttl,
            },
            refresh: ClassKeys {
                encoding: EncodingKey::from_secret(config.refresh_token_secret.as_bytes()),
                decoding: DecodingKey::from_secret(config.refresh_token_secret.as_bytes()),
                ttl: refresh_ttl,
            },
            issuer: config.issuer.clone(),
        })
    }

    const fn keys(&self, class: TokenClass) -> &ClassKeys {
        match class {
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }

    #[must_use]
    pub const fn ttl(&self, class: TokenClass) -> TimeDelta {
        self.keys(class).ttl
    }

    pub(crate) fn issue_at(
        &self,
        class: TokenClass,
        subject: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        self.mint(class, subject, issued_at, issued_at + self.ttl(class))
    }

    fn mint(
        &self,
        class: TokenClass,
        subject: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let claims = Claims {
            sub: subject.to_string(),
            typ: class,
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.keys(class).encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    pub fn issue_access(&self, subject: &str) -> Result<IssuedToken, TokenError> {
        self.issue_at(TokenClass::Access, subject, Utc::now())
    }

    pub fn issue_refresh(&self, subject: &str) -> Result<IssuedToken, TokenError> {
        self.issue_at(TokenClass::Refresh, subject, Utc::now())
    }

    pub fn issue_pair(&self, subject: &str) -> Result<TokenPair, TokenError> {
        let now = Utc::now();
        Ok(TokenPair {
            access: self.issue_at(TokenClass::Access, subject, now)?,
            refresh: self.issue_at(TokenClass::Refresh, subject, now)?,
        })
    }

    /// Like [`issue_pair`](Self::issue_pair), but neither token outlives `not_after`.
    ///
    /// The access token keeps its full lifetime and must end strictly before
    /// `not_after`; otherwise the pair is refused with [`TokenError::Expired`].
    pub fn issue_pair_until(
        &self,
        subject: &str,
        not_after: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let now = Utc::now();
        let access_expires_at = now + self.ttl(TokenClass::Access);
        if access_expires_at >= not_after {
            return Err(TokenError::Expired);
        }

        let refresh_expires_at = (now + self.ttl(TokenClass::Refresh)).min(not_after);
        Ok(TokenPair {
            access: self.mint(TokenClass::Access, subject, now, access_expires_at)?,
            refresh: self.mint(TokenClass::Refresh, subject, now, refresh_expires_at)?,
        })
    }

    /// Verify and decode a token of the given class.
    ///
    /// Returns [`TokenError::Expired`] only for a correctly signed token past
    /// its expiry; anything else wrong with it is [`TokenError::Invalid`].
    pub fn verify(&self, token: &str, class: TokenClass) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let claims = match decode::<Claims>(token, &self.keys(class).decoding, &validation) {
            Ok(data) => data.claims,
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                return Err(match err.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    _ => TokenError::Invalid,
                });
            }
        };

        if claims.typ != class {
            return Err(TokenError::Invalid);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> TokenConfig {
        TokenConfig {
            access_token_secret: "access-secret-that-is-at-least-32-characters".into(),
            refresh_token_secret: "refresh-secret-that-is-at-least-32-characters".into(),
            ..TokenConfig::default()
        }
    }

    fn test_issuer() -> TokenIssuer {
        TokenIssuer::new(&test_config()).unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = test_issuer();

        let access = issuer.issue_access("42").unwrap();
        let claims = issuer.verify(&access.token, TokenClass::Access).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.typ, TokenClass::Access);
        assert_eq!(claims.exp - claims.iat, 900);
        assert_eq!(claims.expires_at().timestamp(), access.expires_at.timestamp());

        let refresh = issuer.issue_refresh("42").unwrap();
        let claims = issuer.verify(&refresh.token, TokenClass::Refresh).unwrap();
        assert_eq!(claims.typ, TokenClass::Refresh);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn test_pair_expiries_are_ordered() {
        let pair = test_issuer().issue_pair("7").unwrap();
        assert!(pair.access.expires_at < pair.refresh.expires_at);
    }

    #[test]
    fn test_pair_until_caps_expiry() {
        let issuer = test_issuer();
        let not_after = Utc::now() + TimeDelta::hours(1);
        let pair = issuer.issue_pair_until("7", not_after).unwrap();

        assert_eq!(pair.refresh.expires_at, not_after);
        assert!(pair.access.expires_at < not_after);

        let claims = issuer.verify(&pair.refresh.token, TokenClass::Refresh).unwrap();
        assert_eq!(claims.exp, not_after.timestamp());
    }

    #[test]
    fn test_pair_until_refuses_window_shorter_than_access_ttl() {
        let issuer = test_issuer();

        let soon = Utc::now() + TimeDelta::minutes(5);
        assert_eq!(issuer.issue_pair_until("7", soon).err(), Some(TokenError::Expired));

        let exactly_access = Utc::now() + issuer.ttl(TokenClass::Access);
        assert!(issuer.issue_pair_until("7", exactly_access).is_err());

        let past = Utc::now() - TimeDelta::minutes(1);
        assert_eq!(issuer.issue_pair_until("7", past).err(), Some(TokenError::Expired));

        let enough = Utc::now() + TimeDelta::minutes(20);
        let pair = issuer.issue_pair_until("7", enough).unwrap();
        assert!(pair.access.expires_at < pair.refresh.expires_at);
        assert_eq!(pair.refresh.expires_at, enough);
    }

    #[test]
    fn test_classes_are_not_interchangeable() {
        let issuer = test_issuer();
        let pair = issuer.issue_pair("42").unwrap();

        assert_eq!(
            issuer.verify(&pair.refresh.token, TokenClass::Access),
            Err(TokenError::Invalid)
        );
        assert_eq!(
            issuer.verify(&pair.access.token, TokenClass::Refresh),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_tokens_are_unique() {
        let issuer = test_issuer();
        let a = issuer.issue_refresh("42").unwrap();
        let b = issuer.issue_refresh("42").unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_expired_token() {
        let issuer = test_issuer();
        let long_ago = Utc::now() - TimeDelta::days(30);
        let token = issuer
            .issue_at(TokenClass::Refresh, "42", long_ago)
            .unwrap();

        assert_eq!(
            issuer.verify(&token.token, TokenClass::Refresh),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_tampered_and_malformed_tokens() {
        let issuer = test_issuer();
        assert_eq!(
            issuer.verify("not-a-token", TokenClass::Access),
            Err(TokenError::Invalid)
        );

        let token = issuer.issue_access("42").unwrap().token;
        let mut tampered = token.clone();
        tampered.pop();
        tampered.push(if token.ends_with('A') { 'B' } else { 'A' });
        assert_eq!(
            issuer.verify(&tampered, TokenClass::Access),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_wrong_secret() {
        let issuer1 = test_issuer();
        let mut other = test_config();
        other.access_token_secret = "a-completely-different-secret-of-32-chars".into();
        let issuer2 = TokenIssuer::new(&other).unwrap();

        let token = issuer1.issue_access("42").unwrap();
        assert_eq!(
            issuer2.verify(&token.token, TokenClass::Access),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(TokenIssuer::new(&TokenConfig::default()).is_err());

        let mut same = test_config();
        same.refresh_token_secret = same.access_token_secret.clone();
        assert!(TokenIssuer::new(&same).is_err());

        let mut zero = test_config();
        zero.access_token_ttl_seconds = 0;
        assert!(TokenIssuer::new(&zero).is_err());
    }
}
