//! `accessToken` / `refreshToken` cookie handling.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
};
use chrono::{DateTime, Utc};

use crate::config::{SameSite, ServerConfig};
use crate::services::TokenPair;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    pub secure: bool,
    pub same_site: SameSite,
}

impl From<&ServerConfig> for CookieSettings {
    fn from(server: &ServerConfig) -> Self {
        Self {
            secure: server.secure_cookies,
            same_site: server.same_site,
        }
    }
}

impl CookieSettings {
    fn build(self, name: &str, value: &str, max_age: i64) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{name}={value}; Path=/; HttpOnly; SameSite={}; Max-Age={max_age}",
            self.same_site.as_str()
        );
        // Browsers drop SameSite=None cookies that are not Secure
        if self.secure || self.same_site == SameSite::None {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    /// Appends both token cookies, each living as long as its token.
    pub fn set_tokens(self, headers: &mut HeaderMap, tokens: &TokenPair) -> Result<(), InvalidHeaderValue> {
        let now = Utc::now();
        headers.append(
            SET_COOKIE,
            self.build(ACCESS_COOKIE, &tokens.access.token, max_age(tokens.access.expires_at, now))?,
        );
        headers.append(
            SET_COOKIE,
            self.build(REFRESH_COOKIE, &tokens.refresh.token, max_age(tokens.refresh.expires_at, now))?,
        );
        Ok(())
    }

    /// Appends expired placeholders for both token cookies.
    pub fn clear_tokens(self, headers: &mut HeaderMap) -> Result<(), InvalidHeaderValue> {
        headers.append(SET_COOKIE, self.build(ACCESS_COOKIE, "", 0)?);
        headers.append(SET_COOKIE, self.build(REFRESH_COOKIE, "", 0)?);
        Ok(())
    }
}

fn max_age(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_seconds().max(0)
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, val)| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Access token from the `Authorization` header, falling back to the cookie.
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers).or_else(|| read_cookie(headers, ACCESS_COOKIE))
}
