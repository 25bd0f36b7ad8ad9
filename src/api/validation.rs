use regex::Regex;
use std::sync::OnceLock;

use super::ApiError;
use super::types::{ListUsersQuery, RegisterRequest};
use crate::domain::{AccountFilter, Role};

const MAX_EMAIL_LEN: usize = 254;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

fn get_regex(re: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    re.get_or_init(|| Regex::new(pattern).expect("Invalid regex pattern defined in code"))
}

pub fn validate_username(username: &str) -> Result<&str, ApiError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(&RE, r"^[A-Za-z0-9_]{3,30}$");

    let trimmed = username.trim();
    if !re.is_match(trimmed) {
        return Err(ApiError::validation(
            "Username must be 3-30 characters of letters, numbers, and underscores",
        ));
    }
    Ok(trimmed)
}

pub fn validate_email(email: &str) -> Result<&str, ApiError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(
        &RE,
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    );

    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }
    if trimmed.len() > MAX_EMAIL_LEN {
        return Err(ApiError::validation(format!(
            "Email must be {MAX_EMAIL_LEN} characters or less"
        )));
    }
    if !re.is_match(trimmed) {
        return Err(ApiError::validation("Email address is not valid"));
    }
    Ok(trimmed)
}

pub fn validate_password(password: &str) -> Result<&str, ApiError> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(ApiError::validation(format!(
            "Password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters"
        )));
    }

    if !password.chars().any(char::is_alphabetic) || !password.chars().any(|c| c.is_ascii_digit())
    {
        return Err(ApiError::validation(
            "Password must contain at least one letter and one number",
        ));
    }
    Ok(password)
}

pub fn validate_registration(request: &RegisterRequest) -> Result<(), ApiError> {
    validate_username(&request.username)?;
    validate_email(&request.email)?;
    validate_password(&request.password)?;
    Ok(())
}

/// Login only checks presence; anything else would leak the password policy
/// to credential stuffing.
pub fn require_non_empty<'a>(value: &'a str, field: &str) -> Result<&'a str, ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(value)
}

/// Converts list query parameters into a typed filter plus page and limit.
pub fn parse_user_query(query: ListUsersQuery) -> Result<(AccountFilter, u64, u64), ApiError> {
    let role = query
        .role
        .as_deref()
        .map(str::parse::<Role>)
        .transpose()
        .map_err(ApiError::validation)?;

    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::validation("Page must be a positive integer"));
    }

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ApiError::validation(format!(
            "Invalid limit: {limit}. Limit must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let filter = AccountFilter {
        role,
        is_active: query.is_active,
        search: query.search,
    };
    Ok((filter, page, limit))
}
