//! Token name grammar and the metadata record persisted per token
//! (spec.md §3 "Token metadata", §4.6). Four name shapes: `ROOT`,
//! `ROOT/SUB`, `ROOT#unique_tag`, and `~username` — each with its own
//! character-class and length rule, mirrored here as independent
//! predicates the way spec.md §9 resolves BIP34/65/66 as independent
//! rather than chained checks.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, TokenResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Root,
    Sub,
    Unique,
    Username,
}

/// A token's persisted metadata: its total issued amount, decimal
/// precision, and whether further reissuance can still raise either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub total_amount: i64,
    pub units: u8,
    pub reissuable: bool,
}

lazy_static! {
    static ref ROOT_NAME_RE: Regex = Regex::new(r"^[A-Z0-9._]{3,31}$").unwrap();
    static ref SUB_NAME_RE: Regex = Regex::new(r"^[A-Z0-9._]{1,31}$").unwrap();
    static ref UNIQUE_TAG_RE: Regex = Regex::new(r"^[-A-Za-z0-9@$%&*()\[\]{}_.?:]{1,31}$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^~[A-Za-z0-9_]{1,30}$").unwrap();
}

pub fn validate_root_name(name: &str) -> TokenResult<()> {
    if !ROOT_NAME_RE.is_match(name) {
        return Err(Box::new(ErrorKind::InvalidName(name.to_string())));
    }
    Ok(())
}

/// Splits and validates a `ROOT/SUB` name, returning the two parts.
pub fn validate_sub_name(full: &str) -> TokenResult<(String, String)> {
    if full.len() > 31 {
        return Err(Box::new(ErrorKind::InvalidName(full.to_string())));
    }
    let mut parts = full.splitn(2, '/');
    let root = parts.next().unwrap_or("");
    let sub = parts
        .next()
        .ok_or_else(|| Box::new(ErrorKind::InvalidName(full.to_string())))?;
    validate_root_name(root)?;
    if !SUB_NAME_RE.is_match(sub) {
        return Err(Box::new(ErrorKind::InvalidName(full.to_string())));
    }
    Ok((root.to_string(), sub.to_string()))
}

/// Splits and validates a `ROOT#tag` name.
pub fn validate_unique_name(full: &str) -> TokenResult<(String, String)> {
    let mut parts = full.splitn(2, '#');
    let root = parts.next().unwrap_or("");
    let tag = parts
        .next()
        .ok_or_else(|| Box::new(ErrorKind::InvalidName(full.to_string())))?;
    validate_root_name(root)?;
    if !UNIQUE_TAG_RE.is_match(tag) {
        return Err(Box::new(ErrorKind::InvalidName(full.to_string())));
    }
    Ok((root.to_string(), tag.to_string()))
}

pub fn validate_username(full: &str) -> TokenResult<()> {
    if !USERNAME_RE.is_match(full) {
        return Err(Box::new(ErrorKind::InvalidName(full.to_string())));
    }
    Ok(())
}

/// The owner token's name for a given root or sub-token name: `NAME!`.
pub fn owner_token_name(root_or_sub: &str) -> String {
    format!("{}!", root_or_sub)
}

pub fn is_owner_token_name(name: &str) -> bool {
    name.ends_with('!')
}

pub fn is_unique_token_name(name: &str) -> bool {
    name.contains('#')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_names_are_uppercase_alnum_with_dot_and_underscore() {
        assert!(validate_root_name("SERIALIZATION").is_ok());
        assert!(validate_root_name("MY.TOKEN_1").is_ok());
        assert!(validate_root_name("ab").is_err());
        assert!(validate_root_name("lowercase").is_err());
    }

    #[test]
    fn sub_names_split_on_slash() {
        let (root, sub) = validate_sub_name("SERIALIZATION/SUB1").unwrap();
        assert_eq!(root, "SERIALIZATION");
        assert_eq!(sub, "SUB1");
        assert!(validate_sub_name("SERIALIZATION").is_err());
    }

    #[test]
    fn unique_names_split_on_hash() {
        let (root, tag) = validate_unique_name("SERIALIZATION#first").unwrap();
        assert_eq!(root, "SERIALIZATION");
        assert_eq!(tag, "first");
    }

    #[test]
    fn usernames_require_tilde_prefix() {
        assert!(validate_username("~alice").is_ok());
        assert!(validate_username("alice").is_err());
    }

    #[test]
    fn owner_token_name_appends_bang() {
        assert_eq!(owner_token_name("SERIALIZATION"), "SERIALIZATION!");
        assert!(is_owner_token_name("SERIALIZATION!"));
        assert!(is_unique_token_name("SERIALIZATION#first"));
    }
}
