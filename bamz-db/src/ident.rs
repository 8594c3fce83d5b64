//! SQL identifier checks.
//!
//! DDL cannot take bind parameters, so tenant codes and role names end up
//! interpolated into statement text. Everything that does so goes through
//! [`checked_ident`] or [`quote_ident`].

use crate::{DbError, DbResult};

/// Longest identifier Postgres keeps without truncation.
pub const MAX_IDENT_LEN: usize = 63;

/// Whether `value` is a lowercase bare identifier (`[a-z_][a-z0-9_]*`).
pub fn is_bare_ident(value: &str) -> bool {
    let mut chars = value.chars();
    let head = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    head && value.len() <= MAX_IDENT_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Return `value` unchanged when it is safe to splice bare into SQL.
pub fn checked_ident(value: &str) -> DbResult<&str> {
    if is_bare_ident(value) {
        Ok(value)
    } else {
        Err(DbError::InvalidIdentifier(value.to_string()))
    }
}

/// Double-quote an arbitrary identifier (account ids, schema names).
pub fn quote_ident(value: &str) -> DbResult<String> {
    if value.is_empty() || value.len() > MAX_IDENT_LEN || value.contains('\0') {
        return Err(DbError::InvalidIdentifier(value.to_string()));
    }
    Ok(format!("\"{}\"", value.replace('"', "\"\"")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_identifiers() {
        assert!(is_bare_ident("shop1"));
        assert!(is_bare_ident("shop1_readonly"));
        assert!(is_bare_ident("_private"));
        assert!(!is_bare_ident("1shop"));
        assert!(!is_bare_ident("Shop"));
        assert!(!is_bare_ident("shop-1"));
        assert!(!is_bare_ident(""));
        assert!(!is_bare_ident(&"x".repeat(64)));
        assert!(checked_ident("shop1; DROP ROLE admin").is_err());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("acc-42").unwrap(), "\"acc-42\"");
        assert_eq!(quote_ident("we\"ird").unwrap(), "\"we\"\"ird\"");
        assert!(quote_ident("").is_err());
    }
}
