// Read-only statement checks shared by the SQL-like backends
use crate::domain::query::{ErrorCode, QueryError};
use regex::Regex;
use std::sync::LazyLock;

static MUTATING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|GRANT|REVOKE|MERGE|COPY|VACUUM|CALL|EXECUTE|INTO)\b",
    )
    .unwrap_or_else(|e| panic!("invalid keyword pattern: {e}"))
});

/// Accept a single statement that starts with one of `leading` and contains
/// no mutating keyword. Keywords only match on word boundaries, so a column
/// called `updated_at` is fine.
pub fn ensure_read_only(query: &str, leading: &[&str]) -> Result<(), QueryError> {
    let trimmed = query.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(QueryError::new(ErrorCode::Syntax, "query is empty"));
    }

    let first = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if !leading.iter().any(|keyword| first == *keyword) {
        return Err(QueryError::new(
            ErrorCode::Permission,
            format!("only {} statements are allowed", leading.join("/")),
        )
        .with_query(query));
    }

    if trimmed.contains(';') {
        return Err(
            QueryError::new(ErrorCode::Permission, "multiple statements are not allowed").with_query(query),
        );
    }

    if let Some(found) = MUTATING.find(trimmed) {
        return Err(QueryError::new(
            ErrorCode::Permission,
            format!("query contains forbidden keyword {}", found.as_str().to_ascii_uppercase()),
        )
        .with_query(query));
    }

    Ok(())
}
