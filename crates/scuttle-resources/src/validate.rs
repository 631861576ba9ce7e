//! Configuration-level validation shared across resources.

use crate::error::{ResourceError, ResourceResult};
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

static QUALIFIED_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_]+\.[a-zA-Z0-9_]+\.[a-zA-Z0-9_]+$").expect("static pattern")
});

/// Changefeed and backup targets must be fully qualified
/// (`database.schema.table`).
pub fn qualified_table_name(name: &str) -> ResourceResult<()> {
    if QUALIFIED_TABLE.is_match(name) {
        Ok(())
    } else {
        Err(ResourceError::Validation(format!(
            "table name {name:?} must be fully qualified (database.schema.table)"
        )))
    }
}

/// The shorthand recurrences the engine accepts without a cron expression.
const RECURRENCE_SHORTHANDS: &[&str] = &["@daily", "@hourly", "@weekly"];

/// Validate a schedule recurrence: one of the `@` shorthands or a classic
/// five-field cron expression.
pub fn recurrence(expr: &str) -> ResourceResult<()> {
    if RECURRENCE_SHORTHANDS.contains(&expr) {
        return Ok(());
    }
    // The engine takes classic five-field cron; the parser wants a seconds
    // column, so prepend one before validating.
    let candidate = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    cron::Schedule::from_str(&candidate).map_err(|err| {
        ResourceError::Validation(format!("invalid recurrence {expr:?}: {err}"))
    })?;
    Ok(())
}

/// Validate the full-backup frequency: `always` or a recurrence.
pub fn full_backup_frequency(expr: &str) -> ResourceResult<()> {
    if expr == "always" {
        return Ok(());
    }
    recurrence(expr)
}

/// Compare two URLs, ignoring query parameters whose value the engine has
/// redacted. Stored sink and backup locations come back with credentials
/// replaced by the word `redacted`, so a literal string comparison would
/// report permanent drift.
pub fn urls_equivalent(left: &str, right: &str) -> bool {
    let (Ok(left), Ok(right)) = (url::Url::parse(left), url::Url::parse(right)) else {
        return false;
    };

    if left.scheme() != right.scheme()
        || left.host_str() != right.host_str()
        || left.port() != right.port()
        || left.path() != right.path()
    {
        return false;
    }

    let redacted: Vec<String> = left
        .query_pairs()
        .chain(right.query_pairs())
        .filter(|(_, value)| value.eq_ignore_ascii_case("redacted"))
        .map(|(key, _)| key.to_string())
        .collect();

    let mut left_params: Vec<(String, String)> = left
        .query_pairs()
        .filter(|(key, _)| !redacted.contains(&key.to_string()))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    let mut right_params: Vec<(String, String)> = right
        .query_pairs()
        .filter(|(key, _)| !redacted.contains(&key.to_string()))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

    left_params.sort();
    right_params.sort();
    left_params == right_params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_must_be_fully_qualified() {
        assert!(qualified_table_name("movr.public.rides").is_ok());
        assert!(qualified_table_name("rides").is_err());
        assert!(qualified_table_name("public.rides").is_err());
        assert!(qualified_table_name("movr.public.rides.extra").is_err());
    }

    #[test]
    fn recurrence_accepts_shorthands_and_cron() {
        assert!(recurrence("@daily").is_ok());
        assert!(recurrence("@hourly").is_ok());
        assert!(recurrence("0 2 * * *").is_ok());
        assert!(recurrence("*/5 * * * *").is_ok());
        assert!(recurrence("not a cron").is_err());
        assert!(recurrence("@monthly-ish").is_err());
    }

    #[test]
    fn full_backup_frequency_accepts_always() {
        assert!(full_backup_frequency("always").is_ok());
        assert!(full_backup_frequency("@weekly").is_ok());
        assert!(full_backup_frequency("sometimes").is_err());
    }

    #[test]
    fn urls_equivalent_ignores_redacted_params() {
        assert!(urls_equivalent(
            "s3://bucket/path?AUTH=specified&AWS_SECRET_ACCESS_KEY=redacted",
            "s3://bucket/path?AUTH=specified&AWS_SECRET_ACCESS_KEY=abc123",
        ));
        assert!(!urls_equivalent(
            "s3://bucket/path?AUTH=specified",
            "s3://bucket/other?AUTH=specified",
        ));
        assert!(!urls_equivalent(
            "s3://bucket/path?AUTH=implicit",
            "s3://bucket/path?AUTH=specified",
        ));
        assert!(urls_equivalent("kafka://broker:9092", "kafka://broker:9092"));
    }
}
