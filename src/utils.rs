// ABOUTME: Utility functions for identifier validation, SQL quoting and retry logic
// ABOUTME: Shared by the connection provider, the query builders and the orchestrator

use anyhow::{bail, Result};
use std::fmt::Display;
use std::time::Duration;

/// How the delay between retry attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,
    /// Delay doubles after every retry
    Exponential,
}

/// Retry an async operation with a delay between attempts
///
/// Executes the operation and, if it fails, waits and tries again until
/// `max_attempts` attempts have been made. With [`Backoff::Exponential`] the
/// delay doubles after each attempt; with [`Backoff::Fixed`] it stays at
/// `initial_delay`.
///
/// # Arguments
///
/// * `operation` - Async function to retry (FnMut returning Future\<Output = Result\<T, E\>\>)
/// * `max_attempts` - Total attempts including the first (0 is treated as 1)
/// * `initial_delay` - Delay before first retry
/// * `backoff` - Whether the delay stays fixed or doubles
///
/// # Returns
///
/// Returns the successful result, or the last error together with the number
/// of attempts made.
///
/// # Examples
///
/// ```no_run
/// # use std::time::Duration;
/// # use quality_sync::utils::{retry_with_backoff, Backoff};
/// # async fn example() -> Result<(), String> {
/// let value = retry_with_backoff(
///     || async { Ok::<_, String>("success") },
///     3,  // Try up to 3 times in total
///     Duration::from_secs(5),
///     Backoff::Fixed,
/// )
/// .await
/// .map_err(|(err, _attempts)| err)?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
    backoff: Backoff,
) -> std::result::Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut delay = initial_delay;
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err((e, attempt));
                }

                tracing::warn!(
                    "Operation failed (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                if backoff == Backoff::Exponential {
                    delay *= 2;
                }
            }
        }
    }
}

/// Validate a PostgreSQL identifier (schema, table, column name)
///
/// Only plain identifiers are accepted so every name taken from configuration
/// can be quoted safely into generated SQL.
///
/// # Rules
///
/// - Must not be empty or whitespace-only
/// - At most 63 characters (PostgreSQL's NAMEDATALEN - 1)
/// - Must start with a letter or underscore
/// - Only letters, digits and underscores
///
/// # Examples
///
/// ```
/// # use quality_sync::utils::validate_postgres_identifier;
/// assert!(validate_postgres_identifier("mesures_gompcnou").is_ok());
/// assert!(validate_postgres_identifier("_private").is_ok());
/// assert!(validate_postgres_identifier("123table").is_err());
/// assert!(validate_postgres_identifier("data-hora").is_err());
/// assert!(validate_postgres_identifier("t\"; DROP TABLE x; --").is_err());
/// ```
pub fn validate_postgres_identifier(identifier: &str) -> Result<()> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        bail!("Identifier cannot be empty or whitespace-only");
    }

    if trimmed.len() > 63 {
        bail!(
            "Identifier '{}' exceeds maximum length of 63 characters (got {})",
            sanitize_identifier(trimmed),
            trimmed.len()
        );
    }

    let mut chars = trimmed.chars();
    if let Some(first_char) = chars.next() {
        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            bail!(
                "Identifier '{}' must start with a letter or underscore, not '{}'",
                sanitize_identifier(trimmed),
                first_char
            );
        }
    }

    for (i, c) in trimmed.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            bail!(
                "Identifier '{}' contains invalid character '{}' at position {}. \
                 Only letters, digits, and underscores are allowed",
                sanitize_identifier(trimmed),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            );
        }
    }

    Ok(())
}

/// Sanitize an identifier for display
///
/// Removes control characters and limits length to prevent log injection.
/// This is for display purposes only; SQL text uses [`quote_ident`].
///
/// # Examples
///
/// ```
/// # use quality_sync::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a PostgreSQL identifier (schema, table, column)
///
/// Escapes embedded quotes and wraps the identifier in double quotes.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Quote and join a schema-qualified table name: `"schema"."table"`.
pub fn quote_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Quote every column and join them with `, `.
pub fn quote_column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("normal_table"), "normal_table");
        assert_eq!(sanitize_identifier("table\x00name"), "tablename");
        assert_eq!(sanitize_identifier("table\nname"), "tablename");

        let long_name = "a".repeat(200);
        assert_eq!(sanitize_identifier(&long_name).len(), 100);
    }

    #[test]
    fn test_validate_postgres_identifier_valid() {
        assert!(validate_postgres_identifier("mesures_gompcnou").is_ok());
        assert!(validate_postgres_identifier("data_hora").is_ok());
        assert!(validate_postgres_identifier("_tmp1").is_ok());
        assert!(validate_postgres_identifier(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_validate_postgres_identifier_invalid() {
        assert!(validate_postgres_identifier("").is_err());
        assert!(validate_postgres_identifier("   ").is_err());
        assert!(validate_postgres_identifier("1table").is_err());
        assert!(validate_postgres_identifier("my-table").is_err());
        assert!(validate_postgres_identifier("my table").is_err());
        assert!(validate_postgres_identifier(&"a".repeat(64)).is_err());
        assert!(validate_postgres_identifier("t\"; DROP TABLE users; --").is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_table("qualitat", "mesurestorsio"), "\"qualitat\".\"mesurestorsio\"");
        assert_eq!(
            quote_column_list(&["a".to_string(), "b".to_string()]),
            "\"a\", \"b\""
        );
    }

    #[tokio::test]
    async fn test_retry_with_backoff_success() {
        let mut attempts = 0;
        let result = retry_with_backoff(
            || {
                attempts += 1;
                async move {
                    if attempts < 3 {
                        Err("Temporary failure")
                    } else {
                        Ok("Success")
                    }
                }
            },
            5,
            Duration::from_millis(10),
            Backoff::Exponential,
        )
        .await;

        assert_eq!(result.ok(), Some("Success"));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_failure() {
        let mut attempts = 0;
        let result: std::result::Result<&str, (&str, u32)> = retry_with_backoff(
            || {
                attempts += 1;
                async move { Err("Permanent failure") }
            },
            3,
            Duration::from_millis(10),
            Backoff::Fixed,
        )
        .await;

        let (err, made) = result.unwrap_err();
        assert_eq!(err, "Permanent failure");
        // 3 attempts in total, not 3 retries after the first
        assert_eq!(made, 3);
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_keeps_delay() {
        let start = tokio::time::Instant::now();
        let result: std::result::Result<(), (&str, u32)> = retry_with_backoff(
            || async { Err("down") },
            3,
            Duration::from_secs(5),
            Backoff::Fixed,
        )
        .await;

        assert!(result.is_err());
        // Two sleeps of 5s between three attempts
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let mut attempts = 0;
        let result: std::result::Result<(), (&str, u32)> = retry_with_backoff(
            || {
                attempts += 1;
                async move { Err("down") }
            },
            0,
            Duration::from_millis(1),
            Backoff::Fixed,
        )
        .await;

        assert_eq!(result.unwrap_err().1, 1);
        assert_eq!(attempts, 1);
    }
}
