//! Database connection pool and schema migration

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Create a new database connection pool
///
/// Advisory locks pin a connection for the duration of a reservation, so the
/// pool keeps a little headroom above the request concurrency.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Split SQL into statements, keeping `$$` delimited function bodies intact
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_dollar_block = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if c == '$' && chars.peek() == Some(&'$') {
            current.push('$');
            chars.next();
            in_dollar_block = !in_dollar_block;
        } else if c == ';' && !in_dollar_block {
            if has_sql_content(&current) {
                statements.push(current.trim().to_string());
            }
            current.clear();
        }
    }

    if has_sql_content(&current) {
        statements.push(current.trim().to_string());
    }

    statements
}

/// Check if a string has actual SQL content (not just comments)
fn has_sql_content(s: &str) -> bool {
    s.lines().any(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty() && !trimmed.starts_with("--")
    })
}

/// Run the embedded schema migration
///
/// Every statement is idempotent (`IF NOT EXISTS` / `OR REPLACE`); a failing
/// statement is logged and skipped so start-up on an existing database works.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    let migration_sql = include_str!("migrations/001_initial.sql");

    let mut failed = 0usize;
    for statement in split_sql_statements(migration_sql) {
        if let Err(e) = sqlx::query(&statement).execute(pool).await {
            failed += 1;
            tracing::warn!("Migration statement failed (possibly already applied): {}", e);
        }
    }

    tracing::info!(failed, "Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plain_statements() {
        let sql = "CREATE TABLE a (id INT);\n-- comment only;\nCREATE TABLE b (id INT);";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE a"));
        assert!(statements[1].starts_with("CREATE TABLE b"));
    }

    #[test]
    fn test_split_keeps_dollar_blocks() {
        let sql = "CREATE FUNCTION f() RETURNS void AS $$\nBEGIN\n  DELETE FROM t;\nEND;\n$$ LANGUAGE plpgsql;\nSELECT 1;";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("DELETE FROM t;"));
        assert!(statements[0].ends_with("LANGUAGE plpgsql;"));
    }

    #[test]
    fn test_embedded_migration_parses() {
        let statements = split_sql_statements(include_str!("migrations/001_initial.sql"));
        assert!(statements.iter().any(|s| s.contains("blocked_slots_unique")));
        assert!(statements.iter().all(|s| has_sql_content(s)));
    }
}
