//! Privilege cleanup shared by the user and role resources.

use crate::error::ResourceResult;
use scuttle_session::quote;
use sqlx::PgPool;

/// Revoke every privilege `principal` holds across all user databases.
///
/// Dropping a user or role fails while it still holds grants, so deletes
/// run this first. Databases with no objects report "no object matched"
/// and are skipped.
pub(crate) async fn revoke_all(pool: &PgPool, principal: &str) -> ResourceResult<()> {
    let databases: Vec<String> =
        sqlx::query_scalar("SELECT database_name FROM [SHOW DATABASES]")
            .fetch_all(pool)
            .await?;

    for database in databases {
        if database == "system" || database == "postgres" {
            continue;
        }
        let revoke = format!(
            "REVOKE ALL ON {}.* FROM {}",
            quote::ident(&database),
            quote::ident(principal)
        );
        if let Err(err) = sqlx::query(&revoke).execute(pool).await {
            if err.to_string().contains("no object matched") {
                continue;
            }
            return Err(err.into());
        }
    }
    Ok(())
}
