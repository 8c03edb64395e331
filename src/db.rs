use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

// SQLITE_CONSTRAINT_UNIQUE
const UNIQUE_VIOLATION: &str = "2067";

pub async fn connect(url: &str) -> Result<Pool<Sqlite>, sqlx::Error> {
    let sql = SqlitePoolOptions::new().connect(url).await?;

    sqlx::migrate!("./migrations").run(&sql).await?;

    Ok(sql)
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(x) => x.code().is_some_and(|code| code == UNIQUE_VIOLATION),
        _ => false,
    }
}

/// Private in-memory database with the schema applied.
#[cfg(test)]
pub async fn memory() -> Pool<Sqlite> {
    // one connection: every `:memory:` connection is its own database
    let sql = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    sqlx::migrate!("./migrations").run(&sql).await.unwrap();

    sql
}
