use std::path::Path;

use tokio_rusqlite::Connection;

use crate::error::{Result, db_error};

pub mod jobs;

pub async fn init(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).await.map_err(db_error)?;
    apply_schema(&conn).await?;
    Ok(conn)
}

/// Open a private in-memory store (simulation mode and tests).
pub async fn init_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().await.map_err(db_error)?;
    apply_schema(&conn).await?;
    Ok(conn)
}

async fn apply_schema(conn: &Connection) -> Result<()> {
    conn.call(|conn| {
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;

        // Enable foreign keys (SQLite disables them by default!)
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        Ok::<(), tokio_rusqlite::rusqlite::Error>(())
    })
    .await
    .map_err(db_error)?;

    Ok(())
}
