use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeSet;

pub const SCHEMA_VERSION: &str = "1";

pub fn create_tables(conn: &mut Connection) -> Result<()> {
    let attachment_columns: BTreeSet<&'static str> =
        ["world", "key", "value", "revision"].into_iter().collect();

    if table_exists(conn, "world_attachments")? && !table_has_columns(conn, "world_attachments", &attachment_columns)? {
        conn.execute("DROP TABLE world_attachments", [])?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS world_attachments (
          world    TEXT NOT NULL,
          key      TEXT NOT NULL CHECK (key IN ('structures','edges','roads')),
          value    TEXT NOT NULL,
          revision INTEGER NOT NULL DEFAULT 1,
          PRIMARY KEY (world, key)
        );
    "#,
    )?;
    conn.execute(
        "INSERT INTO meta(key, value) VALUES('schema_version', ?1) ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

fn table_has_columns(conn: &Connection, table: &str, required: &BTreeSet<&str>) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut present: BTreeSet<String> = BTreeSet::new();
    for r in rows { present.insert(r?); }
    Ok(required.iter().all(|c| present.contains(*c)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_attachment_table_is_replaced() -> Result<()> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("CREATE TABLE world_attachments (world TEXT, blob TEXT);")?;
        create_tables(&mut conn)?;
        let cols = ["world", "key", "value", "revision"].into_iter().collect();
        assert!(table_has_columns(&conn, "world_attachments", &cols)?);
        let v: String = conn.query_row("SELECT value FROM meta WHERE key='schema_version'", [], |r| r.get(0))?;
        assert_eq!(v, SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn create_tables_is_idempotent() -> Result<()> {
        let mut conn = Connection::open_in_memory()?;
        create_tables(&mut conn)?;
        conn.execute("INSERT INTO world_attachments(world, key, value) VALUES ('w','edges','[]')", [])?;
        create_tables(&mut conn)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM world_attachments", [], |r| r.get(0))?;
        assert_eq!(n, 1);
        Ok(())
    }
}
