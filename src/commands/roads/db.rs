use anyhow::Result;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

pub fn open_ro<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    // Wait a bit for locks to clear when a running session holds the DB
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(conn)
}

pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    // WAL lets the snapshot/status commands read while a session writes
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

pub fn ensure_schema(conn: &mut Connection) -> Result<()> {
    crate::db::create_tables(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::OptionalExtension;
    use tempfile::NamedTempFile;

    #[test]
    fn ensure_schema_creates_required_tables() -> Result<()> {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path();
        let mut conn = open_rw(path)?;
        ensure_schema(&mut conn)?;

        for t in ["meta", "world_attachments"] {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
                    [t],
                    |row| row.get(0),
                )
                .optional()?;
            assert!(exists.is_some(), "expected table {} to exist", t);
        }

        let ro = open_ro(path)?;
        assert!(ro.execute("DELETE FROM meta", []).is_err());
        Ok(())
    }
}
