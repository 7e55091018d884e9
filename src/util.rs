use std::path::PathBuf;

pub const DB_FILE: &str = "roads.db";

pub fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn default_db_path() -> PathBuf {
    repo_root().join(DB_FILE)
}
