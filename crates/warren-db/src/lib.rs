pub mod presets;
pub mod schema;
pub mod settings;

use rusqlite::Connection;
use std::path::Path;

pub use presets::{LaunchPreset, NewPreset};

/// Open (or create) the database at `path` and bring its schema up to date.
pub fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    schema::initialize(&conn)?;
    Ok(conn)
}

/// In-memory database with the full schema, for tests and `--no-db` runs.
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    schema::initialize(&conn)?;
    Ok(conn)
}
