use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// A named way of launching a session: which program, with which arguments,
/// where, and with what extra environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchPreset {
    pub id: i64,
    pub name: String,
    /// `None` launches the user's login shell.
    pub program: Option<String>,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env_vars: BTreeMap<String, String>,
}

/// Fields for inserting a preset.
#[derive(Debug, Clone, Default)]
pub struct NewPreset<'a> {
    pub name: &'a str,
    pub program: Option<&'a str>,
    pub args: &'a [&'a str],
    pub working_dir: Option<&'a str>,
    pub env_vars: &'a [(&'a str, &'a str)],
}

/// Presets available on a fresh install.
const BUILTIN_PRESETS: &[(&str, Option<&str>, &[&str])] = &[
    ("shell", None, &[]),
    ("claude", Some("claude"), &[]),
    ("codex", Some("codex"), &[]),
];

const COLUMNS: &str = "id, name, program, args, working_dir, env_vars";

fn from_row(row: &Row<'_>) -> rusqlite::Result<LaunchPreset> {
    let args: String = row.get(3)?;
    let env_vars: Option<String> = row.get(5)?;
    Ok(LaunchPreset {
        id: row.get(0)?,
        name: row.get(1)?,
        program: row.get(2)?,
        args: serde_json::from_str(&args).map_err(|e| json_error(3, e))?,
        working_dir: row.get(4)?,
        env_vars: match env_vars {
            Some(json) => serde_json::from_str(&json).map_err(|e| json_error(5, e))?,
            None => BTreeMap::new(),
        },
    })
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn json_error(column: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

pub fn list_presets(conn: &Connection) -> rusqlite::Result<Vec<LaunchPreset>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM launch_presets ORDER BY name"))?;
    let rows = stmt.query_map([], from_row)?;
    rows.collect()
}

pub fn find_preset(conn: &Connection, name: &str) -> rusqlite::Result<Option<LaunchPreset>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM launch_presets WHERE name = ?1"),
        params![name],
        from_row,
    )
    .optional()
}

pub fn create_preset(conn: &Connection, preset: &NewPreset<'_>) -> rusqlite::Result<i64> {
    let args = to_json(&preset.args)?;
    let env_vars = if preset.env_vars.is_empty() {
        None
    } else {
        let map: BTreeMap<&str, &str> = preset.env_vars.iter().copied().collect();
        Some(to_json(&map)?)
    };
    conn.execute(
        "INSERT INTO launch_presets (name, program, args, working_dir, env_vars) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![preset.name, preset.program, args, preset.working_dir, env_vars],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_preset(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute("DELETE FROM launch_presets WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Insert the built-in presets that are not present yet. Returns how many
/// were added.
pub fn seed_builtin_presets(conn: &Connection) -> rusqlite::Result<usize> {
    let mut added = 0;
    for (name, program, args) in BUILTIN_PRESETS {
        added += conn.execute(
            "INSERT OR IGNORE INTO launch_presets (name, program, args) VALUES (?1, ?2, ?3)",
            params![name, program, to_json(args)?],
        )?;
    }
    if added > 0 {
        log::info!("seeded {added} built-in launch presets");
    }
    Ok(added)
}
