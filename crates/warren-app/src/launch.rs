use std::path::Path;

use anyhow::{bail, Context};
use rusqlite::Connection;
use warren_db::{presets, LaunchPreset};
use warren_pty::SpawnSpec;

/// Look up a preset by name.
pub fn find(conn: &Connection, name: &str) -> anyhow::Result<LaunchPreset> {
    match presets::find_preset(conn, name).with_context(|| format!("loading preset {name}"))? {
        Some(preset) => Ok(preset),
        None => {
            let known: Vec<String> = presets::list_presets(conn)?
                .into_iter()
                .map(|p| p.name)
                .collect();
            bail!("unknown preset {name:?} (known: {})", known.join(", "))
        }
    }
}

/// What to spawn for `preset` in a workspace rooted at `root`. A relative
/// preset directory is taken relative to the root.
pub fn spawn_spec(preset: &LaunchPreset, root: &Path) -> SpawnSpec {
    let mut spec = SpawnSpec {
        program: preset.program.clone(),
        args: preset.args.clone(),
        ..SpawnSpec::default()
    };
    spec.cwd = Some(match preset.working_dir.as_deref() {
        Some(dir) => root.join(dir),
        None => root.to_path_buf(),
    });
    for (key, value) in &preset.env_vars {
        spec = spec.with_env(key, value);
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use warren_db::NewPreset;

    fn preset(program: Option<&str>, working_dir: Option<&str>) -> LaunchPreset {
        LaunchPreset {
            id: 1,
            name: "p".into(),
            program: program.map(str::to_string),
            args: vec!["--flag".into()],
            working_dir: working_dir.map(str::to_string),
            env_vars: BTreeMap::from([("MODE".to_string(), "fast".to_string())]),
        }
    }

    #[test]
    fn test_spawn_spec_defaults_to_root() {
        let spec = spawn_spec(&preset(Some("claude"), None), Path::new("/repo"));
        assert_eq!(spec.program.as_deref(), Some("claude"));
        assert_eq!(spec.args, ["--flag"]);
        assert_eq!(spec.cwd, Some(PathBuf::from("/repo")));
        assert_eq!(spec.env, [("MODE".to_string(), "fast".to_string())]);
    }

    #[test]
    fn test_spawn_spec_working_dir() {
        let relative = spawn_spec(&preset(None, Some("web")), Path::new("/repo"));
        assert_eq!(relative.cwd, Some(PathBuf::from("/repo/web")));
        assert_eq!(relative.program, None);

        let absolute = spawn_spec(&preset(None, Some("/tmp/x")), Path::new("/repo"));
        assert_eq!(absolute.cwd, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_find_preset() {
        let conn = warren_db::open_in_memory().unwrap();
        presets::seed_builtin_presets(&conn).unwrap();
        presets::create_preset(
            &conn,
            &NewPreset {
                name: "tests",
                program: Some("cargo"),
                args: &["test"],
                ..NewPreset::default()
            },
        )
        .unwrap();

        assert_eq!(find(&conn, "shell").unwrap().program, None);
        assert_eq!(find(&conn, "tests").unwrap().args, ["test"]);

        let err = find(&conn, "nope").unwrap_err().to_string();
        assert!(err.contains("nope"));
        assert!(err.contains("shell"));
    }
}
