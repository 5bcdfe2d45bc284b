use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, bail, Context, Result};
use directories::ProjectDirs;
use mlua::{Lua, LuaOptions, StdLib, Table, Value};

/// Where script output goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Lua's own `print`, straight to stdout.
    #[default]
    Stdout,
    /// Collected into the run report. The buffer is a `String`, so
    /// output that is not valid UTF-8 is captured lossily.
    Capture,
}

impl FromStr for OutputMode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "stdout" => OutputMode::Stdout,
            "capture" => OutputMode::Capture,
            _ => bail!("unknown output mode '{s}' (use: stdout|capture)"),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub output: OutputMode,
    pub chunk_name: Option<String>,
    /// Refuse allocations after this many blocks (fault injection).
    pub alloc_fail_after: Option<usize>,
    /// Default log filter when `RUST_LOG` is unset.
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output: OutputMode::Stdout,
            chunk_name: None,
            alloc_fail_after: None,
            log: "info".into(),
        }
    }
}

/// XDG: ~/.config/lua-embed/config.lua
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "example", "lua-embed").map(|p| p.config_dir().join("config.lua"))
}

impl Config {
    /// Reads the user config if there is one, defaults otherwise.
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let src = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        Self::from_lua(&src).with_context(|| format!("loading config from {:?}", path))
    }

    /// Evaluates a config chunk that returns a table, e.g.
    /// `return { output = "capture", log = "debug" }`.
    /// Missing fields keep their defaults.
    pub fn from_lua(src: &str) -> Result<Self> {
        // mlua::Error is mapped to a string rather than bubbled with `?`.
        let lua = Lua::new_with(StdLib::NONE, LuaOptions::default())
            .map_err(|e| anyhow!(e.to_string()))?;
        let cfg_val = lua
            .load(src)
            .set_name("=config")
            .eval::<Value>()
            .map_err(|e| anyhow!(e.to_string()))?;

        let cfg_tbl: Table = match cfg_val {
            Value::Table(t) => t,
            Value::Nil => return Ok(Self::default()),
            other => bail!("config must return a table, got {}", other.type_name()),
        };

        let mut cfg = Self::default();
        if let Some(output) = get_string(&cfg_tbl, "output")? {
            cfg.output = output.parse()?;
        }
        if let Some(name) = get_string(&cfg_tbl, "chunk_name")? {
            cfg.chunk_name = Some(name);
        }
        if let Some(log) = get_string(&cfg_tbl, "log")? {
            cfg.log = log;
        }
        match cfg_tbl
            .get::<Value>("alloc_fail_after")
            .map_err(|e| anyhow!(e.to_string()))?
        {
            Value::Nil => {}
            Value::Integer(n) if n >= 0 => cfg.alloc_fail_after = Some(n as usize),
            other => bail!(
                "`alloc_fail_after` must be a non-negative integer, got {}",
                other.type_name()
            ),
        }
        Ok(cfg)
    }
}

fn get_string(tbl: &Table, key: &str) -> Result<Option<String>> {
    match tbl.get::<Value>(key).map_err(|e| anyhow!(e.to_string()))? {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(
            s.to_str().map_err(|e| anyhow!(e.to_string()))?.to_string(),
        )),
        other => bail!("`{key}` must be a string, got {}", other.type_name()),
    }
}
