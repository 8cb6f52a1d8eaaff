//! Module loader behind `require`.
//!
//! Modules are keyed by their canonical path, so two spellings of the same
//! file share one cache entry. Each path moves through
//! `Unloaded -> Loading -> Loaded`. Requiring a path that is still `Loading`
//! (a cycle) returns whatever its `module.exports` holds at that moment
//! instead of evaluating it again. A failed load drops the record, leaving the
//! path `Unloaded` for the next attempt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mlua::{Function, Lua, LuaSerdeExt, RegistryKey, Table, Value};
use tracing::{debug, warn};

use crate::config::ScriptConfig;
use crate::error::{thrown_message, ScriptError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Json,
    Toml,
}

impl DataFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => DataFormat::Toml,
            _ => DataFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Executable code.
    Script,
    /// Structured data, parsed into a table.
    Data(DataFormat),
    /// Binary asset; exports its root-relative path.
    Asset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Unloaded,
    Loading,
    Loaded,
}

enum ModuleState {
    /// Evaluation in progress. Holds the `module` table so cycles can read its
    /// partial exports.
    Loading { module: RegistryKey },
    Loaded { exports: RegistryKey },
}

struct ModuleRecord {
    state: ModuleState,
    load_id: u64,
}

/// Per-runtime module cache, stored in the runtime's app data.
pub struct ModuleCache {
    root: PathBuf,
    config: ScriptConfig,
    records: HashMap<PathBuf, ModuleRecord>,
    next_load_id: u64,
}

impl ModuleCache {
    pub fn new(config: &ScriptConfig) -> Self {
        let root = std::fs::canonicalize(&config.script_root).unwrap_or_else(|_| {
            std::path::absolute(&config.script_root).unwrap_or_else(|_| config.script_root.clone())
        });
        Self {
            root,
            config: config.clone(),
            records: HashMap::new(),
            next_load_id: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `request` to a canonical file path.
    ///
    /// A leading `/` anchors the request at the script root; anything else is
    /// relative to `base_dir`. Requests without an extension also try `.luau`
    /// and `.lua`.
    pub fn resolve(&self, base_dir: &Path, request: &str) -> Result<PathBuf, ScriptError> {
        let candidate = match request.strip_prefix('/') {
            Some(rest) => self.root.join(rest),
            None => base_dir.join(request),
        };

        let mut candidates = vec![candidate.clone()];
        if candidate.extension().is_none() {
            candidates.push(candidate.with_extension("luau"));
            candidates.push(candidate.with_extension("lua"));
        }

        let found = candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ScriptError::ModuleNotFound {
                request: request.to_string(),
                base: base_dir.to_path_buf(),
            })?;
        let path = std::fs::canonicalize(found)?;
        if !path.starts_with(&self.root) {
            return Err(ScriptError::ModuleOutsideRoot {
                path,
                root: self.root.clone(),
            });
        }
        Ok(path)
    }

    pub fn classify(&self, path: &Path, force_data: bool) -> ModuleKind {
        if self.config.is_data_extension(path) || force_data {
            ModuleKind::Data(DataFormat::for_path(path))
        } else if self.config.is_asset_extension(path) {
            ModuleKind::Asset
        } else {
            ModuleKind::Script
        }
    }

    pub fn status(&self, path: &Path) -> ModuleStatus {
        match self.records.get(path) {
            None => ModuleStatus::Unloaded,
            Some(ModuleRecord {
                state: ModuleState::Loading { .. },
                ..
            }) => ModuleStatus::Loading,
            Some(ModuleRecord {
                state: ModuleState::Loaded { .. },
                ..
            }) => ModuleStatus::Loaded,
        }
    }

    /// Number of fully loaded modules.
    pub fn len(&self) -> usize {
        self.records
            .values()
            .filter(|r| matches!(r.state, ModuleState::Loaded { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Root-relative form of `path` with `/` separators.
    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn cache_ref(lua: &Lua) -> mlua::AppDataRef<'_, ModuleCache> {
    lua.app_data_ref::<ModuleCache>().expect("ModuleCache not set")
}

fn cache_mut(lua: &Lua) -> mlua::AppDataRefMut<'_, ModuleCache> {
    lua.app_data_mut::<ModuleCache>().expect("ModuleCache not set")
}

/// A `require` function resolving relative to `base_dir`.
pub fn create_require(lua: &Lua, base_dir: PathBuf) -> mlua::Result<Function> {
    lua.create_function(move |lua, request: String| require(lua, &base_dir, &request))
}

pub fn require(lua: &Lua, base_dir: &Path, request: &str) -> mlua::Result<Value> {
    let (path, kind) = {
        let cache = cache_ref(lua);
        let path = cache.resolve(base_dir, request).map_err(ScriptError::into_lua)?;
        let kind = cache.classify(&path, false);
        (path, kind)
    };
    load_path(lua, &path, kind)
}

/// Load `request` relative to the script root, optionally forcing it to be
/// parsed as data.
pub fn load_request(lua: &Lua, request: &str, force_data: bool) -> mlua::Result<Value> {
    let (path, kind) = {
        let cache = cache_ref(lua);
        let root = cache.root().to_path_buf();
        let path = cache.resolve(&root, request).map_err(ScriptError::into_lua)?;
        let kind = cache.classify(&path, force_data);
        (path, kind)
    };
    load_path(lua, &path, kind)
}

/// Status of `request` resolved against the script root. Unresolvable
/// requests are `Unloaded`.
pub fn status(lua: &Lua, request: &str) -> ModuleStatus {
    let cache = cache_ref(lua);
    let root = cache.root().to_path_buf();
    match cache.resolve(&root, request) {
        Ok(path) => cache.status(&path),
        Err(_) => ModuleStatus::Unloaded,
    }
}

fn load_path(lua: &Lua, path: &Path, kind: ModuleKind) -> mlua::Result<Value> {
    let (module, load_id, name) = {
        let mut cache = cache_mut(lua);
        match cache.records.get(path) {
            Some(ModuleRecord {
                state: ModuleState::Loaded { exports },
                ..
            }) => return lua.registry_value(exports),
            Some(ModuleRecord {
                state: ModuleState::Loading { module },
                load_id,
            }) => {
                debug!(
                    module = %cache.relative(path),
                    load_id,
                    "cyclic require, returning partial exports"
                );
                let module: Table = lua.registry_value(module)?;
                return module.get("exports");
            }
            None => {}
        }

        let module = lua.create_table()?;
        module.set("exports", lua.create_table()?)?;
        let load_id = cache.next_load_id;
        cache.next_load_id += 1;
        let record = ModuleRecord {
            state: ModuleState::Loading {
                module: lua.create_registry_value(module.clone())?,
            },
            load_id,
        };
        cache.records.insert(path.to_path_buf(), record);
        (module, load_id, cache.relative(path))
    };

    // Every failure past this point must drop the Loading record.
    let result = match kind {
        ModuleKind::Script => eval_script(lua, path, &name, &module, load_id),
        ModuleKind::Data(format) => eval_data(lua, path, format),
        ModuleKind::Asset => lua.create_string(&name).map(Value::String),
    }
    .and_then(|exports| Ok((lua.create_registry_value(exports.clone())?, exports)));

    match result {
        Ok((key, exports)) => {
            let mut cache = cache_mut(lua);
            if let Some(record) = cache.records.get_mut(path) {
                record.state = ModuleState::Loaded { exports: key };
            }
            debug!(module = %name, load_id, ?kind, "module loaded");
            Ok(exports)
        }
        Err(err) => {
            cache_mut(lua).records.remove(path);
            warn!(module = %name, "module failed to load: {}", thrown_message(&err));
            Err(err)
        }
    }
}

fn read_source(path: &Path) -> mlua::Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| ScriptError::Load(format!("{}: {}", path.display(), e)).into_lua())
}

fn eval_script(
    lua: &Lua,
    path: &Path,
    name: &str,
    module: &Table,
    load_id: u64,
) -> mlua::Result<Value> {
    let source = read_source(path)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    // Module-local scope: its own module/exports/require, globals behind it.
    let env = lua.create_table()?;
    let env_meta = lua.create_table()?;
    env_meta.raw_set("__index", lua.globals())?;
    env.set_metatable(Some(env_meta));
    env.raw_set("module", module.clone())?;
    env.raw_set("exports", module.get::<Value>("exports")?)?;
    env.raw_set("require", create_require(lua, base_dir)?)?;

    let returned: Value = lua
        .load(source)
        .set_name(format!("={}#{}", name, load_id))
        .set_environment(env)
        .call(())?;
    if !returned.is_nil() {
        module.set("exports", returned)?;
    }
    module.get("exports")
}

fn eval_data(lua: &Lua, path: &Path, format: DataFormat) -> mlua::Result<Value> {
    let text = read_source(path)?;
    let data_error = |reason: String| {
        ScriptError::DataModule {
            path: path.to_path_buf(),
            reason,
        }
        .into_lua()
    };
    match format {
        DataFormat::Json => {
            let value: serde_json::Value =
                serde_json::from_str(&text).map_err(|e| data_error(e.to_string()))?;
            lua.to_value(&value)
        }
        DataFormat::Toml => {
            let value: toml::Value = toml::from_str(&text).map_err(|e| data_error(e.to_string()))?;
            lua.to_value(&value)
        }
    }
}
