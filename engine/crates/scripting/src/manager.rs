//! Execution context manager.
//!
//! [`ScriptManager`] owns the one runtime instance and its global context.
//! Every native-triggered script execution goes through [`ScriptManager::run`],
//! which serializes callers on a mutex, hands the callback a [`RunInfo`], and
//! converts a script-side failure into [`ScriptError::Script`] after logging
//! it.

use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use mlua::{AnyUserData, FromLuaMulti, Function, IntoLuaMulti, Lua, Table, Value};
use native_store::{NativeHandle, NativeStore};
use observability::RunMetrics;
use tracing::{debug, error, info, warn};

use crate::api;
use crate::bindings::{self, BindingRegistry, ScriptClass, ScriptTemplate};
use crate::bridge::{self, COMPONENT_HASH_SYMBOL};
use crate::config::ScriptConfig;
use crate::error::{thrown_message, ScriptError};
use crate::modules::{self, ModuleCache, ModuleStatus};
use crate::object::ContextStamp;
use crate::subsystem::Subsystem;
use crate::type_key::TypeKey;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct Runtime {
    lua: Lua,
    context_id: u64,
}

/// Counters describing a live runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStats {
    pub context_id: u64,
    pub classes: usize,
    pub components: usize,
    pub modules: usize,
    pub natives: usize,
    pub memory_bytes: usize,
}

pub struct ScriptManager {
    config: ScriptConfig,
    runtime: Mutex<Option<Runtime>>,
    run_counter: AtomicU64,
}

impl ScriptManager {
    pub fn new(config: ScriptConfig) -> Self {
        Self {
            config,
            runtime: Mutex::new(None),
            run_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Runtime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_runtime(&self) -> Result<Runtime, ScriptError> {
        let lua = Lua::new();
        if self.config.memory_limit > 0 {
            lua.set_memory_limit(self.config.memory_limit)?;
        }
        if !self.config.script_root.is_dir() {
            warn!(
                root = %self.config.script_root.display(),
                "script root does not exist, every require will fail"
            );
        }

        let context_id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let cache = ModuleCache::new(&self.config);
        let root = cache.root().to_path_buf();
        lua.set_app_data(NativeStore::new());
        lua.set_app_data(BindingRegistry::new());
        lua.set_app_data(cache);
        lua.set_app_data(ContextStamp(context_id));

        bridge::install_component_symbol(&lua)?;
        lua.globals()
            .set("require", modules::create_require(&lua, root)?)?;
        api::log::register_log_api(&lua)?;

        Ok(Runtime { lua, context_id })
    }

    /// Run `callback` with exclusive access to the runtime.
    ///
    /// Any error the callback returns (a thrown script value, a failed
    /// require, a native function's error) is logged and returned as
    /// [`ScriptError::Script`] carrying the thrown value's text. The runtime
    /// stays usable afterwards.
    ///
    /// Not re-entrant: calling back into the manager from `callback` deadlocks.
    /// Use the [`RunInfo`] methods instead.
    ///
    /// # Panics
    /// If the manager is not initialized.
    pub fn run<R>(
        &self,
        callback: impl FnOnce(&RunInfo<'_>) -> mlua::Result<R>,
    ) -> Result<R, ScriptError> {
        let guard = self.lock();
        let runtime = active(&guard);
        let run_id = self.run_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();

        let info = RunInfo {
            manager: self,
            lua: &runtime.lua,
            context: runtime.lua.globals(),
            context_id: runtime.context_id,
            run_id,
        };
        let result = callback(&info);
        drop(info);

        let reclaimed = bridge::store_mut(&runtime.lua).reclaim();
        RunMetrics {
            run_id,
            duration_us: started.elapsed().as_micros(),
            budget_us: self.config.run_budget_us as u128,
            failed: result.is_err(),
            reclaimed,
        }
        .log();

        result.map_err(|err| {
            let message = thrown_message(&err);
            error!(target: "script", run = run_id, "{}", message);
            debug!(target: "script", run = run_id, "full error: {}", err);
            ScriptError::Script { message }
        })
    }

    /// Load `path` (relative to the script root) inside a run scope. With
    /// `is_json_module` the file is parsed as data whatever its extension.
    pub fn load(&self, path: &str, is_json_module: bool) -> Result<(), ScriptError> {
        self.run(|info| info.load(path, is_json_module).map(|_| ()))
    }

    /// Evaluate a source string in the global context.
    pub fn run_script(&self, source: &str, name: &str) -> Result<(), ScriptError> {
        self.run(|info| info.exec(source, name))
    }

    /// Evaluate the file at `path` in the global context.
    pub fn run_file(&self, path: &Path) -> Result<(), ScriptError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ScriptError::Load(format!("{}: {}", path.display(), e)))?;
        let name = path.display().to_string();
        self.run_script(&source, &name)
    }

    /// Register wrapper `W` and install its constructor as global `name`.
    pub fn register_class<W: ScriptClass>(&self, name: &str) -> Result<Table, ScriptError> {
        self.run(|info| {
            let class = info.register_class::<W>(name)?;
            info.context().set(name, class.clone())?;
            Ok(class)
        })
    }

    /// Register wrapper `W` for native component `N` and install its
    /// constructor as global `name`.
    pub fn register_component<W: ScriptClass, N: 'static>(
        &self,
        name: &str,
    ) -> Result<Table, ScriptError> {
        self.run(|info| {
            let class = info.register_component::<W, N>(name)?;
            info.context().set(name, class.clone())?;
            Ok(class)
        })
    }

    /// Make `value` reachable from native functions through `bridge::host`.
    pub fn attach<T: Send + 'static>(&self, value: T) {
        let guard = self.lock();
        active(&guard).lua.set_app_data(value);
    }

    pub fn create_string(&self, s: impl AsRef<[u8]>) -> Result<mlua::String, ScriptError> {
        let guard = self.lock();
        Ok(active(&guard).lua.create_string(s)?)
    }

    pub fn create_function<A, R, F>(&self, f: F) -> Result<Function, ScriptError>
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Lua, A) -> mlua::Result<R> + Send + 'static,
    {
        let guard = self.lock();
        Ok(active(&guard).lua.create_function(f)?)
    }

    pub fn module_status(&self, request: &str) -> ModuleStatus {
        let guard = self.lock();
        modules::status(&active(&guard).lua, request)
    }

    /// `None` when the manager is not initialized.
    pub fn stats(&self) -> Option<RuntimeStats> {
        let guard = self.lock();
        let runtime = guard.as_ref()?;
        let lua = &runtime.lua;
        let (classes, components) = lua
            .app_data_ref::<BindingRegistry>()
            .map(|r| (r.class_count(), r.component_count()))
            .unwrap_or_default();
        Some(RuntimeStats {
            context_id: runtime.context_id,
            classes,
            components,
            modules: lua.app_data_ref::<ModuleCache>().map(|c| c.len()).unwrap_or(0),
            natives: lua.app_data_ref::<NativeStore>().map(|s| s.len()).unwrap_or(0),
            memory_bytes: lua.used_memory(),
        })
    }
}

fn active<'g>(guard: &'g MutexGuard<'_, Option<Runtime>>) -> &'g Runtime {
    match guard.as_ref() {
        Some(runtime) => runtime,
        None => panic!("script runtime used before on_initialize or after on_terminate"),
    }
}

impl Subsystem for ScriptManager {
    fn name(&self) -> &'static str {
        "scripting"
    }

    fn on_initialize(&self) -> bool {
        let mut guard = self.lock();
        if guard.is_some() {
            warn!("script runtime already initialized");
            return true;
        }
        match self.create_runtime() {
            Ok(runtime) => {
                info!(
                    context = runtime.context_id,
                    root = %self.config.script_root.display(),
                    "script runtime initialized"
                );
                *guard = Some(runtime);
                true
            }
            Err(e) => {
                error!("failed to initialize script runtime: {}", e);
                false
            }
        }
    }

    fn on_terminate(&self) -> bool {
        let Some(runtime) = self.lock().take() else {
            warn!("script runtime terminated while not initialized");
            return false;
        };
        let lua = runtime.lua;

        // Runtime-side handles go first, the runtime itself last.
        drop(lua.remove_app_data::<BindingRegistry>());
        drop(lua.remove_app_data::<ModuleCache>());
        if let Err(e) = lua.unset_named_registry_value(COMPONENT_HASH_SYMBOL) {
            warn!("failed to release component symbol: {}", e);
        }
        lua.expire_registry_values();
        if let Err(e) = lua.gc_collect() {
            warn!("final garbage collection failed: {}", e);
        }
        if let Some(mut store) = lua.remove_app_data::<NativeStore>() {
            debug!(live = store.len(), "dropping native objects");
            store.clear();
        }
        drop(lua);

        info!(context = runtime.context_id, "script runtime terminated");
        true
    }
}

impl Drop for ScriptManager {
    fn drop(&mut self) {
        if self.is_initialized() {
            self.on_terminate();
        }
    }
}

/// Scoped view of the runtime for the duration of one [`ScriptManager::run`].
pub struct RunInfo<'a> {
    manager: &'a ScriptManager,
    lua: &'a Lua,
    context: Table,
    context_id: u64,
    run_id: u64,
}

impl<'a> RunInfo<'a> {
    pub fn manager(&self) -> &'a ScriptManager {
        self.manager
    }

    pub fn lua(&self) -> &'a Lua {
        self.lua
    }

    /// The global context table.
    pub fn context(&self) -> &Table {
        &self.context
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Load a module relative to the script root and return its exports.
    pub fn load(&self, path: &str, is_data: bool) -> mlua::Result<Value> {
        modules::load_request(self.lua, path, is_data)
    }

    pub fn exec(&self, source: &str, name: &str) -> mlua::Result<()> {
        self.lua.load(source).set_name(format!("={}", name)).exec()
    }

    pub fn eval<R: FromLuaMulti>(&self, source: &str, name: &str) -> mlua::Result<R> {
        self.lua.load(source).set_name(format!("={}", name)).eval()
    }

    pub fn call_global<A: IntoLuaMulti, R: FromLuaMulti>(
        &self,
        name: &str,
        args: A,
    ) -> mlua::Result<R> {
        let func: Function = self.context.get(name)?;
        func.call(args)
    }

    pub fn create_string(&self, s: impl AsRef<[u8]>) -> mlua::Result<mlua::String> {
        self.lua.create_string(s)
    }

    pub fn create_function<A, R, F>(&self, f: F) -> mlua::Result<Function>
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Lua, A) -> mlua::Result<R> + Send + 'static,
    {
        self.lua.create_function(f)
    }

    pub fn register_class<W: ScriptClass>(&self, name: &str) -> mlua::Result<Table> {
        bindings::register_class::<W>(self.lua, name)
    }

    pub fn register_component<W: ScriptClass, N: 'static>(
        &self,
        name: &str,
    ) -> mlua::Result<Table> {
        bindings::register_component::<W, N>(self.lua, name)
    }

    /// # Panics
    /// If `W` was never registered.
    pub fn get_class<W: ScriptClass>(&self) -> Arc<ScriptTemplate> {
        bindings::get_class::<W>(self.lua)
    }

    pub fn get_component_class(&self, native: TypeKey) -> Option<Arc<ScriptTemplate>> {
        bindings::get_component_class(self.lua, native)
    }

    pub fn insert_native<T: Any + Send>(&self, value: T) -> NativeHandle {
        bridge::store_mut(self.lua).insert(value)
    }

    pub fn wrap<W: ScriptClass, T: Any + Send>(&self, value: T) -> mlua::Result<AnyUserData> {
        bridge::wrap::<W, T>(self.lua, value)
    }

    pub fn wrap_handle<W: ScriptClass>(&self, handle: NativeHandle) -> mlua::Result<AnyUserData> {
        bridge::wrap_handle::<W>(self.lua, handle)
    }

    pub fn wrap_component(
        &self,
        native: TypeKey,
        handle: NativeHandle,
    ) -> mlua::Result<Option<AnyUserData>> {
        bridge::wrap_component(self.lua, native, handle)
    }

    pub fn with_native<T: Any, R>(
        &self,
        this: &AnyUserData,
        f: impl FnOnce(&mut T) -> R,
    ) -> mlua::Result<R> {
        bridge::with_native(self.lua, this, f)
    }
}
