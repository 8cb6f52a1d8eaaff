use scripting::bridge;
use scripting::{ScriptError, ScriptManager};

/// Host data reachable from script through the `engine` table.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub title: String,
}

/// Attach `info` to the runtime and install the global `engine` table.
pub fn install_engine_api(manager: &ScriptManager, info: HostInfo) -> Result<(), ScriptError> {
    manager.attach(info);
    manager.run(|run| {
        let engine = run.lua().create_table()?;

        // engine.title() -> string
        let title_fn = run.create_function(|lua, ()| {
            Ok(bridge::host::<HostInfo>(lua)
                .map(|info| info.title.clone())
                .unwrap_or_default())
        })?;
        engine.set("title", title_fn)?;

        // engine.contextId() -> integer
        let context_id = run.context_id();
        let context_fn = run.create_function(move |_, ()| Ok(context_id))?;
        engine.set("contextId", context_fn)?;

        run.context().set("engine", engine)
    })
}
