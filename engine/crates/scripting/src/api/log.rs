use mlua::{Lua, Result as LuaResult, Value, Variadic};

use crate::bridge;

/// Join log arguments the way `print` would, separated by spaces.
fn join_args(lua: &Lua, args: &[Value]) -> LuaResult<String> {
    let parts = args
        .iter()
        .map(|v| bridge::to_display_string(lua, v))
        .collect::<LuaResult<Vec<_>>>()?;
    Ok(parts.join(" "))
}

/// Register log.* API functions on the global table.
/// Maps to tracing macros under the `script` target.
pub fn register_log_api(lua: &Lua) -> LuaResult<()> {
    let log_table = lua.create_table()?;

    let info_fn = lua.create_function(|lua, args: Variadic<Value>| {
        tracing::info!(target: "script", "{}", join_args(lua, &args)?);
        Ok(())
    })?;
    log_table.set("info", info_fn)?;

    let warn_fn = lua.create_function(|lua, args: Variadic<Value>| {
        tracing::warn!(target: "script", "{}", join_args(lua, &args)?);
        Ok(())
    })?;
    log_table.set("warn", warn_fn)?;

    let error_fn = lua.create_function(|lua, args: Variadic<Value>| {
        tracing::error!(target: "script", "{}", join_args(lua, &args)?);
        Ok(())
    })?;
    log_table.set("error", error_fn)?;

    let debug_fn = lua.create_function(|lua, args: Variadic<Value>| {
        tracing::debug!(target: "script", "{}", join_args(lua, &args)?);
        Ok(())
    })?;
    log_table.set("debug", debug_fn)?;

    // log.inspect(value, name?) prints every own key and value
    let inspect_fn = lua.create_function(|lua, (value, name): (Value, Option<String>)| {
        bridge::print_object(lua, &value, name.as_deref())
    })?;
    log_table.set("inspect", inspect_fn)?;

    lua.globals().set("log", log_table)?;
    Ok(())
}
