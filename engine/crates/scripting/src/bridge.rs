//! Helpers for native functions called from script.
//!
//! Receivers are script objects whose slot 0 holds a [`NativeHandle`] into the
//! runtime's [`NativeStore`]. The handle is trusted: only registered templates
//! fill slot 0, always with the wrapper's own native type, so a type mismatch
//! is a binding bug and panics. A stale handle (value already reclaimed) is a
//! script-visible error.

use std::any::Any;

use mlua::{
    AnyUserData, AppDataRef, AppDataRefMut, Function, Lua, MultiValue, Table, UserDataRef, Value,
};
use native_store::{NativeHandle, NativeStore, StoreError};
use tracing::info;

use crate::bindings::{self, ScriptClass};
use crate::object::{key_name, Ownership, ScriptObject, FIELDS_VALUE, GETTERS_VALUE};
use crate::type_key::TypeKey;

/// Named registry slot of the private key that tags class tables with the
/// native component type they represent. Scripts cannot name it.
pub const COMPONENT_HASH_SYMBOL: &str = "engine.component_hash";

pub(crate) fn install_component_symbol(lua: &Lua) -> mlua::Result<()> {
    lua.set_named_registry_value(COMPONENT_HASH_SYMBOL, lua.create_table()?)
}

pub(crate) fn component_symbol(lua: &Lua) -> mlua::Result<Table> {
    lua.named_registry_value(COMPONENT_HASH_SYMBOL)
}

pub fn store_ref(lua: &Lua) -> AppDataRef<'_, NativeStore> {
    lua.app_data_ref::<NativeStore>().expect("NativeStore not set")
}

pub fn store_mut(lua: &Lua) -> AppDataRefMut<'_, NativeStore> {
    lua.app_data_mut::<NativeStore>().expect("NativeStore not set")
}

/// Host data attached with `ScriptManager::attach`.
pub fn host<T: 'static>(lua: &Lua) -> Option<AppDataRef<'_, T>> {
    lua.app_data_ref::<T>()
}

/// Whether `value` is a script object built from the class registered for
/// wrapper key `key`.
pub fn is_instance_of(value: &AnyUserData, key: TypeKey) -> bool {
    value
        .borrow::<ScriptObject>()
        .map(|obj| obj.shape().key == key)
        .unwrap_or(false)
}

/// Slot 0 of `value`, after checking it is an instance of wrapper `W`.
///
/// Use this for object arguments, whose class scripts control.
pub fn expect_instance<W: ScriptClass>(lua: &Lua, value: &AnyUserData) -> mlua::Result<NativeHandle> {
    if !is_instance_of(value, TypeKey::of::<W>()) {
        let found = value
            .borrow::<ScriptObject>()
            .map(|obj| obj.class_name().to_string())
            .unwrap_or_else(|_| "userdata".to_string());
        return Err(mlua::Error::runtime(format!(
            "expected {}, got {}",
            bindings::get_class::<W>(lua).name(),
            found
        )));
    }
    native_handle(value)
}

/// Slot 0 of a script object.
pub fn native_handle(this: &AnyUserData) -> mlua::Result<NativeHandle> {
    Ok(this.borrow::<ScriptObject>()?.native_handle())
}

fn stale(handle: NativeHandle) -> mlua::Error {
    mlua::Error::runtime(format!("native object {handle} has been released"))
}

/// Run `f` on the native value behind `this`.
///
/// The store stays borrowed while `f` runs, so `f` must not call back into
/// script.
pub fn with_native<T: Any, R>(
    lua: &Lua,
    this: &AnyUserData,
    f: impl FnOnce(&mut T) -> R,
) -> mlua::Result<R> {
    let handle = native_handle(this)?;
    let mut store = store_mut(lua);
    match store.get_mut::<T>(handle) {
        Ok(value) => Ok(f(value)),
        Err(StoreError::Stale(handle)) => Err(stale(handle)),
        Err(err) => panic!("native type mismatch: {err}"),
    }
}

pub fn with_native_ref<T: Any, R>(
    lua: &Lua,
    this: &AnyUserData,
    f: impl FnOnce(&T) -> R,
) -> mlua::Result<R> {
    let handle = native_handle(this)?;
    let store = store_ref(lua);
    match store.get::<T>(handle) {
        Ok(value) => Ok(f(value)),
        Err(StoreError::Stale(handle)) => Err(stale(handle)),
        Err(err) => panic!("native type mismatch: {err}"),
    }
}

/// Move `value` into the store and wrap it in a new `W` instance that owns it.
pub fn wrap<W: ScriptClass, T: Any + Send>(lua: &Lua, value: T) -> mlua::Result<AnyUserData> {
    let template = bindings::get_class::<W>(lua);
    let handle = store_mut(lua).insert(value);
    template.instantiate(lua, handle, Ownership::Script)
}

/// Wrap a value the native side keeps ownership of.
pub fn wrap_handle<W: ScriptClass>(lua: &Lua, handle: NativeHandle) -> mlua::Result<AnyUserData> {
    bindings::get_class::<W>(lua).instantiate(lua, handle, Ownership::Native)
}

/// Wrap a live native component through whatever class is bound to its type.
/// `None` when no binding exists for `native`.
pub fn wrap_component(
    lua: &Lua,
    native: TypeKey,
    handle: NativeHandle,
) -> mlua::Result<Option<AnyUserData>> {
    match bindings::get_component_class(lua, native) {
        Some(template) => template
            .instantiate(lua, handle, Ownership::Native)
            .map(Some),
        None => Ok(None),
    }
}

/// Native component type represented by a class table or an instance.
pub fn component_key(lua: &Lua, value: &Value) -> mlua::Result<Option<TypeKey>> {
    match value {
        Value::UserData(ud) => match ud.borrow::<ScriptObject>() {
            Ok(obj) => Ok(obj.component_key()),
            Err(_) => Ok(None),
        },
        Value::Table(class) => {
            let Some(meta) = class.metatable() else {
                return Ok(None);
            };
            let tag: Option<UserDataRef<TypeKey>> = meta.raw_get(component_symbol(lua)?)?;
            Ok(tag.map(|key| *key))
        }
        _ => Ok(None),
    }
}

/// Component key of the first argument, as passed to calls like
/// `obj:getComponent(Position)`.
pub fn component_key_from_args(lua: &Lua, args: &MultiValue) -> mlua::Result<TypeKey> {
    let first = args.iter().next().cloned().unwrap_or(Value::Nil);
    component_key(lua, &first)?.ok_or_else(|| {
        mlua::Error::runtime(format!(
            "expected a component class or instance, got {}",
            script_type_name(&first)
        ))
    })
}

/// Type name as `type()` reports it in script. Luau has no integer type.
pub fn script_type_name(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) | Value::Number(_) => "number",
        other => other.type_name(),
    }
}

/// String form of any script value, as the script's `tostring` renders it.
pub fn to_display_string(lua: &Lua, value: &Value) -> mlua::Result<String> {
    if let Value::String(s) = value {
        return Ok(s.to_string_lossy().to_string());
    }
    let tostring: Function = lua.globals().get("tostring")?;
    tostring.call(value.clone())
}

/// Visit the own properties of a table or script object in key order.
///
/// Script objects report their accessors (evaluated) and their instance
/// fields. Other values have no properties.
pub fn for_each_own_property(
    value: &Value,
    mut f: impl FnMut(&str, &Value) -> mlua::Result<()>,
) -> mlua::Result<()> {
    let mut props: Vec<(String, Value)> = Vec::new();
    match value {
        Value::Table(table) => {
            for pair in table.clone().pairs::<Value, Value>() {
                let (k, v) = pair?;
                props.push((key_name(&k), v));
            }
        }
        Value::UserData(ud) if ud.is::<ScriptObject>() => {
            let getters: Table = ud.named_user_value(GETTERS_VALUE)?;
            for pair in getters.pairs::<Value, Function>() {
                let (k, getter) = pair?;
                props.push((key_name(&k), getter.call(ud.clone())?));
            }
            if let Some(fields) = ud.named_user_value::<Option<Table>>(FIELDS_VALUE)? {
                for pair in fields.pairs::<Value, Value>() {
                    let (k, v) = pair?;
                    props.push((key_name(&k), v));
                }
            }
        }
        _ => {}
    }

    props.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, value) in &props {
        f(key, value)?;
    }
    Ok(())
}

/// Multi-line dump of a value's own properties.
pub fn describe_object(lua: &Lua, value: &Value, name: Option<&str>) -> mlua::Result<String> {
    let mut out = match name {
        Some(name) => name.to_string(),
        None => to_display_string(lua, value)?,
    };
    for_each_own_property(value, |key, v| {
        out.push_str(&format!("\n  {} = {}", key, to_display_string(lua, v)?));
        Ok(())
    })?;
    Ok(out)
}

pub fn print_object(lua: &Lua, value: &Value, name: Option<&str>) -> mlua::Result<()> {
    let text = describe_object(lua, value, name)?;
    info!(target: "script", "{}", text);
    Ok(())
}
