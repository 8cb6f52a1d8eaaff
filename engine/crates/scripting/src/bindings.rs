//! Class/component binding registry.
//!
//! Wrapper kinds implement [`ScriptClass`] to describe a script-visible
//! class. Registration builds a [`ScriptTemplate`] keyed by the wrapper's
//! [`TypeKey`]; component registrations are additionally indexed by the key of
//! the native component type they represent, so native systems can find the
//! script constructor for a live component without knowing the wrapper.
//!
//! Re-registering a wrapper replaces its entry. Constructors handed out
//! earlier keep working and keep producing objects of the old shape.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use mlua::{
    AnyUserData, FromLuaMulti, IntoLua, IntoLuaMulti, Lua, MultiValue, RegistryKey, Table, Value,
};
use native_store::{NativeHandle, NativeStore};
use tracing::{debug, warn};

use crate::bridge;
use crate::object::{
    ContextStamp, InternalSlotLayout, Ownership, ScriptObject, TemplateKind, TemplateShape,
    CLASS_VALUE, GETTERS_VALUE, SETTERS_VALUE,
};
use crate::type_key::TypeKey;

const GETTERS_FIELD: &str = "__getters";
const SETTERS_FIELD: &str = "__setters";

type NativeConstructor = Arc<dyn Fn(&Lua, MultiValue) -> mlua::Result<NativeHandle> + Send + Sync>;

/// A wrapper kind describing one script-visible class.
pub trait ScriptClass: 'static {
    /// Hidden slots the wrapper reserves for itself, placed after the
    /// engine's fixed slots.
    const SLOTS: usize = 0;

    fn create(class: &mut ClassBuilder<'_>) -> mlua::Result<()>;
}

/// Collects a class's constructor, methods and accessors during registration.
pub struct ClassBuilder<'lua> {
    lua: &'lua Lua,
    name: String,
    key: TypeKey,
    class: Table,
    getters: Table,
    setters: Table,
    constructor: Option<NativeConstructor>,
}

impl<'lua> ClassBuilder<'lua> {
    fn new(lua: &'lua Lua, name: &str, key: TypeKey) -> mlua::Result<Self> {
        Ok(Self {
            lua,
            name: name.to_string(),
            key,
            class: lua.create_table()?,
            getters: lua.create_table()?,
            setters: lua.create_table()?,
            constructor: None,
        })
    }

    pub fn lua(&self) -> &'lua Lua {
        self.lua
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native constructor run when a script calls the class. Its result is
    /// stored in the native store and owned by the new script object.
    ///
    /// Classes without a constructor cannot be instantiated from script.
    pub fn constructor<A, T, F>(&mut self, f: F) -> &mut Self
    where
        A: FromLuaMulti,
        T: Any + Send,
        F: Fn(&Lua, A) -> mlua::Result<T> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(move |lua, args| {
            let args = A::from_lua_multi(args, lua)?;
            let value = f(lua, args)?;
            Ok(bridge::store_mut(lua).insert(value))
        }));
        self
    }

    /// Instance method, called from script as `obj:name(...)`. The receiver
    /// must be an instance of this class.
    pub fn method<A, R, F>(&mut self, name: &str, f: F) -> mlua::Result<&mut Self>
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Lua, &AnyUserData, A) -> mlua::Result<R> + Send + 'static,
    {
        let key = self.key;
        let label = format!("{}:{}", self.name, name);
        let func = self
            .lua
            .create_function(move |lua, (this, rest): (Value, MultiValue)| {
                let this = match this {
                    Value::UserData(ud) if bridge::is_instance_of(&ud, key) => ud,
                    other => {
                        return Err(mlua::Error::runtime(format!(
                            "{} called on {}",
                            label,
                            bridge::script_type_name(&other)
                        )))
                    }
                };
                let args = A::from_lua_multi(rest, lua)?;
                f(lua, &this, args)
            })?;
        self.class.raw_set(name, func)?;
        Ok(self)
    }

    /// Function stored on the class table itself.
    pub fn function<A, R, F>(&mut self, name: &str, f: F) -> mlua::Result<&mut Self>
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Lua, A) -> mlua::Result<R> + Send + 'static,
    {
        let func = self.lua.create_function(f)?;
        self.class.raw_set(name, func)?;
        Ok(self)
    }

    /// Plain value stored on the class table.
    pub fn constant(&mut self, name: &str, value: impl IntoLua) -> mlua::Result<&mut Self> {
        self.class.raw_set(name, value)?;
        Ok(self)
    }

    /// Read-only accessor. Assigning to it from script raises an error.
    pub fn getter<R, F>(&mut self, name: &str, f: F) -> mlua::Result<&mut Self>
    where
        R: IntoLua,
        F: Fn(&Lua, &AnyUserData) -> mlua::Result<R> + Send + 'static,
    {
        let func = self
            .lua
            .create_function(move |lua, this: AnyUserData| f(lua, &this))?;
        self.getters.raw_set(name, func)?;
        Ok(self)
    }

    pub fn setter<V, F>(&mut self, name: &str, f: F) -> mlua::Result<&mut Self>
    where
        V: mlua::FromLua,
        F: Fn(&Lua, &AnyUserData, V) -> mlua::Result<()> + Send + 'static,
    {
        let func = self
            .lua
            .create_function(move |lua, (this, value): (AnyUserData, V)| f(lua, &this, value))?;
        self.setters.raw_set(name, func)?;
        Ok(self)
    }

    fn finish(self, shape: Arc<TemplateShape>, component_symbol: &Table) -> mlua::Result<Table> {
        let lua = self.lua;
        let ctor_shape = shape.clone();
        let construct = self.constructor;
        let call = lua.create_function(move |lua, (class, args): (Table, MultiValue)| {
            let construct = construct.as_ref().ok_or_else(|| {
                mlua::Error::runtime(format!(
                    "{} cannot be constructed from script",
                    ctor_shape.name
                ))
            })?;
            let handle = construct(lua, args)?;
            instantiate(lua, &ctor_shape, &class, handle, Ownership::Script)
        })?;

        let class_name = shape.name.clone();
        let to_string = lua.create_function(move |_, _: Table| Ok(class_name.clone()))?;

        let meta = lua.create_table()?;
        meta.raw_set("__call", call)?;
        meta.raw_set("__tostring", to_string)?;
        meta.raw_set("__metatable", false)?;
        meta.raw_set(GETTERS_FIELD, self.getters)?;
        meta.raw_set(SETTERS_FIELD, self.setters)?;
        if let Some(native) = shape.component_key() {
            meta.raw_set(component_symbol.clone(), native)?;
        }
        self.class.set_metatable(Some(meta));
        Ok(self.class)
    }
}

/// Runtime-owned blueprint of a registered class.
pub struct ScriptTemplate {
    shape: Arc<TemplateShape>,
    class: RegistryKey,
}

impl ScriptTemplate {
    pub fn name(&self) -> &str {
        &self.shape.name
    }

    /// Key of the wrapper type.
    pub fn key(&self) -> TypeKey {
        self.shape.key
    }

    pub fn kind(&self) -> TemplateKind {
        self.shape.kind
    }

    pub fn is_component(&self) -> bool {
        matches!(self.shape.kind, TemplateKind::Component { .. })
    }

    pub fn component_key(&self) -> Option<TypeKey> {
        self.shape.component_key()
    }

    pub fn slot_count(&self) -> usize {
        self.shape.slot_count
    }

    pub fn shape(&self) -> &Arc<TemplateShape> {
        &self.shape
    }

    /// The callable class table scripts construct instances with.
    pub fn constructor(&self, lua: &Lua) -> mlua::Result<Table> {
        lua.registry_value(&self.class)
    }

    /// Create a script object around an existing native handle.
    pub fn instantiate(
        &self,
        lua: &Lua,
        handle: NativeHandle,
        ownership: Ownership,
    ) -> mlua::Result<AnyUserData> {
        let class = self.constructor(lua)?;
        instantiate(lua, &self.shape, &class, handle, ownership)
    }
}

impl std::fmt::Debug for ScriptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptTemplate")
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

fn instantiate(
    lua: &Lua,
    shape: &Arc<TemplateShape>,
    class: &Table,
    handle: NativeHandle,
    ownership: Ownership,
) -> mlua::Result<AnyUserData> {
    let meta = class
        .metatable()
        .ok_or_else(|| mlua::Error::runtime(format!("class {} lost its metatable", shape.name)))?;
    let getters: Table = meta.raw_get(GETTERS_FIELD)?;
    let setters: Table = meta.raw_get(SETTERS_FIELD)?;

    let context = lua.app_data_ref::<ContextStamp>().map(|c| c.0).unwrap_or(0);
    let release = match ownership {
        Ownership::Script => Some(bridge::store_ref(lua).release_queue()),
        Ownership::Native => None,
    };

    let object = lua.create_userdata(ScriptObject::new(shape.clone(), handle, context, release))?;
    object.set_named_user_value(CLASS_VALUE, class.clone())?;
    object.set_named_user_value(GETTERS_VALUE, getters)?;
    object.set_named_user_value(SETTERS_VALUE, setters)?;
    Ok(object)
}

/// Templates by wrapper key, plus the component index by native key.
#[derive(Default)]
pub struct BindingRegistry {
    classes: HashMap<TypeKey, Arc<ScriptTemplate>>,
    components: HashMap<TypeKey, Arc<ScriptTemplate>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `template`, returning the registration it replaced.
    pub fn insert(&mut self, template: Arc<ScriptTemplate>) -> Option<Arc<ScriptTemplate>> {
        let key = template.key();
        let replaced = self.classes.insert(key, template.clone());
        if replaced.is_some() {
            self.components.retain(|_, t| t.key() != key);
        }
        if let Some(native) = template.component_key() {
            self.components.insert(native, template);
        }
        replaced
    }

    pub fn get_class(&self, key: TypeKey) -> Option<Arc<ScriptTemplate>> {
        self.classes.get(&key).cloned()
    }

    pub fn get_component_class(&self, native: TypeKey) -> Option<Arc<ScriptTemplate>> {
        self.components.get(&native).cloned()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn clear(&mut self) {
        self.components.clear();
        self.classes.clear();
    }
}

fn registry_mut(lua: &Lua) -> mlua::AppDataRefMut<'_, BindingRegistry> {
    lua.app_data_mut::<BindingRegistry>()
        .expect("BindingRegistry not set")
}

fn registry_ref(lua: &Lua) -> mlua::AppDataRef<'_, BindingRegistry> {
    lua.app_data_ref::<BindingRegistry>()
        .expect("BindingRegistry not set")
}

fn register<W: ScriptClass>(lua: &Lua, name: &str, kind: TemplateKind) -> mlua::Result<Table> {
    let key = TypeKey::of::<W>();
    let mut builder = ClassBuilder::new(lua, name, key)?;
    W::create(&mut builder)?;

    let shape = Arc::new(TemplateShape {
        name: name.to_string(),
        key,
        kind,
        slot_count: InternalSlotLayout::slot_count(W::SLOTS),
    });
    let symbol = bridge::component_symbol(lua)?;
    let class = builder.finish(shape.clone(), &symbol)?;
    let template = Arc::new(ScriptTemplate {
        shape,
        class: lua.create_registry_value(class.clone())?,
    });

    let replaced = registry_mut(lua).insert(template);
    match replaced {
        Some(old) => warn!(
            class = name,
            wrapper = std::any::type_name::<W>(),
            previous = old.name(),
            "script class re-registered, previous constructor stays live"
        ),
        None => debug!(class = name, key = %key, "script class registered"),
    }
    Ok(class)
}

/// Register wrapper `W` as a plain class and return its constructor.
pub fn register_class<W: ScriptClass>(lua: &Lua, name: &str) -> mlua::Result<Table> {
    register::<W>(lua, name, TemplateKind::Class)
}

/// Register wrapper `W` as the script face of native component `N`.
pub fn register_component<W: ScriptClass, N: 'static>(lua: &Lua, name: &str) -> mlua::Result<Table> {
    register::<W>(
        lua,
        name,
        TemplateKind::Component {
            native: TypeKey::of::<N>(),
        },
    )
}

/// Template of wrapper `W`.
///
/// # Panics
/// If `W` was never registered. Registration happens at startup, so a miss
/// here is an ordering bug rather than a runtime condition.
pub fn get_class<W: ScriptClass>(lua: &Lua) -> Arc<ScriptTemplate> {
    registry_ref(lua)
        .get_class(TypeKey::of::<W>())
        .unwrap_or_else(|| {
            panic!(
                "script class {} used before registration",
                std::any::type_name::<W>()
            )
        })
}

/// Template bound to native component `native`, if any.
pub fn get_component_class(lua: &Lua, native: TypeKey) -> Option<Arc<ScriptTemplate>> {
    registry_ref(lua).get_component_class(native)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::COMPONENT_HASH_SYMBOL;
    use crate::error::thrown_message;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: f64,
        y: f64,
        z: f64,
    }

    struct PositionClass;

    impl ScriptClass for PositionClass {
        fn create(class: &mut ClassBuilder<'_>) -> mlua::Result<()> {
            class.constructor(|_, (x, y, z): (f64, f64, f64)| Ok(Position { x, y, z }));
            class.getter("x", |lua, this| bridge::with_native(lua, this, |p: &mut Position| p.x))?;
            class.setter("x", |lua, this, x: f64| {
                bridge::with_native(lua, this, |p: &mut Position| p.x = x)
            })?;
            class.getter("y", |lua, this| bridge::with_native(lua, this, |p: &mut Position| p.y))?;
            class.method("sum", |lua, this, ()| {
                bridge::with_native(lua, this, |p: &mut Position| p.x + p.y + p.z)
            })?;
            Ok(())
        }
    }

    struct Marker;

    impl ScriptClass for Marker {
        const SLOTS: usize = 1;

        fn create(class: &mut ClassBuilder<'_>) -> mlua::Result<()> {
            class.constant("KIND", "marker")?;
            Ok(())
        }
    }

    fn setup() -> Lua {
        let lua = Lua::new();
        lua.set_app_data(NativeStore::new());
        lua.set_app_data(BindingRegistry::new());
        lua.set_app_data(ContextStamp(1));
        lua.set_named_registry_value(COMPONENT_HASH_SYMBOL, lua.create_table().unwrap())
            .unwrap();
        lua
    }

    #[test]
    fn register_class_returns_callable_constructor() {
        let lua = setup();
        let ctor = register_class::<PositionClass>(&lua, "Position").unwrap();
        lua.globals().set("Position", ctor).unwrap();

        let sum: f64 = lua
            .load("local p = Position(1, 2, 3); return p:sum()")
            .eval()
            .unwrap();
        assert_eq!(sum, 6.0);
    }

    #[test]
    fn accessors_and_fields() {
        let lua = setup();
        let ctor = register_class::<PositionClass>(&lua, "Position").unwrap();
        lua.globals().set("Position", ctor).unwrap();

        let (x, tag): (f64, String) = lua
            .load(
                r#"
                local p = Position(1, 2, 3)
                p.x = 10
                p.tag = "hero"
                return p.x, p.tag
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(x, 10.0);
        assert_eq!(tag, "hero");
    }

    #[test]
    fn read_only_accessor_rejects_assignment() {
        let lua = setup();
        let ctor = register_class::<PositionClass>(&lua, "Position").unwrap();
        lua.globals().set("Position", ctor).unwrap();

        let err = lua
            .load("local p = Position(1, 2, 3); p.y = 5")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("read-only"), "{err}");
    }

    #[test]
    fn class_without_constructor_is_not_constructible() {
        let lua = setup();
        let ctor = register_class::<Marker>(&lua, "Marker").unwrap();
        lua.globals().set("Marker", ctor).unwrap();

        let kind: String = lua.load("return Marker.KIND").eval().unwrap();
        assert_eq!(kind, "marker");
        let err = lua.load("Marker()").exec().unwrap_err();
        assert!(err.to_string().contains("cannot be constructed"), "{err}");
    }

    #[test]
    fn method_rejects_foreign_receiver() {
        let lua = setup();
        let ctor = register_class::<PositionClass>(&lua, "Position").unwrap();
        lua.globals().set("Position", ctor).unwrap();

        let err = lua.load("Position.sum(42)").exec().unwrap_err();
        assert_eq!(thrown_message(&err), "Position:sum called on number");
        let err = lua.load("Position.sum(1.5)").exec().unwrap_err();
        assert_eq!(thrown_message(&err), "Position:sum called on number");
        let err = lua.load("Position.sum({})").exec().unwrap_err();
        assert_eq!(thrown_message(&err), "Position:sum called on table");
    }

    #[test]
    fn template_slot_count_includes_engine_slots() {
        let lua = setup();
        register_class::<Marker>(&lua, "Marker").unwrap();
        let template = get_class::<Marker>(&lua);
        assert_eq!(template.slot_count(), 3);
        assert!(!template.is_component());
        assert_eq!(template.key(), TypeKey::of::<Marker>());
    }

    #[test]
    fn component_is_indexed_by_native_type() {
        let lua = setup();
        register_component::<PositionClass, Position>(&lua, "Position").unwrap();

        let by_native = get_component_class(&lua, TypeKey::of::<Position>()).unwrap();
        let by_wrapper = get_class::<PositionClass>(&lua);
        assert!(Arc::ptr_eq(&by_native, &by_wrapper));
        assert_eq!(by_native.component_key(), Some(TypeKey::of::<Position>()));
    }

    #[test]
    fn unknown_component_is_none() {
        let lua = setup();
        assert!(get_component_class(&lua, TypeKey::of::<Position>()).is_none());
    }

    #[test]
    #[should_panic(expected = "used before registration")]
    fn get_class_before_registration_panics() {
        let lua = setup();
        let _ = get_class::<Marker>(&lua);
    }

    #[test]
    fn re_registration_replaces_entry_and_keeps_old_constructor() {
        let lua = setup();
        let first = register_component::<PositionClass, Position>(&lua, "Position").unwrap();
        let first_template = get_class::<PositionClass>(&lua);

        let second = register_class::<PositionClass>(&lua, "Position2").unwrap();
        let second_template = get_class::<PositionClass>(&lua);
        assert!(!Arc::ptr_eq(&first_template, &second_template));
        assert_eq!(second_template.name(), "Position2");
        // The class re-registration is not a component, so the stale index entry is gone.
        assert!(get_component_class(&lua, TypeKey::of::<Position>()).is_none());

        lua.globals().set("Old", first).unwrap();
        lua.globals().set("New", second).unwrap();
        let (old, new): (String, String) = lua
            .load("return tostring(Old(1, 2, 3)), tostring(New(1, 2, 3))")
            .eval()
            .unwrap();
        assert!(old.starts_with("Position "), "{old}");
        assert!(new.starts_with("Position2 "), "{new}");
    }

    #[test]
    fn instantiate_wraps_existing_native() {
        let lua = setup();
        register_class::<PositionClass>(&lua, "Position").unwrap();
        let handle = bridge::store_mut(&lua).insert(Position { x: 4.0, y: 5.0, z: 6.0 });

        let template = get_class::<PositionClass>(&lua);
        let obj = template.instantiate(&lua, handle, Ownership::Native).unwrap();
        assert_eq!(bridge::native_handle(&obj).unwrap(), handle);
        let sum = bridge::with_native(&lua, &obj, |p: &mut Position| p.x + p.y + p.z).unwrap();
        assert_eq!(sum, 15.0);
        assert!(!obj.borrow::<ScriptObject>().unwrap().owns_native());
    }
}
