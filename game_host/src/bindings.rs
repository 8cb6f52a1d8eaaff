//! Script classes for the host's native types.

use scripting::bridge;
use scripting::mlua::{self, AnyUserData, Lua, MultiValue, Table, Value};
use scripting::{ClassBuilder, ScriptClass, ScriptError, ScriptManager, TypeKey};

use crate::components::{GameObject, Position, Vec3};

/// Hidden per-object table holding attached component instances.
const COMPONENTS_VALUE: &str = "components";

pub struct Vector3Class;

impl ScriptClass for Vector3Class {
    fn create(class: &mut ClassBuilder<'_>) -> mlua::Result<()> {
        class.constructor(|_, (x, y, z): (Option<f64>, Option<f64>, Option<f64>)| {
            Ok(Vec3::new(
                x.unwrap_or_default(),
                y.unwrap_or_default(),
                z.unwrap_or_default(),
            ))
        });

        class.getter("x", |lua, this| bridge::with_native_ref(lua, this, |v: &Vec3| v.x))?;
        class.setter("x", |lua, this, x: f64| {
            bridge::with_native(lua, this, |v: &mut Vec3| v.x = x)
        })?;
        class.getter("y", |lua, this| bridge::with_native_ref(lua, this, |v: &Vec3| v.y))?;
        class.setter("y", |lua, this, y: f64| {
            bridge::with_native(lua, this, |v: &mut Vec3| v.y = y)
        })?;
        class.getter("z", |lua, this| bridge::with_native_ref(lua, this, |v: &Vec3| v.z))?;
        class.setter("z", |lua, this, z: f64| {
            bridge::with_native(lua, this, |v: &mut Vec3| v.z = z)
        })?;

        class.method("length", |lua, this, ()| {
            bridge::with_native_ref(lua, this, |v: &Vec3| v.length())
        })?;
        class.method("dot", |lua, this, other: AnyUserData| {
            let other = vec3_arg(lua, &other)?;
            bridge::with_native_ref(lua, this, |v: &Vec3| v.dot(&other))
        })?;
        class.method("add", |lua, this, other: AnyUserData| {
            let other = vec3_arg(lua, &other)?;
            let sum = bridge::with_native_ref(lua, this, |v: &Vec3| v.add(&other))?;
            bridge::wrap::<Vector3Class, _>(lua, sum)
        })?;
        class.method("scale", |lua, this, factor: f64| {
            let scaled = bridge::with_native_ref(lua, this, |v: &Vec3| v.scale(factor))?;
            bridge::wrap::<Vector3Class, _>(lua, scaled)
        })?;

        class.function("zero", |lua, ()| {
            bridge::wrap::<Vector3Class, _>(lua, Vec3::default())
        })?;
        Ok(())
    }
}

fn vec3_arg(lua: &Lua, value: &AnyUserData) -> mlua::Result<Vec3> {
    bridge::expect_instance::<Vector3Class>(lua, value)?;
    bridge::with_native_ref(lua, value, |v: &Vec3| *v)
}

pub struct PositionClass;

impl ScriptClass for PositionClass {
    fn create(class: &mut ClassBuilder<'_>) -> mlua::Result<()> {
        class.constructor(|_, (x, y, z): (f64, f64, f64)| Ok(Position::new(x, y, z)));

        class.getter("x", |lua, this| bridge::with_native_ref(lua, this, |p: &Position| p.x))?;
        class.setter("x", |lua, this, x: f64| {
            bridge::with_native(lua, this, |p: &mut Position| p.x = x)
        })?;
        class.getter("y", |lua, this| bridge::with_native_ref(lua, this, |p: &Position| p.y))?;
        class.setter("y", |lua, this, y: f64| {
            bridge::with_native(lua, this, |p: &mut Position| p.y = y)
        })?;
        class.getter("z", |lua, this| bridge::with_native_ref(lua, this, |p: &Position| p.z))?;
        class.setter("z", |lua, this, z: f64| {
            bridge::with_native(lua, this, |p: &mut Position| p.z = z)
        })?;

        class.method("translate", |lua, this, delta: AnyUserData| {
            let delta = vec3_arg(lua, &delta)?;
            bridge::with_native(lua, this, |p: &mut Position| p.translate(delta))
        })?;
        class.method("toVector", |lua, this, ()| {
            let v = bridge::with_native_ref(lua, this, |p: &Position| p.to_vec3())?;
            bridge::wrap::<Vector3Class, _>(lua, v)
        })?;
        Ok(())
    }
}

pub struct GameObjectClass;

impl ScriptClass for GameObjectClass {
    fn create(class: &mut ClassBuilder<'_>) -> mlua::Result<()> {
        class.constructor(|_, name: String| Ok(GameObject::new(name)));

        class.getter("name", |lua, this| {
            bridge::with_native_ref(lua, this, |g: &GameObject| g.name.clone())
        })?;
        class.setter("name", |lua, this, name: String| {
            bridge::with_native(lua, this, |g: &mut GameObject| g.name = name)
        })?;
        class.getter("componentCount", |lua, this| {
            bridge::with_native_ref(lua, this, |g: &GameObject| g.components.len())
        })?;

        // obj:addComponent(instance) -> instance; replaces one of the same type
        class.method("addComponent", |lua, this, component: AnyUserData| {
            let value = Value::UserData(component.clone());
            let key = bridge::component_key(lua, &value)?.ok_or_else(|| {
                mlua::Error::runtime("addComponent expects a component instance")
            })?;
            components_table(lua, this)?.raw_set(slot_key(key), component)?;
            bridge::with_native(lua, this, |g: &mut GameObject| g.attach(key))?;
            Ok(value)
        })?;

        // obj:getComponent(ClassOrInstance) -> instance | nil
        class.method("getComponent", |lua, this, args: MultiValue| {
            let key = bridge::component_key_from_args(lua, &args)?;
            components_table(lua, this)?.raw_get::<Value>(slot_key(key))
        })?;

        class.method("hasComponent", |lua, this, args: MultiValue| {
            let key = bridge::component_key_from_args(lua, &args)?;
            bridge::with_native_ref(lua, this, |g: &GameObject| g.has(key))
        })?;

        class.method("removeComponent", |lua, this, args: MultiValue| {
            let key = bridge::component_key_from_args(lua, &args)?;
            components_table(lua, this)?.raw_set(slot_key(key), Value::Nil)?;
            bridge::with_native(lua, this, |g: &mut GameObject| g.detach(key))
        })?;
        Ok(())
    }
}

// Keys above i64::MAX lose precision as script numbers, so use the hex text.
fn slot_key(key: TypeKey) -> String {
    key.to_string()
}

fn components_table(lua: &Lua, this: &AnyUserData) -> mlua::Result<Table> {
    match this.named_user_value::<Option<Table>>(COMPONENTS_VALUE)? {
        Some(table) => Ok(table),
        None => {
            let table = lua.create_table()?;
            this.set_named_user_value(COMPONENTS_VALUE, table.clone())?;
            Ok(table)
        }
    }
}

/// Register every host class and install its constructor as a global.
pub fn register_builtin_classes(manager: &ScriptManager) -> Result<(), ScriptError> {
    manager.register_class::<Vector3Class>("Vector3")?;
    manager.register_component::<PositionClass, Position>("Position")?;
    manager.register_class::<GameObjectClass>("GameObject")?;
    Ok(())
}
