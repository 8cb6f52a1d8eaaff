use std::sync::Arc;

use game_host::components::{GameObject, Position, Vec3};
use game_host::{
    install_engine_api, register_builtin_classes, GameObjectClass, HostInfo, PositionClass,
    Vector3Class,
};
use scripting::mlua::{AnyUserData, Value};
use scripting::{
    bridge, InternalSlot, InternalSlotLayout, ScriptClass, ScriptConfig, ScriptManager,
    ScriptObject, Subsystem, TypeKey,
};
use tempfile::TempDir;

fn host() -> (TempDir, ScriptManager) {
    let dir = TempDir::new().unwrap();
    let manager = ScriptManager::new(ScriptConfig::with_root(dir.path()));
    assert!(manager.on_initialize());
    register_builtin_classes(&manager).unwrap();
    (dir, manager)
}

#[test]
fn position_slot_zero_holds_constructor_values() {
    let (_dir, manager) = host();
    let native = manager
        .run(|info| {
            let obj: AnyUserData = info.eval("return Position(1, 2, 3)", "scenario")?;
            let slot = obj.borrow::<ScriptObject>()?.slot(InternalSlotLayout::NATIVE);
            assert!(matches!(slot, InternalSlot::Native(_)));
            info.with_native(&obj, |p: &mut Position| *p)
        })
        .unwrap();
    assert_eq!(native, Position::new(1.0, 2.0, 3.0));
}

#[test]
fn objects_carry_the_context_id() {
    let (_dir, manager) = host();
    let context = manager.stats().unwrap().context_id;
    let stamped = manager
        .run(|info| {
            let obj: AnyUserData = info.eval("return Vector3(1, 1, 1)", "scenario")?;
            let stamped = obj.borrow::<ScriptObject>()?.context_id();
            Ok(stamped)
        })
        .unwrap();
    assert_eq!(stamped, context);
}

#[test]
fn register_component_is_found_by_native_type() {
    let (_dir, manager) = host();
    manager
        .run(|info| {
            let by_native = info
                .get_component_class(TypeKey::of::<Position>())
                .expect("Position binding");
            let by_wrapper = info.get_class::<PositionClass>();
            assert!(Arc::ptr_eq(&by_native, &by_wrapper));
            assert_eq!(by_native.name(), "Position");
            Ok(())
        })
        .unwrap();
}

#[test]
fn unregistered_component_is_not_found() {
    let (_dir, manager) = host();
    let found = manager
        .run(|info| Ok(info.get_component_class(TypeKey::of::<Vec3>()).is_some()))
        .unwrap();
    assert!(!found);
}

struct NeverRegistered;

impl ScriptClass for NeverRegistered {
    fn create(_class: &mut scripting::ClassBuilder<'_>) -> scripting::mlua::Result<()> {
        Ok(())
    }
}

#[test]
#[should_panic(expected = "used before registration")]
fn get_class_for_unregistered_wrapper_panics() {
    let (_dir, manager) = host();
    let _ = manager.run(|info| Ok(info.get_class::<NeverRegistered>().name().to_string()));
}

#[test]
fn script_methods_mutate_native_values() {
    let (_dir, manager) = host();
    let native = manager
        .run(|info| {
            let obj: AnyUserData = info.eval(
                r#"
                local p = Position(1, 2, 3)
                p:translate(Vector3(1, 1, 1))
                p.z = 10
                return p
                "#,
                "scenario",
            )?;
            info.with_native(&obj, |p: &mut Position| *p)
        })
        .unwrap();
    assert_eq!(native, Position::new(2.0, 3.0, 10.0));
}

#[test]
fn vector_methods_return_new_objects() {
    let (_dir, manager) = host();
    let (length, sum_x): (f64, f64) = manager
        .run(|info| {
            info.eval(
                r#"
                local a = Vector3(3, 4, 0)
                local b = a:add(Vector3.zero()):scale(2)
                return a:length(), b.x
                "#,
                "scenario",
            )
        })
        .unwrap();
    assert_eq!(length, 5.0);
    assert_eq!(sum_x, 6.0);
}

#[test]
fn wrong_argument_class_is_a_script_error() {
    let (_dir, manager) = host();
    let err = manager
        .run_script("Position(0, 0, 0):translate(Position(1, 1, 1))", "scenario")
        .unwrap_err();
    assert!(err.message().contains("expected Vector3, got Position"), "{err}");
}

#[test]
fn game_object_dispatches_on_component_hash() {
    let (_dir, manager) = host();
    let (same, x, has_after, count): (bool, f64, bool, i64) = manager
        .run(|info| {
            info.eval(
                r#"
                local hero = GameObject("hero")
                local p = hero:addComponent(Position(5, 6, 7))
                local same = hero:getComponent(Position) == p
                local x = hero:getComponent(p).x
                hero:removeComponent(Position)
                return same, x, hero:hasComponent(Position), hero.componentCount
                "#,
                "scenario",
            )
        })
        .unwrap();
    assert!(same);
    assert_eq!(x, 5.0);
    assert!(!has_after);
    assert_eq!(count, 0);
}

#[test]
fn add_component_rejects_plain_classes() {
    let (_dir, manager) = host();
    let err = manager
        .run_script("GameObject('a'):addComponent(Vector3(1, 2, 3))", "scenario")
        .unwrap_err();
    assert_eq!(err.message(), "addComponent expects a component instance");
}

#[test]
fn native_component_wrapped_for_script() {
    let (_dir, manager) = host();
    let y: f64 = manager
        .run(|info| {
            let handle = info.insert_native(Position::new(0.0, 9.0, 0.0));
            let obj = info
                .wrap_component(TypeKey::of::<Position>(), handle)?
                .expect("Position binding");
            info.context().set("native_pos", obj)?;
            info.eval("return native_pos.y", "scenario")
        })
        .unwrap();
    assert_eq!(y, 9.0);
}

#[test]
fn native_wrapped_game_object_reads_name() {
    let (_dir, manager) = host();
    let name: String = manager
        .run(|info| {
            let obj = info.wrap::<GameObjectClass, _>(GameObject::new("boss"))?;
            info.context().set("boss", obj)?;
            info.eval("return boss.name", "scenario")
        })
        .unwrap();
    assert_eq!(name, "boss");
}

#[test]
fn read_only_accessor_cannot_be_assigned() {
    let (_dir, manager) = host();
    let err = manager
        .run_script("local g = GameObject('a'); g.componentCount = 3", "scenario")
        .unwrap_err();
    assert!(err.message().contains("read-only"), "{err}");
}

#[test]
fn engine_api_reads_attached_host_info() {
    let (_dir, manager) = host();
    install_engine_api(
        &manager,
        HostInfo {
            title: "Dungeon".to_string(),
        },
    )
    .unwrap();
    let (title, context): (String, u64) = manager
        .run(|info| info.eval("return engine.title(), engine.contextId()", "scenario"))
        .unwrap();
    assert_eq!(title, "Dungeon");
    assert_eq!(context, manager.stats().unwrap().context_id);
}

#[test]
fn inspect_walks_object_properties() {
    let (_dir, manager) = host();
    let text = manager
        .run(|info| {
            let obj: Value = info.eval(
                "local p = Position(1, 2, 3); p.tag = 'spawn'; return p",
                "scenario",
            )?;
            bridge::describe_object(info.lua(), &obj, Some("p"))
        })
        .unwrap();
    assert_eq!(text, "p\n  tag = spawn\n  x = 1\n  y = 2\n  z = 3");
}

#[test]
fn vector_class_is_not_a_component() {
    let (_dir, manager) = host();
    let (key, is_component) = manager
        .run(|info| {
            let class: Value = info.context().get("Vector3")?;
            let key = bridge::component_key(info.lua(), &class)?;
            Ok((key, info.get_class::<Vector3Class>().is_component()))
        })
        .unwrap();
    assert!(key.is_none());
    assert!(!is_component);
}
