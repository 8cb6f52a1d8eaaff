//! Script-visible instances of registered classes.
//!
//! Every instance is a userdata carrying a fixed set of hidden internal slots.
//! Scripts cannot reach the slots; property access goes through the class's
//! accessors, then per-instance fields, then the class table itself.

use std::sync::Arc;

use mlua::{AnyUserData, Lua, MetaMethod, Table, UserData, UserDataMethods, Value};
use native_store::{NativeHandle, ReleaseQueue};

use crate::type_key::TypeKey;

pub(crate) const CLASS_VALUE: &str = "class";
pub(crate) const GETTERS_VALUE: &str = "getters";
pub(crate) const SETTERS_VALUE: &str = "setters";
pub(crate) const FIELDS_VALUE: &str = "fields";

/// Hidden slot layout shared by every template.
///
/// The two engine slots come first; whatever the wrapper reserves follows.
pub struct InternalSlotLayout;

impl InternalSlotLayout {
    /// Handle of the object's native backing value.
    pub const NATIVE: usize = 0;
    /// Id of the execution context the object was created in.
    pub const CONTEXT: usize = 1;
    pub const RESERVED: usize = 2;

    pub const fn slot_count(wrapper_slots: usize) -> usize {
        wrapper_slots + Self::RESERVED
    }

    pub const fn wrapper_slot(index: usize) -> usize {
        Self::RESERVED + index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InternalSlot {
    #[default]
    Empty,
    Native(NativeHandle),
    Word(u64),
}

/// Id of the execution context, stored in the runtime's app data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStamp(pub u64);

/// Who frees the native value behind slot 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Released when the script object is collected.
    Script,
    /// The native side keeps the value alive and frees it itself.
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Class,
    Component { native: TypeKey },
}

/// Immutable description of a registered class, shared by its instances.
#[derive(Debug)]
pub struct TemplateShape {
    pub name: String,
    /// Key of the wrapper type.
    pub key: TypeKey,
    pub kind: TemplateKind,
    pub slot_count: usize,
}

impl TemplateShape {
    pub fn component_key(&self) -> Option<TypeKey> {
        match self.kind {
            TemplateKind::Component { native } => Some(native),
            TemplateKind::Class => None,
        }
    }
}

pub struct ScriptObject {
    shape: Arc<TemplateShape>,
    slots: Vec<InternalSlot>,
    release: Option<ReleaseQueue>,
}

impl ScriptObject {
    pub(crate) fn new(
        shape: Arc<TemplateShape>,
        native: NativeHandle,
        context: u64,
        release: Option<ReleaseQueue>,
    ) -> Self {
        let mut slots = vec![InternalSlot::Empty; shape.slot_count];
        slots[InternalSlotLayout::NATIVE] = InternalSlot::Native(native);
        slots[InternalSlotLayout::CONTEXT] = InternalSlot::Word(context);
        Self {
            shape,
            slots,
            release,
        }
    }

    pub fn shape(&self) -> &Arc<TemplateShape> {
        &self.shape
    }

    pub fn class_name(&self) -> &str {
        &self.shape.name
    }

    pub fn component_key(&self) -> Option<TypeKey> {
        self.shape.component_key()
    }

    pub fn owns_native(&self) -> bool {
        self.release.is_some()
    }

    /// Slot 0. Always populated at construction.
    pub fn native_handle(&self) -> NativeHandle {
        match self.slots[InternalSlotLayout::NATIVE] {
            InternalSlot::Native(handle) => handle,
            other => unreachable!("slot 0 of {} holds {:?}", self.shape.name, other),
        }
    }

    pub fn context_id(&self) -> u64 {
        match self.slots[InternalSlotLayout::CONTEXT] {
            InternalSlot::Word(id) => id,
            _ => 0,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> InternalSlot {
        self.slots[index]
    }

    /// Write one of the wrapper's own slots (index relative to the wrapper).
    pub fn set_wrapper_slot(&mut self, index: usize, value: InternalSlot) {
        self.slots[InternalSlotLayout::wrapper_slot(index)] = value;
    }

    pub fn wrapper_slot(&self, index: usize) -> InternalSlot {
        self.slots[InternalSlotLayout::wrapper_slot(index)]
    }
}

impl Drop for ScriptObject {
    fn drop(&mut self) {
        if let Some(queue) = &self.release {
            queue.push(self.native_handle());
        }
    }
}

impl UserData for ScriptObject {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_function(MetaMethod::Index, |_lua, (this, key): (AnyUserData, Value)| {
            index(&this, key)
        });
        methods.add_meta_function(
            MetaMethod::NewIndex,
            |lua, (this, key, value): (AnyUserData, Value, Value)| new_index(lua, &this, key, value),
        );
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("{} {}", this.shape.name, this.native_handle()))
        });
    }
}

fn index(this: &AnyUserData, key: Value) -> mlua::Result<Value> {
    let getters: Table = this.named_user_value(GETTERS_VALUE)?;
    if let Value::Function(getter) = getters.raw_get::<Value>(key.clone())? {
        return getter.call::<Value>(this.clone());
    }

    if let Some(fields) = this.named_user_value::<Option<Table>>(FIELDS_VALUE)? {
        let value: Value = fields.raw_get(key.clone())?;
        if !value.is_nil() {
            return Ok(value);
        }
    }

    let class: Table = this.named_user_value(CLASS_VALUE)?;
    class.raw_get(key)
}

fn new_index(lua: &Lua, this: &AnyUserData, key: Value, value: Value) -> mlua::Result<()> {
    let setters: Table = this.named_user_value(SETTERS_VALUE)?;
    if let Value::Function(setter) = setters.raw_get::<Value>(key.clone())? {
        return setter.call::<()>((this.clone(), value));
    }

    let getters: Table = this.named_user_value(GETTERS_VALUE)?;
    if matches!(getters.raw_get::<Value>(key.clone())?, Value::Function(_)) {
        let name = this.borrow::<ScriptObject>()?.shape.name.clone();
        return Err(mlua::Error::runtime(format!(
            "property '{}' of {} is read-only",
            key_name(&key),
            name
        )));
    }

    let fields = match this.named_user_value::<Option<Table>>(FIELDS_VALUE)? {
        Some(fields) => fields,
        None => {
            let fields = lua.create_table()?;
            this.set_named_user_value(FIELDS_VALUE, fields.clone())?;
            fields
        }
    };
    fields.raw_set(key, value)
}

pub(crate) fn key_name(key: &Value) -> String {
    match key {
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.type_name().to_string(),
    }
}
