pub mod api;
pub mod bindings;
pub mod bridge;
pub mod config;
pub mod error;
pub mod manager;
pub mod modules;
pub mod object;
pub mod subsystem;
pub mod type_key;

pub use bindings::{ClassBuilder, ScriptClass, ScriptTemplate};
pub use config::ScriptConfig;
pub use error::ScriptError;
pub use manager::{RunInfo, RuntimeStats, ScriptManager};
pub use modules::ModuleStatus;
pub use object::{InternalSlot, InternalSlotLayout, Ownership, ScriptObject};
pub use subsystem::Subsystem;
pub use type_key::TypeKey;

// Re-export mlua for downstream crates implementing ScriptClass
pub use mlua;
pub use native_store::NativeHandle;
