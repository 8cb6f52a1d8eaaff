pub mod bindings;
pub mod components;
pub mod config;
pub mod engine_api;

pub use bindings::{register_builtin_classes, GameObjectClass, PositionClass, Vector3Class};
pub use engine_api::{install_engine_api, HostInfo};
