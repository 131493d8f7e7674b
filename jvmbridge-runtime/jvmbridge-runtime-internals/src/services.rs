//! Runtime-side services the context owns as shutdown resources.

pub mod class_loader;
pub mod gc;
pub mod type_manager;

pub use crate::services::class_loader::ClassLoader;
pub use crate::services::gc::{GcBridge, MemoryStats};
pub use crate::services::type_manager::TypeManager;
