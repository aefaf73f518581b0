pub mod access;
pub mod archetype;
pub mod bundle;
pub mod component;
pub mod entity;
pub mod resource;
pub mod schedule;
pub mod storage;
pub mod system;
pub mod world;

pub use component::Component;
pub use entity::Entity;
pub use resource::Resource;
pub use schedule::{IntoSetConfigs, IntoSystemConfigs, Schedule, SetLabel, SystemRef};
pub use world::{Id as WorldId, World};

pub use system::{IntoSystem, System};

/// Re-export the derive macros so downstream code only needs one dependency.
pub use tessera_macros::{Component, Resource};
