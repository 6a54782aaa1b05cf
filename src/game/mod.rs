//! Game simulation modules

pub mod combat;
pub mod entity;
pub mod frame;
pub mod physics;
pub mod registry;
pub mod room;
pub mod world;

pub use registry::RoomRegistry;
