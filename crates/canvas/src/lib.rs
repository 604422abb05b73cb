//! Client core for a shared pixel canvas: camera, chunk streaming and
//! double-buffered composition behind one `tick`-driven controller.

pub mod config;
pub mod events;
pub mod map;
pub mod surface;

#[cfg(test)]
mod scenarios;

pub use config::*;
pub use events::*;
pub use map::*;
pub use surface::*;
