pub mod commands;
pub mod composer;
pub mod raster;
pub mod surface;

pub use commands::*;
pub use composer::*;
pub use raster::*;
pub use surface::*;
