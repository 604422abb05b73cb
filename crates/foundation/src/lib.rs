pub mod bounds;
pub mod color;
pub mod image;
pub mod math;
pub mod time;
pub mod viewport;

// Foundation crate: small, well-tested primitives only.
pub use bounds::*;
pub use color::*;
pub use image::*;
pub use math::*;
pub use time::*;
pub use viewport::*;
