pub mod chunk;
pub mod loader;
pub mod lod;
pub mod preload;
pub mod request;
pub mod residency;
pub mod source;
pub mod store;

pub use chunk::*;
pub use loader::*;
pub use lod::*;
pub use preload::*;
pub use request::*;
pub use residency::*;
pub use source::*;
pub use store::*;
