pub mod budget;
pub mod frame;
pub mod job;
pub mod metrics;
pub mod performance;
pub mod scheduler;
pub mod throttle;
pub mod work_queue;

pub use budget::*;
pub use frame::*;
pub use job::*;
pub use metrics::*;
pub use performance::*;
pub use scheduler::*;
pub use throttle::*;
pub use work_queue::*;
