pub mod monitor;
pub mod scheduler;

pub use monitor::*;
pub use scheduler::*;
