pub mod sim;
pub mod traits;

pub use sim::*;
pub use traits::*;
