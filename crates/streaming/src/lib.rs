pub mod cache;
pub mod queue;

pub use cache::*;
pub use queue::*;
