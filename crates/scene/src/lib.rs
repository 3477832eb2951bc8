pub mod list;
pub mod spatial;

pub use list::*;
pub use spatial::*;
