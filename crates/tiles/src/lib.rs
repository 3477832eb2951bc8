pub mod coverage;
pub mod tile;
pub mod url;
pub mod zoom;

pub use coverage::*;
pub use tile::*;
pub use url::*;
pub use zoom::*;
