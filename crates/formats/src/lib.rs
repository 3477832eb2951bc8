pub mod annotation;
pub mod image_info;

pub use annotation::*;
pub use image_info::*;
