pub mod ensure;
pub mod path;
pub mod render;
