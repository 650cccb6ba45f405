pub mod args;
pub mod op;
pub mod ops;

pub use ops::{Cache, Delete, Download, Init, Keys, Upload, Version};
