pub mod buffer;
pub mod console;
pub mod filter;
pub mod logs;
pub mod summary;
