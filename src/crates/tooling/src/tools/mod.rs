//! Built-in tool implementations

pub mod filesystem;
