//! Built-in actions served by the stock binary.

pub mod builtin;

pub use builtin::{builtin_table, register_builtin};
