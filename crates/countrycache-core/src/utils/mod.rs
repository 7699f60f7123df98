//! Display formatting helpers.

pub mod format;

pub use format::{format_optional, format_population};
