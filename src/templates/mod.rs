//! Configuration file templates.
//!
//! This module provides:
//! - The embedded catalog mapping template ids to host destinations
//! - The projection of a configuration into a flat rendering context
//! - A small template language with a fixed function library
//! - A renderer performing atomic, permission-explicit writes

mod catalog;
mod context;
mod eval;
mod functions;
mod lexer;
mod parser;
mod renderer;
mod value;

pub use catalog::{CATALOG, Gate, TemplateEntry, entries_for, list, lookup, required_keys};
pub use context::{ContextKey, RenderContext};
pub use functions::Function;
pub use parser::Template;
pub use renderer::{FileWrite, Renderer};
pub use value::Value;
