//! Smalt - a small template language with inheritance, filters, and
//! extensible tags
//!
//! This library provides a lexer, parser, and renderer for a compact
//! template language: `{{ expr }}` interpolation with filter pipes,
//! `{% if %}` / `{% for %}` / `{% set %}` / `{% filter %}` control tags,
//! and multi-level template inheritance via `{% extends %}`, `{% block %}`,
//! and `{% include %}`.
//!
//! # Example
//!
//! ```rust
//! use smalt::{render_str, Context};
//!
//! let mut context = Context::new();
//! context.insert("name", "world");
//!
//! let out = render_str("Hello {{ name | upper }}!", &context).unwrap();
//! assert_eq!(out, "Hello WORLD!");
//! ```
//!
//! For named templates, inheritance, caching, and custom tags or filters,
//! build an [`Environment`]:
//!
//! ```rust
//! use std::sync::Arc;
//! use smalt::{Context, Environment, MemoryLoader};
//!
//! let loader = Arc::new(MemoryLoader::new());
//! loader.insert("base.html", "<title>{% block title %}Home{% endblock %}</title>");
//! loader.insert("page.html", "{% extends 'base.html' %}{% block title %}About{% endblock %}");
//!
//! let env = Environment::new().with_loader(loader);
//! let out = env.render_template("page.html", &Context::new()).unwrap();
//! assert_eq!(out, "<title>About</title>");
//! ```

pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod expr;
pub mod filters;
mod inherit;
pub mod lexer;
pub mod loader;
pub mod nodes;
pub mod parser;
pub mod value;

pub use config::{ConfigError, EngineConfig};
pub use context::Context;
pub use env::{Environment, Template};
pub use error::{SyntaxError, TemplateError};
pub use expr::{parse_condition, parse_expr, Condition, Expr};
pub use filters::FilterFn;
pub use loader::{FileLoader, Loader, MemoryLoader};
pub use nodes::{CustomNode, Node, NodeList};
pub use parser::{split_tag, Parser, TagParser};
pub use value::{Callable, Value};

/// Render a literal template source with a fresh default environment.
///
/// This is the quickest entry point; it compiles the source, renders it,
/// and throws the compile away. Use [`Environment`] when templates repeat.
pub fn render_str(source: &str, context: &Context) -> Result<String, TemplateError> {
    Environment::new().render_str(source, context)
}
