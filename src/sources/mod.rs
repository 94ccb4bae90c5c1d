//! Content source implementations.

pub mod static_html;

pub use static_html::StaticSource;
