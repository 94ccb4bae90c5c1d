//! Core trait abstractions for external collaborators.

pub mod embedder;
pub mod sink;
pub mod source;

pub use embedder::ImageEmbedder;
pub use sink::RecordSink;
pub use source::{ContentSource, ElementHandle, Locator, TriggerMethod};
