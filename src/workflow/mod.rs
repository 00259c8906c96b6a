pub mod condition;
mod graph;
pub mod template;

pub use graph::Graph;
