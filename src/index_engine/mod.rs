pub mod engine;

pub use engine::{DefaultIndexEngine, IndexEngine};
