//! The transformation language: parser, function catalog, evaluator.

mod dates;
pub mod expression;
pub mod functions;
pub mod parser;
pub mod traits;

pub use expression::{compile_all, Expression};
pub use traits::{apply_all, Transform};
