pub mod traits;

pub use traits::SourceReader;
