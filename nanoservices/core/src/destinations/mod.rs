pub mod traits;

pub use traits::DestinationWriter;
