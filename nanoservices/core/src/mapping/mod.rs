//! The mapping stage (projection) and mapping suggestion (automap).

pub mod automap;
pub mod projection;

pub use automap::{automap, similarity, ACCEPT_THRESHOLD};
pub use projection::apply_mappings;
