pub mod builder;
mod convert;
mod merge;

pub use builder::{IndexBuilder, MAX_DOC_SIZE};
pub use convert::convert;
pub use merge::merge;
