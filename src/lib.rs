pub mod error;
pub mod merge;
pub mod normalize;
pub mod output;
pub mod schema;
pub mod snapshot;
pub mod validate;
