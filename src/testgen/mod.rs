pub mod merge;
pub mod parse;
pub mod store;
pub mod validate;
