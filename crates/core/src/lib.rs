pub mod annotation;
pub mod audit;
pub mod bulk;
pub mod diff;
pub mod error;
pub mod retention;
pub mod transaction;
pub mod types;
pub mod versioning;
