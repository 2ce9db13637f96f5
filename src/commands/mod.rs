pub mod analyze;
pub mod cache;
