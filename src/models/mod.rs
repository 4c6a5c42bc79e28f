pub mod config;
pub mod dimension;
pub mod record;
pub mod summary;
pub mod trade;
