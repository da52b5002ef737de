pub mod config;
pub mod plot;
pub mod quarter;
pub mod report;
pub mod sources;
pub mod summary;
