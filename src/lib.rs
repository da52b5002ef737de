//! Web analytics by country: fetch per-country counts from the analytics APIs, aggregate
//! them by ISO 3166 alpha-3 code, write a CSV, render choropleth maps and mail the results.
//! `summary` totals each site per fiscal quarter against the quarter before.

pub mod aggregate;
pub mod analytics;
pub mod cli;
pub mod config;
pub mod country;
pub mod fiscal;
pub mod notify;
pub mod pipeline;
pub mod render;
pub mod summary;
