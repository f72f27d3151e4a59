#![deny(unused_variables)]
pub mod config;
pub mod data;
pub mod groups;
pub mod impute;
pub mod index;
pub mod normalize;
pub mod outliers;
pub mod pipeline;
pub mod plot;
pub mod report;
pub mod schema;
pub mod test_fixtures;
pub mod types;
pub mod weights;

// Model fitting and diagnostics, independent of the survey schema.
#[path = "../stats/mod.rs"]
pub mod stats;
