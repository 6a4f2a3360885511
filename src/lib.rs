pub mod aggregate;
pub mod cli;
pub mod commands;
pub mod error;
pub mod features;
pub mod filter;
pub mod geojson;
pub mod geometry;
pub mod mercator;
pub mod output;
pub mod pipeline;
pub mod pmtiles;
pub mod progress;
pub mod source;
