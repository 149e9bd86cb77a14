pub mod config;
pub mod coords;
pub mod error;
pub mod grid;
pub mod layers;
pub mod pipeline;
pub mod quantile;
pub mod query;
pub mod runner;
pub mod store;
pub mod temporal;
pub mod writer;
