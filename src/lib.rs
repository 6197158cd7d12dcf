pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod graph;
pub mod model;
pub mod provider;
pub mod resolver;

mod api;

pub use api::{FanIn, FanInBuilder};
