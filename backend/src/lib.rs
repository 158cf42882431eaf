pub mod config;
pub mod detector;
pub mod normalizer;
pub mod routes;
pub mod state;
