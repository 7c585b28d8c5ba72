pub mod accumulator;
pub mod agent;
pub mod config;
pub mod errors;
pub mod models;
pub mod providers;
pub mod stream;
pub mod systems;
pub mod token_counter;
pub mod transport;
