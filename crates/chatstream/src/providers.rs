pub mod anthropic;
pub mod base;
pub mod configs;
pub mod factory;
pub mod openai;
pub mod utils;
