pub mod config;
pub mod exchange;
pub mod execution;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod parser;
pub mod planner;
pub mod sizing;
pub mod telegram;
#[cfg(test)]
pub mod test_helpers;
