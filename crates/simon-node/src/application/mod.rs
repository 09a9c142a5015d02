//! Application layer use cases.
//!
//! - **`run_exchange`** – Builds the nodes described by the configuration,
//!   attaches them to one simulated bus and delivers the scripted messages in
//!   order, collecting what every receiver got and each node's statistics.

pub mod run_exchange;
