//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML exchange description, fills in
//! defaults for anything left out and writes the sample file for `--init`.

pub mod config;
