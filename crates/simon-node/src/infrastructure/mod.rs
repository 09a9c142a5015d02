//! Infrastructure layer: configuration files and supervision.
//!
//! **Dependency rule**: this layer may depend on `simon_core`, but MUST NOT
//! import the `application` layer.

pub mod storage;
pub mod watchdog;
