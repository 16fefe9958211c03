//! Validates device configurations against per-component schemas and turns
//! them into a C++ firmware project.
//!
//! The pipeline runs in three phases: [`validate`] produces a canonical
//! configuration, [`codegen`] schedules one generator routine per component
//! entry into an ordered statement stream, and [`writer`] renders that stream
//! into project files. [`json_schema`] exports the same schemas for editors.
pub mod automation;
pub mod cli;
pub mod codegen;
pub mod components;
pub mod entity;
pub mod error;
pub mod ids;
pub mod ir;
pub mod jq_exec;
pub mod json_schema;
pub mod loader;
pub mod logging;
pub mod pins;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod settings;
pub mod target;
pub mod validate;
pub mod value;
pub mod writer;

pub use error::{Error, Result};
pub use loader::RunContext;
pub use pipeline::{Compiled, compile, compile_with};
