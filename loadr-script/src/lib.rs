//! Declarative YAML load-test scripts.
//!
//! A script names its scenarios, thresholds and custom metrics, and describes each exec as one
//! HTTP request followed by checks. [`Script::parse`] turns it into a [`loadr_core::RunPlan`].

mod checks;
mod error;
mod exec;
mod script;
mod vars;
mod yaml;

pub use checks::{Check, CheckRule};
pub use error::{Error, Result};
pub use exec::HttpExec;
pub use script::Script;
pub use vars::{BASE_URL_VAR, LoadOptions, Vars};
pub use yaml::JsonKind;
