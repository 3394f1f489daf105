pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod execution;
pub mod preflight;
pub mod report;
pub mod runtime;
pub mod sandbox;
pub mod security;
pub mod service;

pub use error::{IgniteError, Result};
