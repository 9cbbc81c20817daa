//! DevTool - command-line front end for the traffic-inspection proxy.
//!
//! This crate is the composition root: it owns the single
//! [`devtool_proxy::ProxySupervisor`], loads the configuration, and wires the
//! control plane and live stream into terminal output.
//!
//! - [`config`] - persistent settings at `<config dir>/config.json`
//! - [`cli`] - `clap` argument definitions
//! - [`commands`] - subcommand implementations
//! - [`render`] - plain-text output

pub mod cli;
pub mod commands;
pub mod config;
pub mod render;

pub use cli::{Args, Command};
pub use config::{AppConfig, ConfigError};
