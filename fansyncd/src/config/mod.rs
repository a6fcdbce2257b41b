//! Configuration loading for the daemon

mod runtime_config;

pub(crate) use runtime_config::RuntimeConfig;
