//! Local log stream setup.
//!
//! Verbosity only shapes what is written locally.  Update lines use the
//! [`UPDATE_TARGET`] target so they survive quiet mode, and `RUST_LOG`
//! overrides everything computed here.

use log::LevelFilter;

use crate::config::Verbosity;

/// Log target for lines announcing a container update.
pub const UPDATE_TARGET: &str = "puller::update";

pub fn init(verbosity: Verbosity) {
    let mut builder = env_logger::Builder::new();
    match verbosity {
        Verbosity::Quiet => builder
            .filter_level(LevelFilter::Warn)
            .filter_module(UPDATE_TARGET, LevelFilter::Info),
        Verbosity::Normal => builder.filter_level(LevelFilter::Info),
        Verbosity::Verbose => builder.filter_level(LevelFilter::Debug),
    };
    builder.parse_env(env_logger::Env::default()).init();
}
