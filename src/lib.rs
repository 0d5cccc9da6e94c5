#![deny(unused_qualifications)]
#![allow(clippy::new_without_default)]

#[macro_use]
extern crate tracing;

pub mod app;
pub mod config;
pub mod shutdown;
pub mod signal;
pub mod sinks;
pub mod sources;
pub mod stats;
pub mod trace;

pub fn get_version() -> String {
    let pkg_version = env!("CARGO_PKG_VERSION");

    #[cfg(debug_assertions)]
    let build = "debug";
    #[cfg(not(debug_assertions))]
    let build = "release";

    format!("{pkg_version} ({build})")
}
