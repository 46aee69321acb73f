// Library exports for the Vigil process supervisor

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod process;
