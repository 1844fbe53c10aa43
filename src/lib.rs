pub mod annotations;
pub mod artifacts;
pub mod backbone;
pub mod config;
pub mod error;
pub mod preprocessing;
pub mod runner;
