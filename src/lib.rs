pub mod annotations;
pub mod cli;
pub mod config;
pub mod dag;
pub mod push;
pub mod remote;

pub use cli::{Cli, run};
