//! fluxstudio command-line front end.
//!
//! [`studio::Studio`] ties the registry, validator, generation client and
//! history together; [`cli`] maps subcommands onto it.

pub mod cli;
pub mod config;
pub mod studio;
