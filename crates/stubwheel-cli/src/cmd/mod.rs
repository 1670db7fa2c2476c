//! Subcommand implementations

pub mod fetch;
pub mod inspect;
pub mod sdist;
pub mod tags;
