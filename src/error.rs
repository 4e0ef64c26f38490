//! Centralized error type for the ear umbrella crate.
//!
//! Wraps subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] ear_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
