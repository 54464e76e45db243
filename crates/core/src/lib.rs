//! Core domain logic for fluxstudio.
//!
//! Everything in this crate is pure and synchronous: the model registry,
//! parameter validation, request/result types, and cost estimation. Network
//! access lives in `fluxstudio-fal`, persistence in `fluxstudio-storage`.

pub mod cost;
pub mod error;
pub mod generation;
pub mod models;
pub mod request;
pub mod types;
pub mod validation;
