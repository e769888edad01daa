#![forbid(unsafe_code)]

//! Library crate behind the tubeset collection binaries.
//!
//! The modules mirror the pipeline stages: [`youtube`] talks to the platform
//! API, [`sampler`] draws the randomized daily sample, [`dataset`] persists
//! records and thumbnails into the working set, [`rotation`] seals full
//! working sets into numbered batches, and [`tracking`] mirrors each run to
//! the experiment-tracking service.

pub mod config;
pub mod dataset;
pub mod rotation;
pub mod sampler;
pub mod security;
pub mod tracking;
pub mod youtube;
