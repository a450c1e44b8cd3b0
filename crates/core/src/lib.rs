//! Domain types for the image-to-video job adapter.
//!
//! Holds the job contract ([`job`]), the workflow graph model
//! ([`workflow`]) and the routing table that maps request fields onto
//! graph inputs ([`routing`]). Nothing in this crate performs I/O.

pub mod error;
pub mod job;
pub mod routing;
pub mod workflow;
