//! `jvmbridge-runtime` is a library for embedding a Java virtual machine in a host process:
//! loading it, booting a context against it, attaching threads, and tearing it down again.
//!
//! This crate holds the implementation; most users want the `jvmbridge-runtime` facade.

#![deny(bare_trait_objects)]

#[macro_use]
pub mod error;

#[macro_use]
#[cfg(test)]
pub mod test_helpers;

#[macro_use]
pub mod c_api;

pub mod config;
pub mod context;
pub mod frame;
pub mod interrupt;
pub mod platform;
pub mod reference;
pub mod resource;
pub mod runtime;
pub mod services;
pub mod thread;
