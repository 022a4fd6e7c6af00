//! Mutating admission webhook that injects sidecars into pods.
//!
//! A pod asks for a template through the `<namespace>/request` annotation. [`decision`]
//! picks the template, [`patch`] turns it into a JSON Patch and [`webhook`] wraps both
//! into admission responses.

pub mod annotations;
pub mod config;
pub mod decision;
pub mod error;
pub mod patch;
pub mod webhook;
