//! Data shapes exchanged over the API.
//!
//! Nothing here outlives a single request: descriptors are rebuilt on every
//! listing and envelopes are serialized straight into the response.

pub mod envelope;
pub mod file;
