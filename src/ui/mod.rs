//! Output renderers built on top of a finished [`crate::exporter`] payload
//! or the raw call-path tree: a flame graph for sample-mode data, and a
//! flat percent table for profile-mode data.

pub mod flamegraph;
pub mod summary;
