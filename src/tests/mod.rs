//! Crate-internal test utilities and cross-module scenarios.

pub(crate) mod helpers;
