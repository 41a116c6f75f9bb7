//! Command handlers grouped by concern.

pub(crate) mod jobs;
pub(crate) mod transfers;
