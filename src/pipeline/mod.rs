//! Internal pipeline stages for page extraction.
//!
//! The pipeline is a straight line per item:
//!
//! ```text
//! scan ──▶ encode ──▶ worker (inference + recovery) ──▶ persist
//! ```
//!
//! * [`scan`]   — walk the input tree and enumerate candidate images
//! * [`encode`] — base64 data-URI encoding of an image file
//! * [`worker`] — one item end-to-end: prompt, call, recover, repair
//!
//! Stages are crate-private; the public entry point is
//! [`crate::process::process_images`], which wires them together with the
//! work index and the concurrency limit.

pub(crate) mod encode;
pub(crate) mod scan;
pub(crate) mod worker;
