//! Publish and receive pipelines.
//!
//! Both pipelines follow the same template (see [`lifecycle`]): engine
//! resources are negotiated on `initialize`, moved to one worker thread on
//! `start`, and handed back, flushed and closed on `stop`.

pub mod handoff;
pub mod lifecycle;
pub mod publisher;
pub mod rate;
pub mod receiver;
pub mod sink;
pub mod types;
