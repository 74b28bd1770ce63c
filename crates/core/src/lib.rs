//! Batch subtitle downloading for folders of video files.
//! The modules are layered leaves first: scanning, selection, the remote
//! service, persistence and finally the batch runner tying them together.

pub mod batch;
pub mod persist;
pub mod scan;
pub mod select;
pub mod service;
