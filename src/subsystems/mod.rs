//!
//! Frame processing subsystems
//!

mod manager;
pub mod ml;
pub mod ocr;

pub use manager::{ReaderMode, ReaderStatus, SubsysManager};
