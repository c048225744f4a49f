//!
//! SharedVision: camera frame classification and reading
//!
//! Frames come out of a [`cameras::FrameSource`], get throttled, preprocessed and classified by
//! the model owned by [`subsystems::ml::ModelManager`]. Results can be read aloud through
//! [`speech::TtsManager`].
//!

#[macro_use]
extern crate log;
extern crate env_logger;
extern crate fast_image_resize;
#[cfg(feature = "web")]
extern crate actix_web;
#[cfg(feature = "web")]
extern crate utoipa as utopia;

#[cfg(feature = "web")]
pub mod api;
pub mod cameras;
pub mod config;
pub mod error;
pub mod logger;
pub mod speech;
pub mod subsystems;
pub mod utils;

pub use error::Error;
