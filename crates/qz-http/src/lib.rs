//! HTTP adapters for the quiz feed engagement engine
//!
//! Provides:
//! - [`HttpBackend`]: the views, reactions and answers services over `reqwest`
//! - [`TokenFile`]: a credential source backed by a persisted token file

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod token_file;

pub use backend::HttpBackend;
pub use config::HttpConfig;
pub use error::HttpError;
pub use token_file::TokenFile;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
