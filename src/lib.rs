//! Portal progress collection: scraping session, record decoding, date
//! classification and snapshot storage.

pub mod archive;
pub mod config;
pub mod dates;
pub mod decode;
pub mod error;
pub mod ipc;
pub mod model;
pub mod session;
pub mod store;

pub use error::{Error, Result, ValidationError};
