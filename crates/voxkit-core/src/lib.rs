//! Core library for voxkit
//!
//! Shared data model for speech model discovery and download, plus the host
//! capabilities (file system, HTTP transport, clock) the registry is built on.

pub mod clock;
pub mod config;
pub mod error;
pub mod storage;
pub mod transport;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RegistryConfig;
pub use error::TransportError;
pub use storage::{FileSystem, FileWriter, LocalFileSystem};
pub use transport::{BodyReader, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use types::*;
