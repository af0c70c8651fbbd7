//! Face-recognition attendance service.
//!
//! Wires the vision pipeline (`presensi-core`) and the SQLite store
//! (`presensi-store`) into enrollment, recognition and check-in/check-out
//! operations.

pub mod config;
pub mod engine;
pub mod error;
pub mod service;

pub use config::Config;
pub use engine::{spawn_engine, EngineHandle, Vision, VisionError};
pub use error::{Result, ServiceError};
pub use service::{
    decode_image, CheckInReceipt, CheckOutReceipt, EnrollReport, EnrollRequest, Recognition,
    Service, ServiceOptions,
};
