use crate::engine::VisionError;
use presensi_store::{AttendanceEvent, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("image bytes could not be decoded")]
    DecodeFailure,
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("face not recognized (best similarity {best_similarity:.3})")]
    FaceNotRecognized { best_similarity: f32 },
    #[error("identity \"{0}\" is already enrolled")]
    DuplicateIdentity(String),
    #[error("identity \"{0}\" not found")]
    IdentityNotFound(String),
    #[error("{name} already checked in at {}", event.started_at)]
    AlreadyCheckedIn {
        name: String,
        event: AttendanceEvent,
    },
    #[error("{name} has not checked in today")]
    NotYetCheckedIn { name: String },
    #[error("{name} already checked out")]
    AlreadyCheckedOut {
        name: String,
        event: AttendanceEvent,
    },
    #[error("{0} must not be empty")]
    MissingField(&'static str),
    #[error("too many images: {got} (limit {limit})")]
    TooManyImages { got: usize, limit: usize },
    #[error("failed to store photo: {0}")]
    PhotoStore(String),
    #[error("vision engine: {0}")]
    Vision(VisionError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<VisionError> for ServiceError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::NoFace => Self::NoFaceDetected,
            other => Self::Vision(other),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateMember(key) => Self::DuplicateIdentity(key),
            StoreError::MemberNotFound(key) => Self::IdentityNotFound(key),
            other => Self::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
