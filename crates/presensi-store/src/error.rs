use crate::attendance::AttendanceEvent;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity \"{0}\" is already enrolled")]
    DuplicateMember(String),
    #[error("identity \"{0}\" not found")]
    MemberNotFound(String),
    #[error("{} already checked in on {} at {}", .0.member_key, .0.date, .0.started_at)]
    AlreadyCheckedIn(AttendanceEvent),
    #[error("no check-in recorded for {member_key} on {date}")]
    NotYetCheckedIn {
        member_key: String,
        date: NaiveDate,
    },
    #[error("{} already checked out on {}", .0.member_key, .0.date)]
    AlreadyCheckedOut(AttendanceEvent),
    #[error("refusing to replace face vectors with an empty batch")]
    EmptyVectorBatch,
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
