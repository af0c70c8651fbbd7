//! Attendance events: one row per member per calendar date.
//!
//! Check-in creates the row (start time set, end time NULL); check-out
//! mutates it exactly once, setting the end time and activity note. The
//! UNIQUE(member_key, date) constraint makes concurrent check-in attempts
//! race safely: the loser observes a constraint violation and gets the
//! existing record back.

use crate::error::{Result, StoreError};
use crate::{now_stamp, SqliteStore};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

const TIME_FORMAT: &str = "%H:%M:%S";

/// One check-in/check-out record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: i64,
    pub member_key: String,
    pub date: NaiveDate,
    pub started_at: NaiveTime,
    pub ended_at: Option<NaiveTime>,
    pub activity: Option<String>,
    pub photo_path: Option<String>,
}

impl AttendanceEvent {
    /// Checked in but not yet out.
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Worked duration as an Indonesian phrase, e.g. "8 jam 0 menit".
    /// `None` while the event is still open.
    pub fn duration_text(&self) -> Option<String> {
        self.ended_at
            .map(|ended| format_duration(self.started_at, ended))
    }
}

/// Format the span between two times of day as "H jam M menit".
/// A negative span (clock skew) clamps to zero.
pub fn format_duration(start: NaiveTime, end: NaiveTime) -> String {
    let minutes = (end - start).num_minutes().max(0);
    format!("{} jam {} menit", minutes / 60, minutes % 60)
}

fn event_from_row(row: &Row) -> rusqlite::Result<AttendanceEvent> {
    let parse_time = |idx: usize, raw: String| {
        NaiveTime::parse_from_str(&raw, TIME_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    };
    let date_raw: String = row.get(2)?;
    let date = date_raw.parse::<NaiveDate>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let started_at = parse_time(3, row.get(3)?)?;
    let ended_at = match row.get::<_, Option<String>>(4)? {
        Some(raw) => Some(parse_time(4, raw)?),
        None => None,
    };

    Ok(AttendanceEvent {
        id: row.get(0)?,
        member_key: row.get(1)?,
        date,
        started_at,
        ended_at,
        activity: row.get(5)?,
        photo_path: row.get(6)?,
    })
}

const EVENT_COLUMNS: &str =
    "id, member_key, date, started_at, ended_at, activity, photo_path";

fn fetch_event(
    conn: &rusqlite::Connection,
    member_key: &str,
    date: NaiveDate,
) -> rusqlite::Result<Option<AttendanceEvent>> {
    conn.query_row(
        &format!("SELECT {EVENT_COLUMNS} FROM attendance WHERE member_key = ?1 AND date = ?2"),
        params![member_key, date.to_string()],
        event_from_row,
    )
    .optional()
}

/// Filter for attendance listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    /// Checked in, not yet out.
    Open,
    /// Checked out.
    Closed,
}

impl SqliteStore {
    /// Record a check-in for `member_key` on `date`.
    ///
    /// Atomic check-then-insert: the uniqueness constraint decides the winner
    /// under concurrency, and the loser receives the existing event inside
    /// [`StoreError::AlreadyCheckedIn`].
    pub async fn check_in(
        &self,
        member_key: &str,
        date: NaiveDate,
        time: NaiveTime,
        photo_path: Option<String>,
    ) -> Result<AttendanceEvent> {
        let member_key = member_key.to_string();
        self.conn
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT INTO attendance (member_key, date, started_at, photo_path, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        member_key,
                        date.to_string(),
                        time.format(TIME_FORMAT).to_string(),
                        photo_path,
                        now_stamp()
                    ],
                );

                match inserted {
                    Ok(_) => {
                        let event = fetch_event(conn, &member_key, date)?
                            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                        Ok(Ok(event))
                    }
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        match fetch_event(conn, &member_key, date)? {
                            Some(existing) => Ok(Err(StoreError::AlreadyCheckedIn(existing))),
                            // No row for the date: the violated constraint was
                            // the member foreign key.
                            None => Ok(Err(StoreError::MemberNotFound(member_key))),
                        }
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?
    }

    /// Close the open event for `member_key` on `date`, recording the end
    /// time and activity note. The row is immutable afterwards.
    pub async fn check_out(
        &self,
        member_key: &str,
        date: NaiveDate,
        time: NaiveTime,
        activity: &str,
    ) -> Result<AttendanceEvent> {
        let member_key = member_key.to_string();
        let activity = activity.to_string();
        self.conn
            .call(move |conn| {
                let Some(event) = fetch_event(conn, &member_key, date)? else {
                    return Ok(Err(StoreError::NotYetCheckedIn { member_key, date }));
                };
                if event.ended_at.is_some() {
                    return Ok(Err(StoreError::AlreadyCheckedOut(event)));
                }

                let changed = conn.execute(
                    "UPDATE attendance SET ended_at = ?1, activity = ?2
                     WHERE member_key = ?3 AND date = ?4 AND ended_at IS NULL",
                    params![
                        time.format(TIME_FORMAT).to_string(),
                        activity,
                        member_key,
                        date.to_string()
                    ],
                )?;

                let event = fetch_event(conn, &member_key, date)?
                    .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                if changed == 0 {
                    // Raced with another check-out between fetch and update.
                    return Ok(Err(StoreError::AlreadyCheckedOut(event)));
                }
                Ok(Ok(event))
            })
            .await?
    }

    /// List events for a date, optionally restricted to one member and/or an
    /// open/closed status.
    pub async fn list_attendance(
        &self,
        date: NaiveDate,
        member_key: Option<String>,
        status: Option<AttendanceStatus>,
    ) -> Result<Vec<AttendanceEvent>> {
        let events = self
            .conn
            .call(move |conn| {
                let mut sql =
                    format!("SELECT {EVENT_COLUMNS} FROM attendance WHERE date = ?1");
                if member_key.is_some() {
                    sql.push_str(" AND member_key = ?2");
                }
                match status {
                    Some(AttendanceStatus::Open) => sql.push_str(" AND ended_at IS NULL"),
                    Some(AttendanceStatus::Closed) => sql.push_str(" AND ended_at IS NOT NULL"),
                    None => {}
                }
                sql.push_str(" ORDER BY started_at, member_key");

                let mut stmt = conn.prepare(&sql)?;
                let date = date.to_string();
                let events = match &member_key {
                    Some(key) => stmt
                        .query_map(params![date, key], event_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?,
                    None => stmt
                        .query_map(params![date], event_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?,
                };
                Ok(events)
            })
            .await?;

        Ok(events)
    }
}
