use std::fmt::Debug;

use anyhow::Result;
use common::req::{RecordPayload, TablePayload};
use serde_json::Value;

use crate::db::{Db, Reading, Seats};
use crate::utils::text_to_scalar;

/// A persisted record that has to reach the remote API.
///
/// Ties a queue entry to its remote endpoint, its outbound body and the
/// store operations the delivery worker needs.
pub trait Outbound: Debug + Clone + Send + Sync + 'static {
    /// Used in log lines.
    const KIND: &'static str;
    /// Path below the remote base url.
    const ENDPOINT: &'static str;

    type Payload: serde::Serialize + Send + Sync;

    fn id(&self) -> i64;
    fn payload(&self) -> Self::Payload;

    fn mark_synced(db: &mut Db, id: i64) -> Result<()>;
    fn unsynced(db: &mut Db) -> Result<Vec<Self>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingEntry {
    pub id: i64,
    pub value1: Value,
    pub value2: Value,
}

impl From<Reading> for ReadingEntry {
    fn from(row: Reading) -> Self {
        Self {
            id: row.id,
            value1: text_to_scalar(&row.value1),
            value2: text_to_scalar(&row.value2),
        }
    }
}

impl Outbound for ReadingEntry {
    const KIND: &'static str = "readings";
    const ENDPOINT: &'static str = "record";

    type Payload = RecordPayload;

    fn id(&self) -> i64 {
        self.id
    }

    fn payload(&self) -> RecordPayload {
        RecordPayload::new(self.value1.clone(), self.value2.clone())
    }

    fn mark_synced(db: &mut Db, id: i64) -> Result<()> {
        db.mark_reading_synced(id)
    }

    fn unsynced(db: &mut Db) -> Result<Vec<Self>> {
        Ok(db
            .unsynced_readings()?
            .into_iter()
            .map(ReadingEntry::from)
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatEntry {
    pub id: i64,
    pub seat1: i32,
    pub seat2: i32,
    pub seat3: i32,
    pub seat4: i32,
}

impl From<Seats> for SeatEntry {
    fn from(row: Seats) -> Self {
        Self {
            id: row.id,
            seat1: row.seat1,
            seat2: row.seat2,
            seat3: row.seat3,
            seat4: row.seat4,
        }
    }
}

impl Outbound for SeatEntry {
    const KIND: &'static str = "seat-assignments";
    const ENDPOINT: &'static str = "table";

    type Payload = TablePayload;

    fn id(&self) -> i64 {
        self.id
    }

    fn payload(&self) -> TablePayload {
        TablePayload {
            seat1: self.seat1,
            seat2: self.seat2,
            seat3: self.seat3,
            seat4: self.seat4,
        }
    }

    fn mark_synced(db: &mut Db, id: i64) -> Result<()> {
        db.mark_seats_synced(id)
    }

    fn unsynced(db: &mut Db) -> Result<Vec<Self>> {
        Ok(db
            .unsynced_seats()?
            .into_iter()
            .map(SeatEntry::from)
            .collect())
    }
}
