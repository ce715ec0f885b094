use std::sync::{Arc, Mutex, MutexGuard};

use crate::schema::*;
use anyhow::{anyhow, Result};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

const CREATE_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        value1 TEXT NOT NULL,
        value2 TEXT NOT NULL,
        synced BOOLEAN NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS tables (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        seat1 INTEGER NOT NULL,
        seat2 INTEGER NOT NULL DEFAULT 0,
        seat3 INTEGER NOT NULL DEFAULT 0,
        seat4 INTEGER NOT NULL DEFAULT 0,
        synced BOOLEAN NOT NULL DEFAULT 0
    );
"#;

diesel::define_sql_function! {
    fn last_insert_rowid() -> diesel::sql_types::BigInt;
}

/// Store handle shared by the ingress handlers and both delivery workers.
pub type SharedDb = Arc<Mutex<Db>>;

pub fn lock(db: &SharedDb) -> Result<MutexGuard<'_, Db>> {
    db.lock().map_err(|_| anyhow!("local store lock poisoned"))
}

#[derive(Debug, Insertable)]
#[diesel(table_name=data)]
pub struct NewReading {
    pub value1: String,
    pub value2: String,
}

#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct Reading {
    pub id: i64,
    pub value1: String,
    pub value2: String,
    pub synced: bool,
}

#[derive(Debug, Default, Clone, Copy, Insertable)]
#[diesel(table_name=tables)]
pub struct NewSeats {
    pub seat1: i32,
    pub seat2: i32,
    pub seat3: i32,
    pub seat4: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Queryable)]
pub struct Seats {
    pub id: i64,
    pub seat1: i32,
    pub seat2: i32,
    pub seat3: i32,
    pub seat4: i32,
    pub synced: bool,
}

pub struct Db {
    conn: SqliteConnection,
}

impl Db {
    pub fn connect(database_url: &str) -> Result<Self> {
        let conn = SqliteConnection::establish(database_url)?;
        let mut db = Self { conn };
        db.create_tables()?;

        Ok(db)
    }

    pub fn create_tables(&mut self) -> Result<()> {
        self.conn.batch_execute(CREATE_TABLES)?;
        Ok(())
    }

    /// Inserts a reading and returns the id the store assigned to it.
    pub fn insert_reading(&mut self, reading: &NewReading) -> Result<i64> {
        let id = self.conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(data::table)
                .values(reading)
                .execute(conn)?;
            diesel::select(last_insert_rowid()).get_result::<i64>(conn)
        })?;

        Ok(id)
    }

    pub fn insert_seats(&mut self, seats: &NewSeats) -> Result<i64> {
        let id = self.conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(tables::table)
                .values(seats)
                .execute(conn)?;
            diesel::select(last_insert_rowid()).get_result::<i64>(conn)
        })?;

        Ok(id)
    }

    pub fn mark_reading_synced(&mut self, id: i64) -> Result<()> {
        diesel::update(data::table.find(id))
            .set(data::synced.eq(true))
            .execute(&mut self.conn)?;

        Ok(())
    }

    pub fn mark_seats_synced(&mut self, id: i64) -> Result<()> {
        diesel::update(tables::table.find(id))
            .set(tables::synced.eq(true))
            .execute(&mut self.conn)?;

        Ok(())
    }

    /// Readings not yet accepted by the remote API, oldest first.
    pub fn unsynced_readings(&mut self) -> Result<Vec<Reading>> {
        let res = data::table
            .filter(data::synced.eq(false))
            .order(data::id.asc())
            .load::<Reading>(&mut self.conn)?;

        Ok(res)
    }

    pub fn unsynced_seats(&mut self) -> Result<Vec<Seats>> {
        let res = tables::table
            .filter(tables::synced.eq(false))
            .order(tables::id.asc())
            .load::<Seats>(&mut self.conn)?;

        Ok(res)
    }

    pub fn unsynced_reading_count(&mut self) -> Result<i64> {
        let count = data::table
            .filter(data::synced.eq(false))
            .count()
            .get_result(&mut self.conn)?;

        Ok(count)
    }

    pub fn unsynced_seats_count(&mut self) -> Result<i64> {
        let count = tables::table
            .filter(tables::synced.eq(false))
            .count()
            .get_result(&mut self.conn)?;

        Ok(count)
    }
}

#[cfg(test)]
impl Db {
    pub fn in_memory() -> Result<Self> {
        Self::connect(":memory:")
    }

    pub fn reading(&mut self, id: i64) -> Result<Option<Reading>> {
        Ok(data::table
            .find(id)
            .first::<Reading>(&mut self.conn)
            .optional()?)
    }

    pub fn seats(&mut self, id: i64) -> Result<Option<Seats>> {
        Ok(tables::table
            .find(id)
            .first::<Seats>(&mut self.conn)
            .optional()?)
    }

    pub fn reading_count(&mut self) -> Result<i64> {
        Ok(data::table.count().get_result(&mut self.conn)?)
    }

    pub fn seats_count(&mut self) -> Result<i64> {
        Ok(tables::table.count().get_result(&mut self.conn)?)
    }
}
