use std::{collections::HashMap, path::Path};

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::{
    error,
    fingerprint::{Address, Couple, Fingerprints},
    store::FingerprintStore,
};

// Stays well under SQLite's bound parameter limit.
const LOOKUP_CHUNK: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongData {
    // Only title for now
    pub title: String,
}

/// SQLite-backed song catalog and fingerprint store.
pub struct DbClient {
    conn: Connection,
}

impl DbClient {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let client = DbClient { conn };
        client.create_tables()?;
        Ok(client)
    }

    pub fn create_tables(&self) -> rusqlite::Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS songs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL
            )",
            [],
        )?;
        // Also applied to catalogs created before titles were unique.
        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS songs_title ON songs (title)",
            [],
        )?;

        // Exact repeats of a couple are dropped; anything else is appended.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS fingerprints (
                address INTEGER NOT NULL,
                anchorTime INTEGER NOT NULL,
                songID INTEGER NOT NULL,
                PRIMARY KEY (address, anchorTime, songID)
            )",
            [],
        )?;

        Ok(())
    }

    /// Fails if a song with the same title is already registered.
    pub fn register_song(&self, song_data: &SongData) -> Result<u32> {
        insert_song(&self.conn, song_data)
    }

    /// Registers a song and stores the fingerprints `encode` builds for its id,
    /// all in one transaction: on any error neither the song nor its
    /// fingerprints are kept.
    pub fn ingest_song<F>(&self, song_data: &SongData, encode: F) -> Result<u32>
    where
        F: FnOnce(u32) -> error::Result<Fingerprints>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let song_id = insert_song(&tx, song_data)?;
        let fingerprints = encode(song_id)?;
        insert_fingerprints(&tx, &fingerprints)?;
        tx.commit()?;
        Ok(song_id)
    }

    pub fn get_song_data(&self, song_id: u32) -> Result<SongData> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT title FROM songs WHERE id = ?")?;
        let row = stmt.query_row([song_id], |row| Ok(SongData { title: row.get(0)? }))?;

        Ok(row)
    }

    pub fn get_song_by_title(&self, title: &str) -> Result<Option<u32>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM songs WHERE title = ?")?;
        let song_id = stmt.query_row([title], |row| row.get(0)).optional()?;

        Ok(song_id)
    }

    pub fn total_songs(&self) -> Result<u64> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
        Ok(total as u64)
    }

    /// Removes every song and fingerprint.
    pub fn erase(&self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
             DELETE FROM fingerprints;
             DELETE FROM songs;
             DELETE FROM sqlite_sequence WHERE name = 'songs';
             COMMIT;",
        )?;
        Ok(())
    }
}

fn insert_song(conn: &Connection, song_data: &SongData) -> Result<u32> {
    let mut stmt = conn.prepare_cached("INSERT INTO songs (title) VALUES (?)")?;
    let result = stmt.execute([&song_data.title])?;

    if result == 0 {
        return Err(rusqlite::Error::StatementChangedRows(0).into());
    }

    // Ids start at 1, so they never collide with the query song id.
    let song_id = u32::try_from(conn.last_insert_rowid())?;
    Ok(song_id)
}

fn insert_fingerprints(conn: &Connection, fingerprints: &Fingerprints) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO fingerprints (address, anchorTime, songID) VALUES (?, ?, ?)",
    )?;
    for (address, couples) in fingerprints {
        for couple in couples {
            stmt.execute(params![address.value(), couple.anchor_time_ms, couple.song_id])?;
        }
    }
    Ok(())
}

impl FingerprintStore for DbClient {
    fn store_fingerprints(&self, fingerprints: &Fingerprints) -> error::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        insert_fingerprints(&tx, fingerprints)?;
        tx.commit()?;
        Ok(())
    }

    fn get_couples(&self, addresses: &[Address]) -> error::Result<HashMap<Address, Vec<Couple>>> {
        let mut couples: HashMap<Address, Vec<Couple>> = HashMap::new();

        for chunk in addresses.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let mut stmt = self.conn.prepare(&format!(
                "SELECT address, anchorTime, songID FROM fingerprints WHERE address IN ({})",
                placeholders
            ))?;

            let rows = stmt.query_map(params_from_iter(chunk.iter().map(Address::value)), |row| {
                Ok((
                    Address::from(row.get::<_, u32>(0)?),
                    Couple {
                        anchor_time_ms: row.get(1)?,
                        song_id: row.get(2)?,
                    },
                ))
            })?;

            for row in rows {
                let (address, couple) = row?;
                couples.entry(address).or_default().push(couple);
            }
        }

        Ok(couples)
    }
}
