//! Download persistence
//!
//! The whole download set is saved on shutdown and loaded on startup.
//! Saving replaces every stored row inside one transaction.

use std::path::PathBuf;

use rusqlite::{params, Connection};

/// Stored progress of one byte range of a parallel download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRecord {
    pub start: u64,
    pub end: u64,
    /// Next offset to fetch; equals `end` once the range is done
    pub next: u64,
}

/// Stored state of one download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub hash: String,
    pub file_name: String,
    pub target_path: PathBuf,
    pub size: u64,
    pub downloaded: u64,
    /// `sequential` or `parallel`
    pub strategy: String,
    /// Status code at save time
    pub status: u8,
    /// One range for sequential downloads, one per split for parallel ones
    pub ranges: Vec<RangeRecord>,
}

fn parse_u64_from_i64(value: i64, column_index: usize) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(column_index, value))
}

fn parse_u8_from_i64(value: i64, column_index: usize) -> rusqlite::Result<u8> {
    u8::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(column_index, value))
}

fn to_i64(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Replace the stored download set with `records`
pub fn save_downloads(conn: &mut Connection, records: &[DownloadRecord]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM download_ranges", [])?;
    tx.execute("DELETE FROM downloads", [])?;

    for record in records {
        tx.execute(
            "INSERT INTO downloads (hash, file_name, target_path, size, downloaded, strategy, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.hash,
                record.file_name,
                record.target_path.to_string_lossy(),
                to_i64(record.size)?,
                to_i64(record.downloaded)?,
                record.strategy,
                record.status,
            ],
        )?;

        for (index, range) in record.ranges.iter().enumerate() {
            tx.execute(
                "INSERT INTO download_ranges (hash, range_index, start_offset, end_offset, next_offset)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.hash,
                    index as i64,
                    to_i64(range.start)?,
                    to_i64(range.end)?,
                    to_i64(range.next)?,
                ],
            )?;
        }
    }

    tx.commit()
}

/// Load every stored download, ranges in index order
pub fn load_downloads(conn: &Connection) -> rusqlite::Result<Vec<DownloadRecord>> {
    let mut stmt = conn.prepare(
        "SELECT hash, file_name, target_path, size, downloaded, strategy, status
         FROM downloads ORDER BY saved_at, hash",
    )?;
    let mut records = stmt
        .query_map([], |row| {
            let target: String = row.get(2)?;
            Ok(DownloadRecord {
                hash: row.get(0)?,
                file_name: row.get(1)?,
                target_path: PathBuf::from(target),
                size: parse_u64_from_i64(row.get(3)?, 3)?,
                downloaded: parse_u64_from_i64(row.get(4)?, 4)?,
                strategy: row.get(5)?,
                status: parse_u8_from_i64(row.get(6)?, 6)?,
                ranges: Vec::new(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut range_stmt = conn.prepare(
        "SELECT start_offset, end_offset, next_offset FROM download_ranges
         WHERE hash = ?1 ORDER BY range_index",
    )?;
    for record in &mut records {
        record.ranges = range_stmt
            .query_map([&record.hash], |row| {
                Ok(RangeRecord {
                    start: parse_u64_from_i64(row.get(0)?, 0)?,
                    end: parse_u64_from_i64(row.get(1)?, 1)?,
                    next: parse_u64_from_i64(row.get(2)?, 2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    }

    Ok(records)
}

/// Remove every stored download
pub fn clear_downloads(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM download_ranges", [])?;
    conn.execute("DELETE FROM downloads", [])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::start::start_memory_db;

    fn parallel_record() -> DownloadRecord {
        DownloadRecord {
            hash: "aa11".to_string(),
            file_name: "movie.mkv".to_string(),
            target_path: PathBuf::from("/shared/movie.mkv"),
            size: 103,
            downloaded: 40,
            strategy: "parallel".to_string(),
            status: 0,
            ranges: vec![
                RangeRecord { start: 0, end: 25, next: 25 },
                RangeRecord { start: 25, end: 50, next: 30 },
                RangeRecord { start: 50, end: 75, next: 55 },
                RangeRecord { start: 75, end: 103, next: 75 },
            ],
        }
    }

    #[test]
    fn test_save_and_load() {
        let mut conn = start_memory_db().unwrap();
        let sequential = DownloadRecord {
            hash: "bb22".to_string(),
            file_name: "song.mp3".to_string(),
            target_path: PathBuf::from("/shared/song.mp3"),
            size: 10,
            downloaded: 3,
            strategy: "sequential".to_string(),
            status: 1,
            ranges: Vec::new(),
        };

        save_downloads(&mut conn, &[parallel_record(), sequential.clone()]).unwrap();

        let mut loaded = load_downloads(&conn).unwrap();
        loaded.sort_by(|a, b| a.hash.cmp(&b.hash));
        assert_eq!(loaded, vec![parallel_record(), sequential]);
    }

    #[test]
    fn test_save_replaces_previous_set() {
        let mut conn = start_memory_db().unwrap();
        save_downloads(&mut conn, &[parallel_record()]).unwrap();
        save_downloads(&mut conn, &[]).unwrap();

        assert!(load_downloads(&conn).unwrap().is_empty());
        let ranges: i64 = conn
            .query_row("SELECT COUNT(*) FROM download_ranges", [], |row| row.get(0))
            .unwrap();
        assert_eq!(ranges, 0);
    }

    #[test]
    fn test_clear_downloads() {
        let mut conn = start_memory_db().unwrap();
        save_downloads(&mut conn, &[parallel_record()]).unwrap();
        assert_eq!(clear_downloads(&conn).unwrap(), 1);
        assert!(load_downloads(&conn).unwrap().is_empty());
    }
}
