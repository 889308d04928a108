use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::HtError;

/// A cached bunch list, keyed by acquisition file name.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub name: String,
    pub bunches: Vec<i64>,
}

/// Persistent name-to-bunch-list store backed by SQLite.
///
/// Bunch lists are stored as opaque bincode blobs. A read-only cache never
/// touches the schema; opening writeable creates the table and sets a busy
/// timeout so concurrent GUI instances do not trip over each other.
pub struct BunchCache {
    conn: Connection,
    writeable: bool,
    pub path: PathBuf,
}

impl BunchCache {
    pub fn open(path: &Path, writeable: bool) -> Result<Self, HtError> {
        let conn = Connection::open(path)?;
        let cache = BunchCache {
            conn,
            writeable,
            path: path.to_path_buf(),
        };
        cache.init()?;
        Ok(cache)
    }

    /// An in-memory cache, for tests.
    pub fn open_in_memory(writeable: bool) -> Result<Self, HtError> {
        let conn = Connection::open_in_memory()?;
        let cache = BunchCache {
            conn,
            writeable,
            path: PathBuf::new(),
        };
        cache.init()?;
        Ok(cache)
    }

    fn init(&self) -> Result<(), HtError> {
        if self.writeable {
            self.conn.busy_timeout(Duration::from_secs(10))?;
            self.conn.execute(
                "CREATE TABLE IF NOT EXISTS cache (name TEXT PRIMARY KEY, bunches BLOB)",
                [],
            )?;
        }
        Ok(())
    }

    pub fn is_writeable(&self) -> bool {
        self.writeable
    }

    pub fn insert(&self, name: &str, bunches: &[i64]) -> Result<(), HtError> {
        if self.writeable {
            let blob = bincode::encode_to_vec(bunches, bincode::config::standard())?;
            self.conn
                .execute("INSERT INTO cache VALUES (?1, ?2)", (name, blob))?;
        }
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<(), HtError> {
        if self.writeable {
            self.conn
                .execute("DELETE FROM cache WHERE name == ?1", (name,))?;
        }
        Ok(())
    }

    pub fn names(&self) -> Result<Vec<String>, HtError> {
        let mut stmt = self.conn.prepare("SELECT name FROM cache")?;
        let names: Result<Vec<String>, _> = stmt.query_map([], |row| row.get(0))?.collect();
        Ok(names?)
    }

    pub fn entry(&self, name: &str) -> Result<Option<CacheEntry>, HtError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, bunches FROM cache WHERE name == ?1 LIMIT 1")?;
        let mut rows = stmt.query((name,))?;
        match rows.next()? {
            Some(row) => {
                let name: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let (bunches, _) =
                    bincode::decode_from_slice(&blob, bincode::config::standard())?;
                Ok(Some(CacheEntry { name, bunches }))
            }
            None => Ok(None),
        }
    }

    pub fn contains(&self, name: &str) -> Result<bool, HtError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM cache WHERE name == ?1 LIMIT 1",
            (name,),
            |row| row.get(0),
        )?;
        Ok(count != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let cache = BunchCache::open_in_memory(true).unwrap();
        cache.insert("SPS.BQHT_20250101_120000", &[0, 3, 7]).unwrap();

        assert!(cache.contains("SPS.BQHT_20250101_120000").unwrap());
        assert!(!cache.contains("SPS.BQHT_20250101_130000").unwrap());

        let entry = cache.entry("SPS.BQHT_20250101_120000").unwrap().unwrap();
        assert_eq!(entry.bunches, vec![0, 3, 7]);
        assert!(cache.entry("missing").unwrap().is_none());
    }

    #[test]
    fn test_names_listing() {
        let cache = BunchCache::open_in_memory(true).unwrap();
        cache.insert("a", &[1]).unwrap();
        cache.insert("b", &[2]).unwrap();
        let mut names = cache.names().unwrap();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_delete() {
        let cache = BunchCache::open_in_memory(true).unwrap();
        cache.insert("a", &[1, 2]).unwrap();
        cache.delete("a").unwrap();
        assert!(!cache.contains("a").unwrap());
    }

    #[test]
    fn test_negative_bunch_numbers_round_trip() {
        // reverse-scan slippage correction can produce negative slots
        let cache = BunchCache::open_in_memory(true).unwrap();
        cache.insert("r", &[-2, 0, 5]).unwrap();
        let entry = cache.entry("r").unwrap().unwrap();
        assert_eq!(entry.bunches, vec![-2, 0, 5]);
    }

    #[test]
    fn test_read_only_cache_ignores_writes() {
        let cache = BunchCache::open_in_memory(false).unwrap();
        // silently ignored, matching the writeable flag contract
        cache.insert("a", &[1]).unwrap();
        // the table was never created, lookups fail at the SQL layer
        assert!(cache.names().is_err());
    }
}
