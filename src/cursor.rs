use std::ops::Bound;

use redb::{ReadOnlyTable, ReadTransaction, ReadableTable};

use crate::codec::KeyValue;
use crate::engine::DATA_TABLE;
use crate::error::{Error, Result};

/// Cursor positioning modes. Each variant carries the inputs the mode needs.
#[derive(Debug, Clone, Copy)]
pub enum SeekOp<'a> {
    /// Position at exactly this key
    Set(&'a [u8]),
    /// Position at the first key at or after this one
    SetRange(&'a [u8]),
    /// Position at this key only if it holds exactly this value
    GetBoth { key: &'a [u8], value: &'a [u8] },
    /// Position at this key only if its value sorts at or after this one
    GetBothRange { key: &'a [u8], value: &'a [u8] },
}

/// Iterates one database file in key order over a stable snapshot.
///
/// The snapshot is taken when the cursor is created; writes committed after
/// that point are not visible through it. A failed seek returns `Ok(None)`
/// and leaves the position unchanged.
pub struct Cursor {
    txn: ReadTransaction,
    /// Key of the last record returned; the next step resumes past it
    pos: Option<Vec<u8>>,
}

impl Cursor {
    pub(crate) fn new(txn: ReadTransaction) -> Self {
        Cursor { txn, pos: None }
    }

    fn table(&self) -> Result<Option<ReadOnlyTable<&'static [u8], &'static [u8]>>> {
        match self.txn.open_table(DATA_TABLE) {
            Ok(table) => Ok(Some(table)),
            // A file that has never been written to has no data table yet
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
            Err(e) => Err(Error::Engine(e.to_string())),
        }
    }

    /// Advance to the next record, starting from the first on a fresh cursor.
    /// Returns `Ok(None)` once the end of the file is reached.
    pub fn next(&mut self) -> Result<Option<KeyValue>> {
        let Some(table) = self.table()? else {
            return Ok(None);
        };
        let item = match &self.pos {
            Some(last) => table
                .range::<&[u8]>((Bound::Excluded(last.as_slice()), Bound::Unbounded))
                .map_err(|e| Error::Engine(e.to_string()))?
                .next(),
            None => table
                .range::<&[u8]>(..)
                .map_err(|e| Error::Engine(e.to_string()))?
                .next(),
        };
        match item {
            Some(Ok((key, value))) => {
                let key = key.value().to_vec();
                let value = value.value().to_vec();
                self.pos = Some(key.clone());
                Ok(Some((key, value)))
            }
            Some(Err(e)) => Err(Error::Engine(e.to_string())),
            None => Ok(None),
        }
    }

    /// Position the cursor and return the record it lands on. After a
    /// successful seek, `next` continues with the record that follows.
    pub fn seek(&mut self, op: SeekOp<'_>) -> Result<Option<KeyValue>> {
        let Some(table) = self.table()? else {
            return Ok(None);
        };
        match op {
            SeekOp::Set(key) => match lookup(&table, key)? {
                Some(value) => {
                    self.pos = Some(key.to_vec());
                    Ok(Some((key.to_vec(), value)))
                }
                None => Ok(None),
            },
            SeekOp::SetRange(key) => {
                let item = table
                    .range(key..)
                    .map_err(|e| Error::Engine(e.to_string()))?
                    .next();
                match item {
                    Some(Ok((key, value))) => {
                        let key = key.value().to_vec();
                        let value = value.value().to_vec();
                        self.pos = Some(key.clone());
                        Ok(Some((key, value)))
                    }
                    Some(Err(e)) => Err(Error::Engine(e.to_string())),
                    None => Ok(None),
                }
            }
            SeekOp::GetBoth { key, value } => match lookup(&table, key)? {
                Some(stored) if stored.as_slice() == value => {
                    self.pos = Some(key.to_vec());
                    Ok(Some((key.to_vec(), stored)))
                }
                _ => Ok(None),
            },
            SeekOp::GetBothRange { key, value } => match lookup(&table, key)? {
                Some(stored) if stored.as_slice() >= value => {
                    self.pos = Some(key.to_vec());
                    Ok(Some((key.to_vec(), stored)))
                }
                _ => Ok(None),
            },
        }
    }
}

fn lookup(
    table: &ReadOnlyTable<&'static [u8], &'static [u8]>,
    key: &[u8],
) -> Result<Option<Vec<u8>>> {
    match table.get(key) {
        Ok(Some(value)) => Ok(Some(value.value().to_vec())),
        Ok(None) => Ok(None),
        Err(e) => Err(Error::Engine(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineHandle;

    fn seeded() -> EngineHandle {
        let handle = EngineHandle::open_mock().unwrap();
        for (key, value) in [(b"a1", b"x1"), (b"a2", b"x2"), (b"b1", b"y1")] {
            handle.put(None, key, value, false).unwrap();
        }
        handle
    }

    #[test]
    fn walks_records_in_key_order() {
        let handle = seeded();
        let mut cursor = handle.cursor().unwrap();
        let mut keys = Vec::new();
        while let Some((key, _)) = cursor.next().unwrap() {
            keys.push(key);
        }
        assert_eq!(keys, vec![b"a1".to_vec(), b"a2".to_vec(), b"b1".to_vec()]);
    }

    #[test]
    fn empty_file_yields_nothing() {
        let handle = EngineHandle::open_mock().unwrap();
        let mut cursor = handle.cursor().unwrap();
        assert_eq!(cursor.next().unwrap(), None);
    }

    #[test]
    fn snapshot_hides_later_writes() {
        let handle = seeded();
        let mut cursor = handle.cursor().unwrap();
        handle.put(None, b"a0", b"late", false).unwrap();
        let (first, _) = cursor.next().unwrap().unwrap();
        assert_eq!(first, b"a1".to_vec());
    }

    #[test]
    fn set_lands_on_exact_key() {
        let handle = seeded();
        let mut cursor = handle.cursor().unwrap();
        let (key, value) = cursor.seek(SeekOp::Set(b"a2")).unwrap().unwrap();
        assert_eq!(key, b"a2".to_vec());
        assert_eq!(value, b"x2".to_vec());
        let (next, _) = cursor.next().unwrap().unwrap();
        assert_eq!(next, b"b1".to_vec());
    }

    #[test]
    fn set_misses_absent_key() {
        let handle = seeded();
        let mut cursor = handle.cursor().unwrap();
        assert_eq!(cursor.seek(SeekOp::Set(b"a3")).unwrap(), None);
        // Position is untouched by the miss
        let (first, _) = cursor.next().unwrap().unwrap();
        assert_eq!(first, b"a1".to_vec());
    }

    #[test]
    fn set_range_lands_on_following_key() {
        let handle = seeded();
        let mut cursor = handle.cursor().unwrap();
        let (key, _) = cursor.seek(SeekOp::SetRange(b"a3")).unwrap().unwrap();
        assert_eq!(key, b"b1".to_vec());
        assert_eq!(cursor.seek(SeekOp::SetRange(b"c")).unwrap(), None);
    }

    #[test]
    fn get_both_requires_exact_value() {
        let handle = seeded();
        let mut cursor = handle.cursor().unwrap();
        let hit = cursor
            .seek(SeekOp::GetBoth { key: b"a1", value: b"x1" })
            .unwrap();
        assert_eq!(hit, Some((b"a1".to_vec(), b"x1".to_vec())));
        let miss = cursor
            .seek(SeekOp::GetBoth { key: b"a1", value: b"x2" })
            .unwrap();
        assert_eq!(miss, None);
    }

    #[test]
    fn get_both_range_accepts_later_values() {
        let handle = seeded();
        let mut cursor = handle.cursor().unwrap();
        let hit = cursor
            .seek(SeekOp::GetBothRange { key: b"a1", value: b"x0" })
            .unwrap();
        assert_eq!(hit, Some((b"a1".to_vec(), b"x1".to_vec())));
        let miss = cursor
            .seek(SeekOp::GetBothRange { key: b"a1", value: b"x2" })
            .unwrap();
        assert_eq!(miss, None);
    }
}
