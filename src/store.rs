//! Wide-column store abstraction and an in-memory reference backend
//!
//! Rows are ordered by raw key bytes and hold an ordered set of
//! `(family, qualifier) -> value` cells. Writing a row merges its cells into
//! whatever the row already holds.

use std::collections::BTreeMap;
use std::ops::Bound;

use auto_impl::auto_impl;
use parking_lot::RwLock;

use crate::error::Result;

/// A single stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}
impl Cell {
    #[must_use]
    pub fn new(family: &[u8], qualifier: &[u8], value: Vec<u8>) -> Self {
        Self {
            family: family.to_vec(),
            qualifier: qualifier.to_vec(),
            value,
        }
    }
}

/// A row as returned by a read or a scan
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    pub key: Vec<u8>,
    pub cells: Vec<Cell>,
}
impl Row {
    #[must_use]
    pub fn new(key: Vec<u8>, cells: Vec<Cell>) -> Self {
        Self { key, cells }
    }

    /// Looks up the value of one cell
    #[must_use]
    pub fn value(&self, family: &[u8], qualifier: &[u8]) -> Option<&[u8]> {
        self.cells
            .iter()
            .find(|c| c.family == family && c.qualifier == qualifier)
            .map(|c| c.value.as_slice())
    }
}

/// A set of cells to write into one row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowMutation {
    pub key: Vec<u8>,
    pub cells: Vec<Cell>,
}
impl RowMutation {
    #[must_use]
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            cells: Vec::new(),
        }
    }

    pub fn put(&mut self, family: &[u8], qualifier: &[u8], value: Vec<u8>) {
        self.cells.push(Cell::new(family, qualifier, value));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// The ordered wide-column store variant rows live in
///
/// Backends only promise single-row atomicity. `check_and_put` is the one
/// conditional operation the configuration layer builds on.
#[auto_impl(&, Arc, Box)]
pub trait VariantStore: Send + Sync {
    /// Reads a whole row
    fn get(&self, key: &[u8]) -> Result<Option<Row>>;

    /// Merges the cells of a mutation into its row
    fn put(&self, mutation: RowMutation) -> Result<()>;

    /// Removes a whole row
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Reads every row with `start <= key < stop`, in key order
    fn scan(&self, start: &[u8], stop: &[u8]) -> Result<Vec<Row>>;

    /// Applies a mutation only if one cell of its row holds the expected value
    ///
    /// An `expected` of `None` requires the cell to be absent.
    fn check_and_put(
        &self,
        family: &[u8],
        qualifier: &[u8],
        expected: Option<&[u8]>,
        mutation: RowMutation,
    ) -> Result<bool>;
}

type CellMap = BTreeMap<(Vec<u8>, Vec<u8>), Vec<u8>>;

/// A `VariantStore` held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryVariantStore {
    rows: RwLock<BTreeMap<Vec<u8>, CellMap>>,
}
impl InMemoryVariantStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn to_row(key: &[u8], cells: &CellMap) -> Row {
        Row {
            key: key.to_vec(),
            cells: cells
                .iter()
                .map(|((family, qualifier), value)| Cell {
                    family: family.clone(),
                    qualifier: qualifier.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    fn merge(rows: &mut BTreeMap<Vec<u8>, CellMap>, mutation: RowMutation) {
        let row = rows.entry(mutation.key).or_default();
        for cell in mutation.cells {
            row.insert((cell.family, cell.qualifier), cell.value);
        }
    }
}
impl VariantStore for InMemoryVariantStore {
    fn get(&self, key: &[u8]) -> Result<Option<Row>> {
        Ok(self.rows.read().get(key).map(|cells| Self::to_row(key, cells)))
    }

    fn put(&self, mutation: RowMutation) -> Result<()> {
        Self::merge(&mut self.rows.write(), mutation);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.rows.write().remove(key);
        Ok(())
    }

    fn scan(&self, start: &[u8], stop: &[u8]) -> Result<Vec<Row>> {
        if stop <= start {
            return Ok(Vec::new());
        }
        let rows = self.rows.read();
        Ok(rows
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(stop)))
            .map(|(key, cells)| Self::to_row(key, cells))
            .collect())
    }

    fn check_and_put(
        &self,
        family: &[u8],
        qualifier: &[u8],
        expected: Option<&[u8]>,
        mutation: RowMutation,
    ) -> Result<bool> {
        let mut rows = self.rows.write();
        let current = rows
            .get(&mutation.key)
            .and_then(|cells| cells.get(&(family.to_vec(), qualifier.to_vec())))
            .map(Vec::as_slice);
        if current != expected {
            return Ok(false);
        }
        Self::merge(&mut rows, mutation);
        Ok(true)
    }
}

#[cfg(test)]
mod testing {
    use std::sync::Arc;

    use super::*;

    const FAMILY: &[u8] = b"0";

    fn mutation(key: &[u8], qualifier: &[u8], value: &[u8]) -> RowMutation {
        let mut m = RowMutation::new(key.to_vec());
        m.put(FAMILY, qualifier, value.to_vec());
        m
    }

    #[test]
    fn test_put_merges_cells() {
        let store = InMemoryVariantStore::new();
        store.put(mutation(b"row", b"a", b"1")).unwrap();
        store.put(mutation(b"row", b"b", b"2")).unwrap();
        store.put(mutation(b"row", b"a", b"3")).unwrap();

        let row = store.get(b"row").unwrap().unwrap();
        assert_eq!(row.cells.len(), 2);
        assert_eq!(row.value(FAMILY, b"a"), Some(&b"3"[..]));
        assert_eq!(row.value(FAMILY, b"b"), Some(&b"2"[..]));
        assert_eq!(row.value(b"1", b"a"), None);
    }

    #[test]
    fn test_scan_is_ordered_and_exclusive() {
        let store = InMemoryVariantStore::new();
        for key in [&b"b"[..], b"a", b"d", b"c"] {
            store.put(mutation(key, b"q", b"v")).unwrap();
        }
        let keys: Vec<_> = store
            .scan(b"a", b"d")
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(store.scan(b"d", b"a").unwrap().is_empty());
        assert!(store.scan(b"b", b"b").unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let store = InMemoryVariantStore::new();
        store.put(mutation(b"row", b"q", b"v")).unwrap();
        assert_eq!(store.len(), 1);
        store.delete(b"row").unwrap();
        assert!(store.get(b"row").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_check_and_put() {
        let store = InMemoryVariantStore::new();
        assert!(store.check_and_put(FAMILY, b"v", None, mutation(b"row", b"v", b"1")).unwrap());
        assert!(!store.check_and_put(FAMILY, b"v", None, mutation(b"row", b"v", b"9")).unwrap());
        assert!(
            !store
                .check_and_put(FAMILY, b"v", Some(&b"0"[..]), mutation(b"row", b"v", b"9"))
                .unwrap()
        );
        assert!(
            store
                .check_and_put(FAMILY, b"v", Some(&b"1"[..]), mutation(b"row", b"v", b"2"))
                .unwrap()
        );
        let row = store.get(b"row").unwrap().unwrap();
        assert_eq!(row.value(FAMILY, b"v"), Some(&b"2"[..]));
    }

    #[test]
    fn test_shared_store() {
        let store = Arc::new(InMemoryVariantStore::new());
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.put(mutation(&[i], b"q", &[i])).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.scan(&[0], &[4]).unwrap().len(), 4);
    }
}
