//! Typed table helpers over the ordered byte store.
//!
//! Two table shapes cover every record in a shard:
//!
//! - [`SimpleKeyTable`]: primary key only (counters, GC records, expiration
//!   indexes).
//! - [`CompositeKeyTable`]: partition key + sort key (the main entity tables,
//!   where the partition key addresses a namespace and the sort key an entity
//!   inside it).
//!
//! Each table is parameterized by a 2-byte table identifier and the shard's
//! `[lower, upper]` bound. The identifier leads every key, so tables occupy
//! disjoint regions of the shared keyspace; the bounds pin the shard's slice
//! of each table. Values are bincode-encoded records.
//!
//! Pagination hands out opaque [`PaginationToken`] cursors. A page with
//! `next == None` is the last one; garbage collection relies on exactly this
//! to detect that a sweep finished.

use std::marker::PhantomData;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::keys;
use crate::store::KeyRange;
use crate::store::RwTxn;
use crate::store::StoreError;
use crate::store::StoreRead;

/// Opaque pagination cursor: the full key of the row a page ended at, plus
/// the direction the next scan should take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationToken {
    pub key: Vec<u8>,
    pub reverse: bool,
}

/// One page of decoded records with continuation cursors.
#[derive(Debug, Clone)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    pub next: Option<PaginationToken>,
    pub previous: Option<PaginationToken>,
}

/// A table addressed by a single primary key.
pub struct SimpleKeyTable<T> {
    table_id: [u8; 2],
    lower_bound: Vec<u8>,
    upper_bound: Vec<u8>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> SimpleKeyTable<T> {
    pub fn new(table_id: [u8; 2], lower_bound: &[u8], upper_bound: &[u8]) -> SimpleKeyTable<T> {
        debug_assert!(lower_bound <= upper_bound, "TABLE: lower bound must not exceed upper bound");
        SimpleKeyTable {
            table_id,
            lower_bound: lower_bound.to_vec(),
            upper_bound: upper_bound.to_vec(),
            _record: PhantomData,
        }
    }

    /// Key range covered by this table within the shard's bounds, for
    /// snapshot declarations.
    pub fn table_key_range(&self) -> KeyRange {
        KeyRange::new(
            keys::KeyBuf::new().raw(&self.table_id).raw(&self.lower_bound).build(),
            keys::KeyBuf::new().raw(&self.table_id).raw(&self.upper_bound).build(),
        )
    }

    pub fn get(&self, txn: &impl StoreRead, key: &[u8]) -> Result<T, StoreError> {
        let raw = txn.get(&self.full_key(key))?;
        decode(&raw)
    }

    pub fn set(&self, txn: &mut RwTxn, key: &[u8], record: &T) -> Result<(), StoreError> {
        let encoded = encode(record)?;
        txn.set(&self.full_key(key), &encoded)
    }

    pub fn delete(&self, txn: &mut RwTxn, key: &[u8]) -> Result<(), StoreError> {
        txn.delete(&self.full_key(key))
    }

    /// List one page across the whole table (within the shard's bounds).
    pub fn list_paginated(
        &self,
        txn: &impl StoreRead,
        token: Option<&PaginationToken>,
        limit: usize,
    ) -> Result<ListPage<T>, StoreError> {
        let lower = keys::KeyBuf::new().raw(&self.table_id).raw(&self.lower_bound).build();
        let upper = keys::KeyBuf::new().raw(&self.table_id).raw(&self.upper_bound).build();
        list_page(txn, lower, keys::prefix_successor(&upper), token, limit)
    }

    /// Collect up to `limit` records whose keys fall between the `lower` and
    /// `upper` key prefixes (both inclusive), in key order.
    ///
    /// The page is materialized before the caller resumes writing; callers
    /// pass their work budget as the limit.
    pub fn list_in_range(
        &self,
        txn: &impl StoreRead,
        lower: &[u8],
        upper: &[u8],
        reverse: bool,
        limit: usize,
    ) -> Result<Vec<T>, StoreError> {
        let lower = keys::KeyBuf::new().raw(&self.table_id).raw(lower).build();
        let upper = keys::KeyBuf::new().raw(&self.table_id).raw(upper).build();
        let pairs = txn.scan(&lower, keys::prefix_successor(&upper).as_deref(), reverse, limit)?;
        pairs.iter().map(|(_, value)| decode(value)).collect()
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        debug_assert!(
            in_bounds(key, &self.lower_bound, &self.upper_bound),
            "TABLE: key outside shard bounds"
        );
        keys::KeyBuf::new().raw(&self.table_id).raw(key).build()
    }
}

/// A table addressed by a partition key plus a sort key. Pagination scans a
/// single partition in sort-key order.
pub struct CompositeKeyTable<T> {
    table_id: [u8; 2],
    lower_bound: Vec<u8>,
    upper_bound: Vec<u8>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> CompositeKeyTable<T> {
    pub fn new(table_id: [u8; 2], lower_bound: &[u8], upper_bound: &[u8]) -> CompositeKeyTable<T> {
        debug_assert!(lower_bound <= upper_bound, "TABLE: lower bound must not exceed upper bound");
        CompositeKeyTable {
            table_id,
            lower_bound: lower_bound.to_vec(),
            upper_bound: upper_bound.to_vec(),
            _record: PhantomData,
        }
    }

    pub fn table_key_range(&self) -> KeyRange {
        KeyRange::new(
            keys::KeyBuf::new().raw(&self.table_id).raw(&self.lower_bound).build(),
            keys::KeyBuf::new().raw(&self.table_id).raw(&self.upper_bound).build(),
        )
    }

    pub fn get(&self, txn: &impl StoreRead, pk: &[u8], sk: &[u8]) -> Result<T, StoreError> {
        let raw = txn.get(&self.full_key(pk, sk))?;
        decode(&raw)
    }

    pub fn set(&self, txn: &mut RwTxn, pk: &[u8], sk: &[u8], record: &T) -> Result<(), StoreError> {
        let encoded = encode(record)?;
        txn.set(&self.full_key(pk, sk), &encoded)
    }

    pub fn delete(&self, txn: &mut RwTxn, pk: &[u8], sk: &[u8]) -> Result<(), StoreError> {
        txn.delete(&self.full_key(pk, sk))
    }

    /// List one page of the partition `pk` in sort-key order.
    pub fn list_paginated(
        &self,
        txn: &impl StoreRead,
        pk: &[u8],
        token: Option<&PaginationToken>,
        limit: usize,
    ) -> Result<ListPage<T>, StoreError> {
        debug_assert!(
            in_bounds(pk, &self.lower_bound, &self.upper_bound),
            "TABLE: partition key outside shard bounds"
        );
        let prefix = keys::KeyBuf::new().raw(&self.table_id).raw(pk).build();
        let end = keys::prefix_successor(&prefix);
        list_page(txn, prefix, end, token, limit)
    }

    fn full_key(&self, pk: &[u8], sk: &[u8]) -> Vec<u8> {
        debug_assert!(
            in_bounds(pk, &self.lower_bound, &self.upper_bound),
            "TABLE: partition key outside shard bounds"
        );
        keys::KeyBuf::new().raw(&self.table_id).raw(pk).raw(sk).build()
    }
}

/// Shard-bound check on the leading bytes of a key.
fn in_bounds(key: &[u8], lower: &[u8], upper: &[u8]) -> bool {
    let head = &key[..key.len().min(lower.len())];
    let lower = &lower[..head.len()];
    let upper = &upper[..head.len()];
    head >= lower && head <= upper
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(record).map_err(|source| StoreError::Encode { source: Box::new(source) })
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(raw).map_err(|source| StoreError::Decode { source: Box::new(source) })
}

/// Shared pagination walk over `[lower, end)`.
fn list_page<T: DeserializeOwned>(
    txn: &impl StoreRead,
    lower: Vec<u8>,
    end: Option<Vec<u8>>,
    token: Option<&PaginationToken>,
    limit: usize,
) -> Result<ListPage<T>, StoreError> {
    debug_assert!(limit > 0, "TABLE: page limit must be positive");

    match token {
        Some(token) if token.reverse => {
            // Walk backwards from the cursor (exclusive), then flip the page
            // back into ascending order.
            let mut pairs = txn.scan(&lower, Some(token.key.as_slice()), true, limit + 1)?;
            let more = pairs.len() > limit;
            pairs.truncate(limit);
            pairs.reverse();

            let items = pairs.iter().map(|(_, value)| decode(value)).collect::<Result<_, _>>()?;
            let previous = if more {
                pairs.first().map(|(key, _)| PaginationToken { key: key.clone(), reverse: true })
            } else {
                None
            };
            let next =
                pairs.last().map(|(key, _)| PaginationToken { key: key.clone(), reverse: false });
            Ok(ListPage { items, next, previous })
        }
        _ => {
            let start = match token {
                Some(token) => keys::key_successor(&token.key),
                None => lower,
            };
            let mut pairs = txn.scan(&start, end.as_deref(), false, limit + 1)?;
            let more = pairs.len() > limit;
            pairs.truncate(limit);

            let items = pairs.iter().map(|(_, value)| decode(value)).collect::<Result<_, _>>()?;
            let next = if more {
                pairs.last().map(|(key, _)| PaginationToken { key: key.clone(), reverse: false })
            } else {
                None
            };
            let previous = if token.is_some() {
                pairs.first().map(|(key, _)| PaginationToken { key: key.clone(), reverse: true })
            } else {
                None
            };
            Ok(ListPage { items, next, previous })
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde::Serialize;

    use super::*;
    use crate::Store;
    use crate::keys::KeyBuf;

    const WIDE_OPEN: (&[u8], &[u8]) = (&[0x00; 4], &[0xff; 4]);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        value: u64,
    }

    fn item(name: &str, value: u64) -> Item {
        Item { name: name.to_string(), value }
    }

    #[test]
    fn simple_table_crud() {
        let store = Store::in_memory().unwrap();
        let table: SimpleKeyTable<Item> = SimpleKeyTable::new([0x01, 0x00], WIDE_OPEN.0, WIDE_OPEN.1);
        let key = KeyBuf::new().raw(&[0x10, 0x20, 0x30, 0x40]).u64(1).build();

        let mut txn = store.update().unwrap();
        assert!(matches!(table.get(&txn, &key).unwrap_err(), StoreError::NotFound));
        table.set(&mut txn, &key, &item("a", 1)).unwrap();
        assert_eq!(table.get(&txn, &key).unwrap(), item("a", 1));
        table.delete(&mut txn, &key).unwrap();
        assert!(matches!(table.get(&txn, &key).unwrap_err(), StoreError::NotFound));
        txn.commit().unwrap();
    }

    #[test]
    fn tables_with_same_keys_do_not_collide() {
        let store = Store::in_memory().unwrap();
        let first: SimpleKeyTable<Item> = SimpleKeyTable::new([0x01, 0x00], WIDE_OPEN.0, WIDE_OPEN.1);
        let second: SimpleKeyTable<Item> = SimpleKeyTable::new([0x01, 0x01], WIDE_OPEN.0, WIDE_OPEN.1);
        let key = KeyBuf::new().raw(&[0x10, 0x20, 0x30, 0x40]).u64(1).build();

        let mut txn = store.update().unwrap();
        first.set(&mut txn, &key, &item("first", 1)).unwrap();
        second.set(&mut txn, &key, &item("second", 2)).unwrap();
        assert_eq!(first.get(&txn, &key).unwrap(), item("first", 1));
        assert_eq!(second.get(&txn, &key).unwrap(), item("second", 2));
    }

    #[test]
    fn composite_table_lists_single_partition() {
        let store = Store::in_memory().unwrap();
        let table: CompositeKeyTable<Item> =
            CompositeKeyTable::new([0x01, 0x02], WIDE_OPEN.0, WIDE_OPEN.1);
        let pk1 = KeyBuf::new().raw(&[0x10, 0x20, 0x30, 0x40]).u64(1).build();
        let pk2 = KeyBuf::new().raw(&[0x10, 0x20, 0x30, 0x40]).u64(2).build();

        let mut txn = store.update().unwrap();
        for name in ["a", "b", "c"] {
            let sk = KeyBuf::new().str(name).build();
            table.set(&mut txn, &pk1, &sk, &item(name, 1)).unwrap();
        }
        table.set(&mut txn, &pk2, &KeyBuf::new().str("z").build(), &item("z", 2)).unwrap();
        txn.commit().unwrap();

        let txn = store.view().unwrap();
        let page = table.list_paginated(&txn, &pk1, None, 10).unwrap();
        let names: Vec<&str> = page.items.iter().map(|record| record.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(page.next.is_none());
        assert!(page.previous.is_none());
    }

    #[test]
    fn pagination_walks_forward_and_back() {
        let store = Store::in_memory().unwrap();
        let table: CompositeKeyTable<Item> =
            CompositeKeyTable::new([0x01, 0x03], WIDE_OPEN.0, WIDE_OPEN.1);
        let pk = KeyBuf::new().raw(&[0x10, 0x20, 0x30, 0x40]).u64(1).build();

        let mut txn = store.update().unwrap();
        for index in 0..7u64 {
            let name = format!("item_{index}");
            let sk = KeyBuf::new().str(&name).build();
            table.set(&mut txn, &pk, &sk, &item(&name, index)).unwrap();
        }
        txn.commit().unwrap();

        let txn = store.view().unwrap();

        // Page 1.
        let page1 = table.list_paginated(&txn, &pk, None, 3).unwrap();
        assert_eq!(page1.items.len(), 3);
        assert_eq!(page1.items[0].name, "item_0");
        let next = page1.next.expect("more pages remain");
        assert!(page1.previous.is_none());

        // Page 2.
        let page2 = table.list_paginated(&txn, &pk, Some(&next), 3).unwrap();
        assert_eq!(page2.items[0].name, "item_3");
        let next = page2.next.expect("more pages remain");

        // Page 3 is the last and shorter than the limit.
        let page3 = table.list_paginated(&txn, &pk, Some(&next), 3).unwrap();
        assert_eq!(page3.items.len(), 1);
        assert_eq!(page3.items[0].name, "item_6");
        assert!(page3.next.is_none());

        // Walk back from page 3 to page 2.
        let previous = page3.previous.expect("previous cursor exists");
        let back = table.list_paginated(&txn, &pk, Some(&previous), 3).unwrap();
        let names: Vec<&str> = back.items.iter().map(|record| record.name.as_str()).collect();
        assert_eq!(names, vec!["item_3", "item_4", "item_5"]);
    }

    #[test]
    fn exact_page_boundary_has_no_next() {
        let store = Store::in_memory().unwrap();
        let table: CompositeKeyTable<Item> =
            CompositeKeyTable::new([0x01, 0x04], WIDE_OPEN.0, WIDE_OPEN.1);
        let pk = KeyBuf::new().raw(&[0x10, 0x20, 0x30, 0x40]).u64(1).build();

        let mut txn = store.update().unwrap();
        for name in ["a", "b", "c"] {
            table
                .set(&mut txn, &pk, &KeyBuf::new().str(name).build(), &item(name, 0))
                .unwrap();
        }
        txn.commit().unwrap();

        let txn = store.view().unwrap();
        let page = table.list_paginated(&txn, &pk, None, 3).unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.next.is_none());
    }

    #[test]
    fn list_in_range_is_prefix_inclusive() {
        let store = Store::in_memory().unwrap();
        let table: SimpleKeyTable<Item> = SimpleKeyTable::new([0x01, 0x05], WIDE_OPEN.0, WIDE_OPEN.1);
        let shard = [0x10u8, 0x20, 0x30, 0x40];

        let mut txn = store.update().unwrap();
        for timestamp in [5i64, 10, 15, 20] {
            let key = KeyBuf::new().raw(&shard).i64(timestamp).str("row").build();
            table.set(&mut txn, &key, &item("row", timestamp as u64)).unwrap();
        }
        txn.commit().unwrap();

        let txn = store.view().unwrap();
        let lower = KeyBuf::new().raw(&shard).i64(0).build();
        let upper = KeyBuf::new().raw(&shard).i64(15).build();
        let rows = table.list_in_range(&txn, &lower, &upper, false, 100).unwrap();
        let values: Vec<u64> = rows.iter().map(|record| record.value).collect();
        // The upper bound is an inclusive prefix: the row at 15 is included.
        assert_eq!(values, vec![5, 10, 15]);

        let rows = table.list_in_range(&txn, &lower, &upper, false, 2).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
