//! # Join Cache Integration Tests
//!
//! Drives a block nested-loop join through `JoinCache` and compares the
//! result with a plain nested loop over the base rows.

use std::sync::Arc;

use querycore::memory::Pool;
use querycore::{FieldType, JoinCache, JoinTable, MemoryBudget, RowLayout, SessionOptions};
use tempfile::tempdir;

fn outer_layout() -> RowLayout {
    RowLayout::builder()
        .column("id", FieldType::Int64)
        .column("k", FieldType::Int32)
        .nullable("city", FieldType::char(12))
        .column("comment", FieldType::varchar(40))
        .build()
        .unwrap()
}

fn inner_layout() -> RowLayout {
    RowLayout::builder()
        .column("k", FieldType::Int32)
        .column("name", FieldType::varchar(10))
        .build()
        .unwrap()
}

fn outer_rows(layout: &RowLayout, n: i64) -> Vec<Vec<u8>> {
    (0..n)
        .map(|i| {
            let mut row = layout.new_row();
            layout.field_mut(0, &mut row).store_int(i).unwrap();
            layout.field_mut(1, &mut row).store_int(i % 37).unwrap();
            if i % 3 != 0 {
                layout.field_mut(2, &mut row).store_str("Oslo").unwrap();
            }
            layout
                .field_mut(3, &mut row)
                .store_str(&"c".repeat((i % 41) as usize))
                .unwrap();
            row
        })
        .collect()
}

fn inner_rows(layout: &RowLayout) -> Vec<Vec<u8>> {
    (0..50)
        .map(|k| {
            let mut row = layout.new_row();
            layout.field_mut(0, &mut row).store_int(k).unwrap();
            layout
                .field_mut(1, &mut row)
                .store_str(&format!("n{}", k))
                .unwrap();
            row
        })
        .collect()
}

fn drain(
    cache: &mut JoinCache<'_>,
    outer: &RowLayout,
    inner: &RowLayout,
    outer_data: &[Vec<u8>],
    inner_data: &[Vec<u8>],
    joined: &mut Vec<(i64, String)>,
) {
    for i in inner_data {
        let key = inner.field(0, i).val_int();
        cache
            .for_each_record(|rows, ids| {
                let o = &rows[0];
                assert_eq!(&outer_data[ids[0] as usize], o);
                if outer.field(1, o).val_int() == key {
                    joined.push((outer.field(0, o).val_int(), inner.field(1, i).val_str()));
                }
                Ok(())
            })
            .unwrap();
    }
    cache.reset_cache_write();
}

#[test]
fn block_nested_loop_matches_plain_nested_loop() {
    let dir = tempdir().unwrap();
    let budget = Arc::new(MemoryBudget::with_limit(64 * 1024 * 1024));
    let options = SessionOptions::builder()
        .tmp_dir(dir.path())
        .join_buffer_size(8 * 1024)
        .memory_budget(Arc::clone(&budget))
        .build()
        .unwrap();

    let (outer, inner) = (outer_layout(), inner_layout());
    let outer_data = outer_rows(&outer, 2_000);
    let inner_data = inner_rows(&inner);

    let mut expected = Vec::new();
    for o in &outer_data {
        for i in &inner_data {
            if outer.field(1, o).val_int() == inner.field(0, i).val_int() {
                expected.push((outer.field(0, o).val_int(), inner.field(1, i).val_str()));
            }
        }
    }

    let mut joined = Vec::new();
    let mut drains = 0;
    {
        let mut cache =
            JoinCache::new(vec![JoinTable::new(&outer).with_row_id()], &options).unwrap();
        assert!(budget.stats().join_used >= 8 * 1024);

        for (pos, row) in outer_data.iter().enumerate() {
            if cache
                .store_record_in_cache(&[(row.as_slice(), pos as u64)])
                .unwrap()
            {
                drain(&mut cache, &outer, &inner, &outer_data, &inner_data, &mut joined);
                drains += 1;
            }
        }
        if !cache.is_empty() {
            drain(&mut cache, &outer, &inner, &outer_data, &inner_data, &mut joined);
            drains += 1;
        }
    }

    assert!(drains > 1);
    expected.sort();
    joined.sort();
    assert_eq!(joined, expected);
    assert_eq!(budget.stats().join_used, 0);
}

#[test]
fn exhausted_join_pool_fails_construction() {
    let dir = tempdir().unwrap();
    let budget = Arc::new(MemoryBudget::with_limit(0));
    budget
        .allocate(Pool::Join, budget.available(Pool::Join))
        .unwrap();
    let options = SessionOptions::builder()
        .tmp_dir(dir.path())
        .memory_budget(budget)
        .build()
        .unwrap();
    let outer = outer_layout();
    assert!(JoinCache::new(vec![JoinTable::new(&outer)], &options).is_err());
}
