use super::{sqlite::GridStore, IfExists, Status, StoreError};
use crate::{config::ParameterSet, grid, queue};
use std::path::PathBuf;
use tempfile::TempDir;

const TWO_BY_TWO: &str = "
lr: {distribution: linear, min: 0.01, max: 0.1, num: 2}
batch: {distribution: linear, min: 16, max: 32, num: 2}
";

fn sample_grid() -> grid::Grid {
    let parameters: ParameterSet = serde_yaml::from_str(TWO_BY_TWO).unwrap();

    grid::generate(&parameters).unwrap()
}

fn setup() -> (TempDir, PathBuf, GridStore) {
    let grid = sample_grid();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sweep.db");
    let store = GridStore::create(&path, &grid, IfExists::Fail).unwrap();

    (dir, path, store)
}

#[test]
pub fn create_persists_every_cell_as_pending() {
    let (_dir, _path, store) = setup();

    assert_eq!(store.cell_count().unwrap(), 4);
    assert_eq!(
        store.status_counts().unwrap().get(&Status::Pending),
        Some(&4)
    );
}

#[test]
pub fn fail_policy_rejects_an_existing_store() {
    let (_dir, path, store) = setup();
    drop(store);

    let result = GridStore::create(&path, &sample_grid(), IfExists::Fail);

    assert!(matches!(result, Err(StoreError::InitConflict(_))));
}

#[test]
pub fn skip_policy_preserves_existing_statuses() {
    let (_dir, path, mut store) = setup();

    let cell = queue::claim_next(&mut store).unwrap().unwrap();
    queue::finalize(&mut store, cell.id).unwrap();
    queue::claim_next(&mut store).unwrap().unwrap();
    drop(store);

    let store = GridStore::create(&path, &sample_grid(), IfExists::Skip).unwrap();
    let counts = store.status_counts().unwrap();

    assert_eq!(counts.get(&Status::Completed), Some(&1));
    assert_eq!(counts.get(&Status::InProgress), Some(&1));
    assert_eq!(counts.get(&Status::Pending), Some(&2));
}

#[test]
pub fn replace_policy_regenerates_all_cells() {
    let (_dir, path, mut store) = setup();

    let cell = queue::claim_next(&mut store).unwrap().unwrap();
    queue::finalize(&mut store, cell.id).unwrap();
    drop(store);

    let store = GridStore::create(&path, &sample_grid(), IfExists::Replace).unwrap();
    let counts = store.status_counts().unwrap();

    assert_eq!(store.cell_count().unwrap(), 4);
    assert_eq!(counts.get(&Status::Pending), Some(&4));
    assert_eq!(counts.get(&Status::Completed), None);
}

#[test]
pub fn append_policy_adds_cells_alongside_existing_ones() {
    let (_dir, path, mut store) = setup();

    queue::claim_next(&mut store).unwrap().unwrap();
    drop(store);

    let store = GridStore::create(&path, &sample_grid(), IfExists::Append).unwrap();
    let counts = store.status_counts().unwrap();

    assert_eq!(store.cell_count().unwrap(), 8);
    assert_eq!(counts.get(&Status::InProgress), Some(&1));
    assert_eq!(counts.get(&Status::Pending), Some(&7));
}

#[test]
pub fn appended_cells_get_fresh_identifiers() {
    let (_dir, path, store) = setup();
    drop(store);

    let mut store = GridStore::create(&path, &sample_grid(), IfExists::Append).unwrap();

    let mut seen = Vec::new();
    while let Some(cell) = queue::claim_next(&mut store).unwrap() {
        seen.push(cell.id);
    }

    assert_eq!(seen, (1..=8).collect::<Vec<i64>>());
}

#[test]
pub fn open_rejects_a_store_without_a_grid_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.db");

    // opening creates an empty database file with no tables
    drop(rusqlite::Connection::open(&path).unwrap());

    let result = GridStore::open(&path, vec!["lr".to_owned()]);

    assert!(matches!(result, Err(StoreError::SchemaMismatch(_))));
}

#[test]
pub fn open_rejects_a_store_missing_a_parameter_column() {
    let (_dir, path, store) = setup();
    drop(store);

    let result = GridStore::open(
        &path,
        vec!["lr".to_owned(), "batch".to_owned(), "momentum".to_owned()],
    );

    assert!(matches!(result, Err(StoreError::SchemaMismatch(_))));
}

#[test]
pub fn open_accepts_a_matching_store() {
    let (_dir, path, store) = setup();
    drop(store);

    let store = GridStore::open(&path, vec!["lr".to_owned(), "batch".to_owned()]).unwrap();

    assert_eq!(store.cell_count().unwrap(), 4);
}
