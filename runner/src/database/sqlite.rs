use super::{IfExists, Status, StoreError};
use crate::grid::Grid;
use itertools::Itertools;
use rusqlite::{params_from_iter, Connection};
use std::{collections::BTreeMap, path::Path, time::Duration};
use tracing::{debug, info, warn};

// upper bound on waiting for another process's claim/finalize transaction
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) const TABLE: &str = "grid";

#[derive(Debug)]
/// Handle to the shared SQLite grid table.
///
/// One handle per process (or per worker thread); all cross-process
/// coordination goes through the database file itself.
pub struct GridStore {
    connection: Connection,
    columns: Vec<String>,
}

impl GridStore {
    /// Open an existing store and verify it carries the configured parameter columns.
    pub fn open(path: &Path, columns: Vec<String>) -> Result<Self, StoreError> {
        let store = Self::open_unchecked(path, columns)?;
        store.verify_schema()?;

        Ok(store)
    }

    fn open_unchecked(path: &Path, columns: Vec<String>) -> Result<Self, StoreError> {
        let connection = Connection::open(path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;

        Ok(Self {
            connection,
            columns,
        })
    }

    /// Persist a freshly generated grid under the given existence policy.
    pub fn create(path: &Path, grid: &Grid, policy: IfExists) -> Result<Self, StoreError> {
        if path.exists() {
            match policy {
                IfExists::Fail => return Err(StoreError::InitConflict(path.to_path_buf())),
                IfExists::Skip => {
                    info!(path = %path.display(), "Skipped grid generation, store already exists");

                    return Self::open(path, grid.names.clone());
                }
                IfExists::Replace => {
                    let mut store = Self::open_unchecked(path, grid.names.clone())?;
                    store
                        .connection
                        .execute(&format!("drop table if exists {TABLE}"), [])?;
                    store.apply_schema()?;
                    store.bulk_insert(grid)?;

                    info!(cells = grid.cells.len(), "Replaced existing grid");

                    return Ok(store);
                }
                IfExists::Append => {
                    let mut store = Self::open_unchecked(path, grid.names.clone())?;
                    store.apply_schema()?;
                    store.verify_schema()?;
                    store.bulk_insert(grid)?;

                    warn!(
                        cells = grid.cells.len(),
                        "Appended to existing grid, duplicate cells are possible"
                    );

                    return Ok(store);
                }
            }
        }

        let mut store = Self::open_unchecked(path, grid.names.clone())?;
        store.apply_schema()?;
        store.bulk_insert(grid)?;

        info!(
            cells = grid.cells.len(),
            path = %path.display(),
            "Created grid store"
        );

        Ok(store)
    }

    fn apply_schema(&self) -> Result<(), StoreError> {
        let columns = self
            .columns
            .iter()
            .map(|name| format!("\"{name}\" real not null"))
            .join(",\n    ");
        let schema = format!(
            "create table if not exists {TABLE} (
    id integer primary key,
    {columns},
    status text not null
);"
        );

        self.connection.execute(&schema, [])?;
        debug!("Applied SQL schema");

        Ok(())
    }

    fn verify_schema(&self) -> Result<(), StoreError> {
        let existing: Vec<String> = self
            .connection
            .prepare(&format!("select name from pragma_table_info('{TABLE}')"))?
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        if existing.is_empty() {
            return Err(StoreError::SchemaMismatch(format!(
                "no '{TABLE}' table found"
            )));
        }

        for required in self.columns.iter().map(String::as_str).chain(["status"]) {
            if !existing.iter().any(|column| column == required) {
                return Err(StoreError::SchemaMismatch(format!(
                    "missing column '{required}'"
                )));
            }
        }

        Ok(())
    }

    /// Insert all cells as `pending` in a single transaction, all-or-nothing.
    fn bulk_insert(&mut self, grid: &Grid) -> Result<(), StoreError> {
        let mut tx = self.connection.transaction()?;
        tx.set_drop_behavior(rusqlite::DropBehavior::Rollback);

        {
            let column_list = self
                .columns
                .iter()
                .map(|name| format!("\"{name}\""))
                .join(", ");
            let placeholders = (1..=self.columns.len()).map(|index| format!("?{index}")).join(", ");
            let insert = format!(
                "insert into {TABLE} ({column_list}, status) values ({placeholders}, '{}')",
                Status::Pending.as_str()
            );

            let mut statement = tx.prepare_cached(&insert)?;

            for cell in &grid.cells {
                statement.execute(params_from_iter(cell.iter()))?;
            }
        }

        tx.commit()?;
        info!(cells = grid.cells.len(), "Stored grid cells");

        Ok(())
    }

    pub fn status_counts(&self) -> Result<BTreeMap<Status, u64>, StoreError> {
        let mut counts = BTreeMap::new();

        let mut statement = self
            .connection
            .prepare_cached(&format!("select status, count(*) from {TABLE} group by status"))?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;

            match status.parse::<Status>() {
                Ok(status) => {
                    counts.insert(status, count);
                }
                Err(_) => warn!(status = %status, "Ignoring unknown status value"),
            }
        }

        Ok(counts)
    }

    pub fn cell_count(&self) -> Result<u64, StoreError> {
        Ok(self
            .connection
            .prepare_cached(&format!("select count(*) from {TABLE}"))?
            .query_row([], |row| row.get(0))?)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }
}
