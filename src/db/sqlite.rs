//! SQLite backend implementation.

use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;

use super::error::{DbError, Result};
use super::key::CompositeKey;
use super::row::Value;
use super::schema::{self, Dialect, Table};

pub struct SqliteDb {
    pub(crate) conn: Connection,
}

impl SqliteDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        // Off by default and scoped to the connection
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        schema::create(&self.conn)
    }

    pub fn validate_schema(&self) -> Result<()> {
        schema::validate(&self.conn)
    }

    pub fn insert(&self, table: &Table, values: &[Value]) -> Result<CompositeKey> {
        self.conn
            .query_row(
                &table.insert_sql(Dialect::Sqlite),
                params_from_iter(values.iter()),
                |row| Ok(CompositeKey::new(row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| match DbError::from_sqlite(table.name, e) {
                // The allocated local id is only null past i64::MAX
                DbError::NotNullViolation { column, .. } if column == table.local_id_column() => {
                    DbError::IdSpaceExhausted {
                        table: table.name.to_string(),
                    }
                }
                other => other,
            })
    }

    /// Rows whose `columns` pair equals `key`, ordered by primary key.
    pub fn select_by_pair(
        &self,
        table: &Table,
        columns: [&str; 2],
        key: CompositeKey,
    ) -> Result<Vec<Vec<Value>>> {
        let mut stmt = self
            .conn
            .prepare_cached(&table.select_by_pair_sql(Dialect::Sqlite, columns))?;
        let mut rows = stmt.query(params![key.local_id, key.malette_id])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(read_row(table, row)?);
        }
        Ok(results)
    }

    pub fn select_all(&self, table: &Table) -> Result<Vec<Vec<Value>>> {
        let mut stmt = self.conn.prepare(&table.select_all_sql(Dialect::Sqlite))?;
        let mut rows = stmt.query([])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(read_row(table, row)?);
        }
        Ok(results)
    }

    /// Returns the number of rows updated.
    pub fn update_pair(
        &self,
        table: &Table,
        row: CompositeKey,
        columns: [&str; 2],
        target: Option<CompositeKey>,
    ) -> Result<usize> {
        self.conn
            .execute(
                &table.update_pair_sql(Dialect::Sqlite, columns),
                params![
                    target.map(|k| k.local_id),
                    target.map(|k| k.malette_id),
                    row.local_id,
                    row.malette_id
                ],
            )
            .map_err(|e| DbError::from_sqlite(table.name, e))
    }
}

fn read_row(table: &Table, row: &rusqlite::Row<'_>) -> Result<Vec<Value>> {
    table
        .columns
        .iter()
        .enumerate()
        .map(|(index, column)| Value::from_sqlite(row, index, column.sql_type))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{CAMPAIGN, LOT};

    fn campaign(local: Option<i64>, malette: i64, name: &str) -> Vec<Value> {
        vec![
            Value::Integer(local),
            Value::Integer(Some(malette)),
            Value::Text(Some(name.to_string())),
            Value::Text(None),
            Value::Integer(None),
        ]
    }

    fn open() -> SqliteDb {
        let db = SqliteDb::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_local_ids_are_allocated_per_table() {
        let db = open();
        assert_eq!(
            db.insert(&CAMPAIGN, &campaign(None, 1, "a")).unwrap(),
            CompositeKey::new(1, 1)
        );
        assert_eq!(
            db.insert(&CAMPAIGN, &campaign(Some(10), 2, "b")).unwrap(),
            CompositeKey::new(10, 2)
        );
        assert_eq!(
            db.insert(&CAMPAIGN, &campaign(None, 1, "c")).unwrap(),
            CompositeKey::new(11, 1)
        );
    }

    #[test]
    fn test_same_local_id_under_two_malettes() {
        let db = open();
        db.insert(&CAMPAIGN, &campaign(Some(0), 1, "a")).unwrap();
        db.insert(&CAMPAIGN, &campaign(Some(0), 2, "b")).unwrap();
        let err = db.insert(&CAMPAIGN, &campaign(Some(0), 1, "c")).unwrap_err();
        assert!(matches!(err, DbError::UniqueConstraintViolation { .. }));

        let rows = db.select_all(&CAMPAIGN).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_engine_rejects_half_set_pair() {
        // Bypasses row validation to exercise the CHECK constraint
        let db = open();
        let err = db
            .conn
            .execute(
                "INSERT INTO lot (id_lot, id_malette, pictures_path, goprofailed, \"takenDate\",
                                  id_sensors, id_sensors_malette, id_campaign, id_campaign_malette,
                                  id_tile, id_tile_malette)
                 VALUES (0, 1, '/p', 0, '2018-06-01 10:30:00', 0, 1, 0, 1, 5, NULL)",
                [],
            )
            .map_err(|e| DbError::from_sqlite(LOT.name, e))
            .unwrap_err();
        assert!(matches!(err, DbError::PartialForeignKey { .. }), "{:?}", err);
    }

    #[test]
    fn test_local_id_space_exhausted() {
        let db = open();
        db.insert(&CAMPAIGN, &campaign(Some(i64::MAX), 1, "last"))
            .unwrap();

        let err = db.insert(&CAMPAIGN, &campaign(None, 1, "next")).unwrap_err();
        assert!(
            matches!(err, DbError::IdSpaceExhausted { ref table } if table == "campaign"),
            "{:?}",
            err
        );

        // Nothing was written and the table still reads back
        let rows = db.select_all(&CAMPAIGN).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::Integer(Some(i64::MAX)));

        // Other malettes share the local id space
        let err = db.insert(&CAMPAIGN, &campaign(None, 2, "other")).unwrap_err();
        assert!(matches!(err, DbError::IdSpaceExhausted { .. }));
    }

    #[test]
    fn test_update_pair_missing_row() {
        let db = open();
        let updated = db
            .update_pair(&LOT, CompositeKey::new(0, 1), ["id_tile", "id_tile_malette"], None)
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("panodb.db");
        let db = SqliteDb::open(&path).unwrap();
        db.initialize().unwrap();
        assert!(path.exists());
    }
}
