//! PostgreSQL/PostGIS backend implementation.

use postgres::types::ToSql;
use postgres::NoTls;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;

use super::error::{DbError, Result};
use super::geo::GeoPoint;
use super::key::CompositeKey;
use super::row::Value;
use super::schema::{self, Dialect, SqlType, Table};

pub struct PgDb {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

type Param = Box<dyn ToSql + Sync>;

fn to_param(value: &Value) -> Param {
    match value {
        Value::Integer(v) => Box::new(*v),
        Value::Real(v) => Box::new(*v),
        Value::Boolean(v) => Box::new(*v),
        Value::Text(v) => Box::new(v.clone()),
        Value::Timestamp(v) => Box::new(*v),
        // Bound as text and parsed by ST_GeogFromText
        Value::Point(v) => Box::new(v.map(|p| p.to_ewkt())),
    }
}

fn read_row(table: &Table, row: &postgres::Row) -> Result<Vec<Value>> {
    table
        .columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            Ok(match column.sql_type {
                SqlType::Integer => Value::Integer(row.try_get(index)?),
                SqlType::Real => Value::Real(row.try_get(index)?),
                SqlType::Boolean => Value::Boolean(row.try_get(index)?),
                SqlType::Text => Value::Text(row.try_get(index)?),
                SqlType::Timestamp => Value::Timestamp(row.try_get(index)?),
                SqlType::GeographyPointZ => {
                    let ewkt: Option<String> = row.try_get(index)?;
                    Value::Point(ewkt.map(|text| text.parse::<GeoPoint>()).transpose()?)
                }
            })
        })
        .collect()
}

const COLUMNS_SQL: &str = "
    SELECT column_name::text, data_type::text, udt_name::text, is_nullable::text
    FROM information_schema.columns
    WHERE table_schema = current_schema() AND table_name = $1
    ORDER BY ordinal_position";

// Key columns come back in constraint order, not attribute order
const CONSTRAINTS_SQL: &str = "
    SELECT c.contype::text,
           ARRAY(SELECT a.attname::text
                 FROM unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord)
                 JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
                 ORDER BY k.ord),
           f.relname::text,
           ARRAY(SELECT a.attname::text
                 FROM unnest(c.confkey) WITH ORDINALITY AS k(attnum, ord)
                 JOIN pg_attribute a ON a.attrelid = c.confrelid AND a.attnum = k.attnum
                 ORDER BY k.ord)
    FROM pg_constraint c
    JOIN pg_class t ON t.oid = c.conrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    LEFT JOIN pg_class f ON f.oid = c.confrelid
    WHERE n.nspname = current_schema() AND t.relname = $1 AND c.contype IN ('p', 'f')";

/// A row of `information_schema.columns`.
#[derive(Debug)]
struct LiveColumn {
    name: String,
    data_type: String,
    udt_name: String,
    nullable: bool,
}

/// A primary or foreign key read from `pg_constraint`.
#[derive(Debug)]
struct LiveConstraint {
    primary: bool,
    columns: Vec<String>,
    foreign_table: Option<String>,
    foreign_columns: Vec<String>,
}

/// `(data_type, udt_name)` as information_schema reports the column type.
fn expected_type(sql_type: SqlType) -> (&'static str, &'static str) {
    match sql_type {
        SqlType::Integer => ("bigint", "int8"),
        SqlType::Real => ("double precision", "float8"),
        SqlType::Boolean => ("boolean", "bool"),
        SqlType::Text => ("text", "text"),
        SqlType::Timestamp => ("timestamp without time zone", "timestamp"),
        SqlType::GeographyPointZ => ("USER-DEFINED", "geography"),
    }
}

fn check_columns(table: &Table, live: &[LiveColumn]) -> Result<()> {
    if live.is_empty() {
        return Err(DbError::SchemaMismatch(format!(
            "table {} does not exist",
            table.name
        )));
    }

    let actual: Vec<&str> = live.iter().map(|c| c.name.as_str()).collect();
    let expected: Vec<&str> = table.columns.iter().map(|c| c.name).collect();
    if actual != expected {
        return Err(DbError::SchemaMismatch(format!(
            "table {} has columns {}, expected {}",
            table.name,
            actual.join(", "),
            expected.join(", ")
        )));
    }

    for (column, found) in table.columns.iter().zip(live) {
        let (data_type, udt_name) = expected_type(column.sql_type);
        if found.data_type != data_type || found.udt_name != udt_name {
            return Err(DbError::SchemaMismatch(format!(
                "column {}.{} has type {} ({}), expected {} ({})",
                table.name, column.name, found.data_type, found.udt_name, data_type, udt_name
            )));
        }
        if found.nullable == column.non_null {
            return Err(DbError::SchemaMismatch(format!(
                "column {}.{} is {}, expected {}",
                table.name,
                column.name,
                nullability(found.nullable),
                nullability(!column.non_null)
            )));
        }
    }
    Ok(())
}

fn nullability(nullable: bool) -> &'static str {
    if nullable {
        "nullable"
    } else {
        "NOT NULL"
    }
}

fn check_constraints(table: &Table, live: &[LiveConstraint]) -> Result<()> {
    let primary_key = live
        .iter()
        .find(|c| c.primary)
        .map(|c| c.columns.join(", "))
        .unwrap_or_default();
    let expected = table.primary_key.join(", ");
    if primary_key != expected {
        return Err(DbError::SchemaMismatch(format!(
            "table {} has primary key ({}), expected ({})",
            table.name, primary_key, expected
        )));
    }

    for fk in table.foreign_keys {
        let found = live.iter().any(|c| {
            !c.primary
                && c.columns == fk.columns
                && c.foreign_table.as_deref() == Some(fk.foreign_table)
                && c.foreign_columns == fk.foreign_columns
        });
        if !found {
            return Err(DbError::SchemaMismatch(format!(
                "table {} is missing foreign key ({}) referencing {}({})",
                table.name,
                fk.columns.join(", "),
                fk.foreign_table,
                fk.foreign_columns.join(", ")
            )));
        }
    }
    Ok(())
}

impl PgDb {
    pub fn open(url: &str, pool_size: u32) -> Result<Self> {
        let config = url
            .parse::<postgres::Config>()
            .map_err(DbError::Postgres)?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder().max_size(pool_size).build(manager)?;
        Ok(Self { pool })
    }

    /// Requires the PostGIS extension to be installable by the connecting role.
    pub fn initialize(&self) -> Result<()> {
        let mut client = self.pool.get()?;
        client.batch_execute(&schema::render(Dialect::Postgres))?;
        Ok(())
    }

    /// Columns with their types and nullability, then the primary key and
    /// foreign keys of each table in the current schema.
    pub fn validate_schema(&self) -> Result<()> {
        let mut client = self.pool.get()?;
        for table in schema::TABLES {
            let columns: Vec<LiveColumn> = client
                .query(COLUMNS_SQL, &[&table.name])?
                .iter()
                .map(|row| -> Result<LiveColumn> {
                    let is_nullable: String = row.try_get(3)?;
                    Ok(LiveColumn {
                        name: row.try_get(0)?,
                        data_type: row.try_get(1)?,
                        udt_name: row.try_get(2)?,
                        nullable: is_nullable == "YES",
                    })
                })
                .collect::<Result<_>>()?;
            check_columns(table, &columns)?;

            let constraints: Vec<LiveConstraint> = client
                .query(CONSTRAINTS_SQL, &[&table.name])?
                .iter()
                .map(|row| -> Result<LiveConstraint> {
                    let kind: String = row.try_get(0)?;
                    Ok(LiveConstraint {
                        primary: kind == "p",
                        columns: row.try_get(1)?,
                        foreign_table: row.try_get(2)?,
                        foreign_columns: row.try_get(3)?,
                    })
                })
                .collect::<Result<_>>()?;
            check_constraints(table, &constraints)?;
        }
        Ok(())
    }

    pub fn insert(&self, table: &Table, values: &[Value]) -> Result<CompositeKey> {
        let params: Vec<Param> = values.iter().map(to_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();

        let mut client = self.pool.get()?;
        let row = client
            .query_one(&table.insert_sql(Dialect::Postgres), &refs)
            .map_err(|e| DbError::from_postgres(table.name, e))?;
        Ok(CompositeKey::new(row.try_get(0)?, row.try_get(1)?))
    }

    pub fn select_by_pair(
        &self,
        table: &Table,
        columns: [&str; 2],
        key: CompositeKey,
    ) -> Result<Vec<Vec<Value>>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            &table.select_by_pair_sql(Dialect::Postgres, columns),
            &[&key.local_id, &key.malette_id],
        )?;
        rows.iter().map(|row| read_row(table, row)).collect()
    }

    pub fn select_all(&self, table: &Table) -> Result<Vec<Vec<Value>>> {
        let mut client = self.pool.get()?;
        let rows = client.query(&table.select_all_sql(Dialect::Postgres), &[])?;
        rows.iter().map(|row| read_row(table, row)).collect()
    }

    pub fn update_pair(
        &self,
        table: &Table,
        row: CompositeKey,
        columns: [&str; 2],
        target: Option<CompositeKey>,
    ) -> Result<usize> {
        let mut client = self.pool.get()?;
        let updated = client
            .execute(
                &table.update_pair_sql(Dialect::Postgres, columns),
                &[
                    &target.map(|k| k.local_id),
                    &target.map(|k| k.malette_id),
                    &row.local_id,
                    &row.malette_id,
                ],
            )
            .map_err(|e| DbError::from_postgres(table.name, e))?;
        Ok(updated as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{LOT, SENSORS};

    fn live_columns(table: &Table) -> Vec<LiveColumn> {
        table
            .columns
            .iter()
            .map(|column| {
                let (data_type, udt_name) = expected_type(column.sql_type);
                LiveColumn {
                    name: column.name.to_string(),
                    data_type: data_type.to_string(),
                    udt_name: udt_name.to_string(),
                    nullable: !column.non_null,
                }
            })
            .collect()
    }

    fn live_constraints(table: &Table) -> Vec<LiveConstraint> {
        let mut constraints = vec![LiveConstraint {
            primary: true,
            columns: table.primary_key.iter().map(|c| c.to_string()).collect(),
            foreign_table: None,
            foreign_columns: Vec::new(),
        }];
        constraints.extend(table.foreign_keys.iter().map(|fk| LiveConstraint {
            primary: false,
            columns: fk.columns.iter().map(|c| c.to_string()).collect(),
            foreign_table: Some(fk.foreign_table.to_string()),
            foreign_columns: fk.foreign_columns.iter().map(|c| c.to_string()).collect(),
        }));
        constraints
    }

    #[test]
    fn test_matching_layout_passes() {
        for table in schema::TABLES {
            check_columns(table, &live_columns(table)).unwrap();
            check_constraints(table, &live_constraints(table)).unwrap();
        }
    }

    #[test]
    fn test_missing_table() {
        let err = check_columns(&LOT, &[]).unwrap_err();
        assert!(err.to_string().contains("table lot does not exist"), "{}", err);
    }

    #[test]
    fn test_column_type_drift() {
        let mut columns = live_columns(&LOT);
        columns[4].data_type = "text".to_string();
        columns[4].udt_name = "text".to_string();
        let err = check_columns(&LOT, &columns).unwrap_err();
        assert!(err.to_string().contains("lot.takenDate has type text"), "{}", err);

        // Geography is only distinguishable through udt_name
        let mut columns = live_columns(&SENSORS);
        columns[2].udt_name = "geometry".to_string();
        assert!(check_columns(&SENSORS, &columns).is_err());
    }

    #[test]
    fn test_nullability_drift() {
        let mut columns = live_columns(&LOT);
        columns[2].nullable = true;
        let err = check_columns(&LOT, &columns).unwrap_err();
        assert!(
            err.to_string()
                .contains("lot.pictures_path is nullable, expected NOT NULL"),
            "{}",
            err
        );

        let mut columns = live_columns(&LOT);
        columns[9].nullable = false;
        assert!(check_columns(&LOT, &columns).is_err());
    }

    #[test]
    fn test_primary_key_order() {
        let mut constraints = live_constraints(&LOT);
        constraints[0].columns.reverse();
        let err = check_constraints(&LOT, &constraints).unwrap_err();
        assert!(
            err.to_string()
                .contains("primary key (id_malette, id_lot), expected (id_lot, id_malette)"),
            "{}",
            err
        );

        let without_primary: Vec<LiveConstraint> = live_constraints(&LOT)
            .into_iter()
            .filter(|c| !c.primary)
            .collect();
        assert!(check_constraints(&LOT, &without_primary).is_err());
    }

    #[test]
    fn test_foreign_key_pairs() {
        // Same columns but crossed against the referenced key
        let mut constraints = live_constraints(&LOT);
        constraints[1].foreign_columns.reverse();
        let err = check_constraints(&LOT, &constraints).unwrap_err();
        assert!(err.to_string().contains("missing foreign key"), "{}", err);

        let mut constraints = live_constraints(&LOT);
        constraints[1].foreign_table = Some("sensors".to_string());
        assert!(check_constraints(&LOT, &constraints).is_err());

        let mut constraints = live_constraints(&LOT);
        constraints.pop();
        assert!(check_constraints(&LOT, &constraints).is_err());
    }
}
