//! Row checks run before a write reaches the storage engine.
//!
//! SQLite does not enforce declared lengths and reports CHECK failures by
//! constraint name only, so the column rules are evaluated here first and the
//! engine constraints stay as the backstop.

use super::error::{DbError, Result};
use super::key::CompositeKey;
use super::row::Value;
use super::schema::Table;

/// Check one row of `table`, values in column order. The local id column may
/// be null: the engine allocates it. Key and reference ids must not be
/// negative, since external keys could not spell them.
pub fn check_row(table: &Table, values: &[Value]) -> Result<()> {
    if values.len() != table.columns.len() {
        return Err(DbError::SchemaMismatch(format!(
            "{} expects {} values, got {}",
            table.name,
            table.columns.len(),
            values.len()
        )));
    }

    for (column, value) in table.columns.iter().zip(values) {
        if value.sql_type() != column.sql_type {
            return Err(DbError::SchemaMismatch(format!(
                "{}.{} expects {:?}, got {:?}",
                table.name,
                column.name,
                column.sql_type,
                value.sql_type()
            )));
        }

        if value.is_null() {
            if column.non_null && column.name != table.local_id_column() {
                return Err(DbError::NotNullViolation {
                    table: table.name.to_string(),
                    column: column.name.to_string(),
                });
            }
            continue;
        }

        match value {
            Value::Integer(Some(id)) if *id < 0 && is_id_column(table, column.name) => {
                return Err(DbError::NegativeId {
                    table: table.name.to_string(),
                    column: column.name.to_string(),
                    value: *id,
                });
            }
            Value::Text(Some(text)) => {
                if let Some(max) = column.max_length {
                    if text.chars().count() > max {
                        return Err(DbError::LengthViolation {
                            table: table.name.to_string(),
                            column: column.name.to_string(),
                            max,
                        });
                    }
                }
            }
            Value::Point(Some(point)) => point.check()?,
            _ => {}
        }
    }

    for fk in table.foreign_keys.iter().filter(|fk| fk.optional) {
        let [local, malette] = fk.columns.map(|name| {
            table
                .column_index(name)
                .and_then(|index| values[index].as_integer())
        });
        CompositeKey::from_optional_pair(local, malette, table.name, fk.columns)?;
    }

    Ok(())
}

fn is_id_column(table: &Table, name: &str) -> bool {
    table.primary_key.contains(&name)
        || table.foreign_keys.iter().any(|fk| fk.columns.contains(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::geo::GeoPoint;
    use crate::db::schema::{CAMPAIGN, LOT, SENSORS, TILE};
    use chrono::NaiveDate;

    fn lot_row() -> Vec<Value> {
        vec![
            Value::Integer(None),
            Value::Integer(Some(1)),
            Value::Text(Some("/data/lot1".to_string())),
            Value::Integer(Some(0)),
            Value::Timestamp(
                NaiveDate::from_ymd_opt(2018, 6, 1)
                    .and_then(|d| d.and_hms_opt(10, 30, 0)),
            ),
            Value::Integer(Some(0)),
            Value::Integer(Some(1)),
            Value::Integer(Some(0)),
            Value::Integer(Some(1)),
            Value::Integer(None),
            Value::Integer(None),
        ]
    }

    #[test]
    fn test_accepts_row_with_unallocated_local_id() {
        check_row(&LOT, &lot_row()).unwrap();
    }

    #[test]
    fn test_missing_required_column() {
        let mut row = lot_row();
        row[2] = Value::Text(None);
        match check_row(&LOT, &row) {
            Err(DbError::NotNullViolation { table, column }) => {
                assert_eq!(table, "lot");
                assert_eq!(column, "pictures_path");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_length_counts_characters() {
        let at_limit = vec![
            Value::Integer(None),
            Value::Integer(Some(1)),
            Value::Text(Some("é".repeat(50))),
            Value::Text(None),
            Value::Integer(None),
        ];
        check_row(&CAMPAIGN, &at_limit).unwrap();

        let over = vec![
            Value::Integer(None),
            Value::Integer(Some(1)),
            Value::Text(Some("x".repeat(51))),
            Value::Text(None),
            Value::Integer(None),
        ];
        match check_row(&CAMPAIGN, &over) {
            Err(DbError::LengthViolation { column, max, .. }) => {
                assert_eq!(column, "name");
                assert_eq!(max, 50);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tile_extension_limit() {
        let row = vec![
            Value::Integer(None),
            Value::Integer(Some(1)),
            Value::Text(Some("/tiles/params".to_string())),
            Value::Text(Some("/tiles/fallback".to_string())),
            Value::Text(Some("jpeg2k".to_string())),
            Value::Integer(Some(512)),
            Value::Integer(Some(3)),
            Value::Integer(Some(2048)),
            Value::Integer(Some(0)),
            Value::Integer(Some(1)),
        ];
        assert!(matches!(
            check_row(&TILE, &row),
            Err(DbError::LengthViolation { max: 5, .. })
        ));
    }

    #[test]
    fn test_half_set_tile_pair() {
        let mut row = lot_row();
        row[9] = Value::Integer(Some(4));
        assert!(matches!(
            check_row(&LOT, &row),
            Err(DbError::PartialForeignKey { .. })
        ));

        row[10] = Value::Integer(Some(1));
        check_row(&LOT, &row).unwrap();
    }

    #[test]
    fn test_negative_ids_rejected() {
        let mut row = vec![
            Value::Integer(Some(-5)),
            Value::Integer(Some(-2)),
            Value::Text(Some("Survey".to_string())),
            Value::Text(None),
            Value::Integer(None),
        ];
        match check_row(&CAMPAIGN, &row) {
            Err(DbError::NegativeId {
                table,
                column,
                value,
            }) => {
                assert_eq!(table, "campaign");
                assert_eq!(column, "id_campaign");
                assert_eq!(value, -5);
            }
            other => panic!("unexpected {:?}", other),
        }

        row[0] = Value::Integer(Some(5));
        assert!(matches!(
            check_row(&CAMPAIGN, &row),
            Err(DbError::NegativeId { value: -2, .. })
        ));

        let mut row = lot_row();
        row[5] = Value::Integer(Some(-1));
        assert!(matches!(
            check_row(&LOT, &row),
            Err(DbError::NegativeId { ref column, .. }) if column == "id_sensors"
        ));

        // Non-key integers keep their own rules
        let mut row = lot_row();
        row[3] = Value::Integer(Some(-1));
        check_row(&LOT, &row).unwrap();
    }

    #[test]
    fn test_geometry_and_type_checks() {
        let mut row = vec![
            Value::Integer(None),
            Value::Integer(Some(1)),
            Value::Point(Some(GeoPoint::new(2.35, 48.85, 35.0))),
            Value::Real(Some(12.0)),
            Value::Real(Some(30.0)),
        ];
        check_row(&SENSORS, &row).unwrap();

        row[2] = Value::Point(Some(GeoPoint::new(2.35, 148.85, 35.0)));
        assert!(matches!(
            check_row(&SENSORS, &row),
            Err(DbError::InvalidGeometry(_))
        ));

        row[2] = Value::Text(Some("POINT Z (1 2 3)".to_string()));
        assert!(matches!(
            check_row(&SENSORS, &row),
            Err(DbError::SchemaMismatch(_))
        ));
    }
}
