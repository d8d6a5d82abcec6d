//! Column values moving between record structs and the backends.

use chrono::NaiveDateTime;
use rusqlite::types::ToSqlOutput;
use rusqlite::ToSql;

use super::error::{DbError, Result};
use super::geo::GeoPoint;
use super::schema::{SqlType, Table};

/// One nullable cell, typed after its column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(Option<i64>),
    Real(Option<f64>),
    Boolean(Option<bool>),
    Text(Option<String>),
    Timestamp(Option<NaiveDateTime>),
    Point(Option<GeoPoint>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        match self {
            Value::Integer(v) => v.is_none(),
            Value::Real(v) => v.is_none(),
            Value::Boolean(v) => v.is_none(),
            Value::Text(v) => v.is_none(),
            Value::Timestamp(v) => v.is_none(),
            Value::Point(v) => v.is_none(),
        }
    }

    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Integer(_) => SqlType::Integer,
            Value::Real(_) => SqlType::Real,
            Value::Boolean(_) => SqlType::Boolean,
            Value::Text(_) => SqlType::Text,
            Value::Timestamp(_) => SqlType::Timestamp,
            Value::Point(_) => SqlType::GeographyPointZ,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => *v,
            _ => None,
        }
    }

    /// Read column `index` of a SQLite row as `sql_type`.
    pub fn from_sqlite(row: &rusqlite::Row<'_>, index: usize, sql_type: SqlType) -> Result<Self> {
        Ok(match sql_type {
            SqlType::Integer => Value::Integer(row.get(index)?),
            SqlType::Real => Value::Real(row.get(index)?),
            SqlType::Boolean => Value::Boolean(row.get(index)?),
            SqlType::Text => Value::Text(row.get(index)?),
            SqlType::Timestamp => Value::Timestamp(row.get(index)?),
            SqlType::GeographyPointZ => {
                let ewkt: Option<String> = row.get(index)?;
                Value::Point(ewkt.map(|text| text.parse()).transpose()?)
            }
        })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Integer(v) => v.to_sql(),
            Value::Real(v) => v.to_sql(),
            Value::Boolean(v) => v.to_sql(),
            Value::Text(v) => v.to_sql(),
            Value::Timestamp(v) => v.to_sql(),
            Value::Point(v) => Ok(match v {
                Some(point) => ToSqlOutput::from(point.to_ewkt()),
                None => ToSqlOutput::from(rusqlite::types::Null),
            }),
        }
    }
}

/// Sequential typed reader over a row's values, in column order.
pub struct Fields {
    table: &'static Table,
    values: std::vec::IntoIter<Value>,
    index: usize,
}

impl Fields {
    pub fn new(table: &'static Table, values: Vec<Value>) -> Result<Self> {
        if values.len() != table.columns.len() {
            return Err(DbError::SchemaMismatch(format!(
                "row of {} has {} values, expected {}",
                table.name,
                values.len(),
                table.columns.len()
            )));
        }
        Ok(Self {
            table,
            values: values.into_iter(),
            index: 0,
        })
    }

    fn next(&mut self) -> Result<(&'static str, Value)> {
        let column = self
            .table
            .columns
            .get(self.index)
            .map(|c| c.name)
            .unwrap_or("?");
        self.index += 1;
        let value = self.values.next().ok_or_else(|| DbError::Decode {
            column: column.to_string(),
            detail: "missing value".to_string(),
        })?;
        Ok((column, value))
    }

    fn mismatch(column: &str, expected: &str, value: &Value) -> DbError {
        DbError::Decode {
            column: column.to_string(),
            detail: format!("expected {}, got {:?}", expected, value),
        }
    }

    fn required<T>(column: &str, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| DbError::Decode {
            column: column.to_string(),
            detail: "unexpected NULL".to_string(),
        })
    }

    pub fn integer(&mut self) -> Result<Option<i64>> {
        match self.next()? {
            (_, Value::Integer(v)) => Ok(v),
            (column, other) => Err(Self::mismatch(column, "integer", &other)),
        }
    }

    pub fn required_integer(&mut self) -> Result<i64> {
        let column = self.current_column();
        let value = self.integer()?;
        Self::required(column, value)
    }

    pub fn real(&mut self) -> Result<Option<f64>> {
        match self.next()? {
            (_, Value::Real(v)) => Ok(v),
            (column, other) => Err(Self::mismatch(column, "real", &other)),
        }
    }

    pub fn boolean(&mut self) -> Result<Option<bool>> {
        match self.next()? {
            (_, Value::Boolean(v)) => Ok(v),
            (column, other) => Err(Self::mismatch(column, "boolean", &other)),
        }
    }

    pub fn required_boolean(&mut self) -> Result<bool> {
        let column = self.current_column();
        let value = self.boolean()?;
        Self::required(column, value)
    }

    pub fn text(&mut self) -> Result<Option<String>> {
        match self.next()? {
            (_, Value::Text(v)) => Ok(v),
            (column, other) => Err(Self::mismatch(column, "text", &other)),
        }
    }

    pub fn required_text(&mut self) -> Result<String> {
        let column = self.current_column();
        let value = self.text()?;
        Self::required(column, value)
    }

    pub fn required_timestamp(&mut self) -> Result<NaiveDateTime> {
        match self.next()? {
            (column, Value::Timestamp(v)) => Self::required(column, v),
            (column, other) => Err(Self::mismatch(column, "timestamp", &other)),
        }
    }

    pub fn point(&mut self) -> Result<Option<GeoPoint>> {
        match self.next()? {
            (_, Value::Point(v)) => Ok(v),
            (column, other) => Err(Self::mismatch(column, "point", &other)),
        }
    }

    fn current_column(&self) -> &'static str {
        self.table
            .columns
            .get(self.index)
            .map(|c| c.name)
            .unwrap_or("?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::CAMPAIGN;

    #[test]
    fn test_fields_read_in_column_order() {
        let mut fields = Fields::new(
            &CAMPAIGN,
            vec![
                Value::Integer(Some(0)),
                Value::Integer(Some(1)),
                Value::Text(Some("Survey A".to_string())),
                Value::Text(None),
                Value::Integer(None),
            ],
        )
        .unwrap();

        assert_eq!(fields.required_integer().unwrap(), 0);
        assert_eq!(fields.required_integer().unwrap(), 1);
        assert_eq!(fields.text().unwrap().as_deref(), Some("Survey A"));
        assert_eq!(fields.text().unwrap(), None);
        assert_eq!(fields.integer().unwrap(), None);
    }

    #[test]
    fn test_fields_report_the_offending_column() {
        let mut fields = Fields::new(
            &CAMPAIGN,
            vec![
                Value::Integer(None),
                Value::Integer(Some(1)),
                Value::Text(None),
                Value::Text(None),
                Value::Integer(None),
            ],
        )
        .unwrap();

        match fields.required_integer() {
            Err(DbError::Decode { column, .. }) => assert_eq!(column, "id_campaign"),
            other => panic!("unexpected {:?}", other),
        }
        match fields.real() {
            Err(DbError::Decode { column, .. }) => assert_eq!(column, "id_malette"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_wrong_arity() {
        assert!(matches!(
            Fields::new(&CAMPAIGN, vec![Value::Integer(Some(0))]),
            Err(DbError::SchemaMismatch(_))
        ));
    }
}
