//! Storage errors.
//!
//! Constraint failures are surfaced as distinct variants whether they are
//! caught by pre-insert validation or reported back by the storage engine.

use thiserror::Error;

use super::schema;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Unique constraint violated on {table}: {detail}")]
    UniqueConstraintViolation { table: String, detail: String },

    #[error("Foreign key constraint violated on {table}: {detail}")]
    ForeignKeyViolation { table: String, detail: String },

    #[error("Not null constraint violated: {table}.{column} is required")]
    NotNullViolation { table: String, column: String },

    #[error("Length constraint violated: {table}.{column} is limited to {max} characters")]
    LengthViolation {
        table: String,
        column: String,
        max: usize,
    },

    #[error("Foreign key pair {table}({columns}) must be entirely set or entirely null")]
    PartialForeignKey { table: String, columns: String },

    #[error("Negative id {value} in {table}.{column}")]
    NegativeId {
        table: String,
        column: String,
        value: i64,
    },

    #[error("No local ids left in {table}")]
    IdSpaceExhausted { table: String },

    #[error("Invalid record key '{0}', expected <local_id>-<malette_id>")]
    InvalidKey(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("No {table} record with key {key}")]
    NotFound { table: String, key: String },

    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    #[error("Malette id unavailable: {0}")]
    Malette(String),

    #[error("Unexpected value in column {column}: {detail}")]
    Decode { column: String, detail: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] postgres::Error),

    #[cfg(feature = "postgres")]
    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// True for the constraint kinds a storage engine can report, plus the
    /// half-set foreign key pair caught before the write.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DbError::UniqueConstraintViolation { .. }
                | DbError::ForeignKeyViolation { .. }
                | DbError::NotNullViolation { .. }
                | DbError::LengthViolation { .. }
                | DbError::PartialForeignKey { .. }
        )
    }

    /// Map a rusqlite failure raised while writing `table` onto the matching
    /// constraint kind. Anything else is wrapped unchanged.
    pub fn from_sqlite(table: &str, err: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        let (code, message) = match &err {
            rusqlite::Error::SqliteFailure(code, message) => {
                (code.extended_code, message.clone().unwrap_or_default())
            }
            _ => return DbError::Sqlite(err),
        };

        // Messages look like "NOT NULL constraint failed: lot.pictures_path"
        let detail = message
            .split_once("failed: ")
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_else(|| message.clone());

        match code {
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
                DbError::UniqueConstraintViolation {
                    table: table.to_string(),
                    detail,
                }
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => DbError::ForeignKeyViolation {
                table: table.to_string(),
                detail,
            },
            ffi::SQLITE_CONSTRAINT_NOTNULL => DbError::NotNullViolation {
                table: table.to_string(),
                column: detail
                    .rsplit_once('.')
                    .map(|(_, column)| column.to_string())
                    .unwrap_or(detail),
            },
            ffi::SQLITE_CONSTRAINT_CHECK => from_check_constraint(table, &detail)
                .unwrap_or(DbError::Sqlite(err)),
            _ => DbError::Sqlite(err),
        }
    }

    /// PostgreSQL flavour of [`DbError::from_sqlite`], keyed on SQLSTATE.
    #[cfg(feature = "postgres")]
    pub fn from_postgres(table: &str, err: postgres::Error) -> Self {
        use postgres::error::SqlState;

        let Some(db_error) = err.as_db_error() else {
            return DbError::Postgres(err);
        };
        let detail = db_error
            .detail()
            .unwrap_or_else(|| db_error.message())
            .to_string();
        let code = db_error.code();

        if code == &SqlState::UNIQUE_VIOLATION {
            DbError::UniqueConstraintViolation {
                table: table.to_string(),
                detail,
            }
        } else if code == &SqlState::FOREIGN_KEY_VIOLATION {
            DbError::ForeignKeyViolation {
                table: table.to_string(),
                detail,
            }
        } else if code == &SqlState::NOT_NULL_VIOLATION {
            DbError::NotNullViolation {
                table: table.to_string(),
                column: db_error.column().unwrap_or("?").to_string(),
            }
        } else if code == &SqlState::CHECK_VIOLATION {
            let constraint = db_error.constraint().unwrap_or_default().to_string();
            from_check_constraint(table, &constraint).unwrap_or(DbError::Postgres(err))
        } else {
            DbError::Postgres(err)
        }
    }
}

/// Resolve a named CHECK constraint back to the column rule it guards.
fn from_check_constraint(table: &str, constraint: &str) -> Option<DbError> {
    let definition = schema::table(table)?;

    if let Some(fk) = definition
        .foreign_keys
        .iter()
        .find(|fk| fk.optional && schema::pair_check_name(definition, fk) == constraint)
    {
        return Some(DbError::PartialForeignKey {
            table: table.to_string(),
            columns: fk.columns.join(", "),
        });
    }

    definition.columns.iter().find_map(|column| {
        let max = column.max_length?;
        (schema::length_check_name(definition, column) == constraint).then(|| {
            DbError::LengthViolation {
                table: table.to_string(),
                column: column.name.to_string(),
                max,
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(extended_code: i32, message: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(extended_code),
            Some(message.to_string()),
        )
    }

    #[test]
    fn test_classifies_sqlite_constraint_codes() {
        let err = DbError::from_sqlite(
            "campaign",
            sqlite_failure(
                rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY,
                "UNIQUE constraint failed: campaign.id_campaign, campaign.id_malette",
            ),
        );
        assert!(matches!(err, DbError::UniqueConstraintViolation { .. }));

        let err = DbError::from_sqlite(
            "lot",
            sqlite_failure(
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
                "FOREIGN KEY constraint failed",
            ),
        );
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));

        let err = DbError::from_sqlite(
            "lot",
            sqlite_failure(
                rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL,
                "NOT NULL constraint failed: lot.pictures_path",
            ),
        );
        match err {
            DbError::NotNullViolation { table, column } => {
                assert_eq!(table, "lot");
                assert_eq!(column, "pictures_path");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classifies_named_check_constraints() {
        let err = DbError::from_sqlite(
            "lot",
            sqlite_failure(
                rusqlite::ffi::SQLITE_CONSTRAINT_CHECK,
                "CHECK constraint failed: lot_id_tile_pair",
            ),
        );
        assert!(matches!(err, DbError::PartialForeignKey { .. }));

        let err = DbError::from_sqlite(
            "tile",
            sqlite_failure(
                rusqlite::ffi::SQLITE_CONSTRAINT_CHECK,
                "CHECK constraint failed: tile_extension_length",
            ),
        );
        match err {
            DbError::LengthViolation { column, max, .. } => {
                assert_eq!(column, "extension");
                assert_eq!(max, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_other_errors_pass_through() {
        let err = DbError::from_sqlite("campaign", rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, DbError::Sqlite(_)));
        assert!(!err.is_constraint_violation());
    }

    #[test]
    fn test_constraint_kinds() {
        let partial = DbError::PartialForeignKey {
            table: "lot".to_string(),
            columns: "id_tile, id_tile_malette".to_string(),
        };
        assert!(partial.is_constraint_violation());

        let negative = DbError::NegativeId {
            table: "campaign".to_string(),
            column: "id_campaign".to_string(),
            value: -5,
        };
        assert!(!negative.is_constraint_violation());
        assert!(!DbError::IdSpaceExhausted {
            table: "campaign".to_string()
        }
        .is_constraint_violation());
    }
}
