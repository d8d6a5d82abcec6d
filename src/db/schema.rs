//! Table definitions for the capture pipeline.
//!
//! Every table is keyed by `(local_id, malette_id)` and every reference to
//! another table is a two-column foreign key on that pair. The definitions
//! below render DDL for SQLite and PostgreSQL/PostGIS and drive row
//! validation, insert/select statements and schema checks.
//!
//! /!\ The order of the primary key columns matters: the external identifier
//!     `"0-1"` resolves to local id 0 of malette 1.

use rusqlite::{params, Connection, OptionalExtension};

use super::error::{DbError, Result};

/// Stored in `PRAGMA user_version` on SQLite.
pub const SCHEMA_VERSION: i64 = 1;

macro_rules! column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // Mutated only when optional field assignments are passed
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                non_null: false,
                max_length: None,
                default_value: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", index),
            Dialect::Postgres => format!("${}", index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Real,
    Boolean,
    Text,
    Timestamp,
    /// Three-dimensional WGS-84 point.
    GeographyPointZ,
}

impl SqlType {
    pub fn render(&self, dialect: Dialect) -> &'static str {
        match (dialect, self) {
            (Dialect::Sqlite, SqlType::Integer | SqlType::Boolean) => "INTEGER",
            (Dialect::Sqlite, SqlType::Real) => "REAL",
            (Dialect::Sqlite, SqlType::Text | SqlType::Timestamp | SqlType::GeographyPointZ) => {
                "TEXT"
            }
            (Dialect::Postgres, SqlType::Integer) => "BIGINT",
            (Dialect::Postgres, SqlType::Real) => "DOUBLE PRECISION",
            (Dialect::Postgres, SqlType::Boolean) => "BOOLEAN",
            (Dialect::Postgres, SqlType::Text) => "TEXT",
            (Dialect::Postgres, SqlType::Timestamp) => "TIMESTAMP",
            (Dialect::Postgres, SqlType::GeographyPointZ) => "GEOGRAPHY(POINTZ, 4326)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Bool(bool),
}

impl DefaultValue {
    fn render(&self, dialect: Dialect) -> &'static str {
        match (dialect, self) {
            (Dialect::Sqlite, DefaultValue::Bool(false)) => "0",
            (Dialect::Sqlite, DefaultValue::Bool(true)) => "1",
            (Dialect::Postgres, DefaultValue::Bool(false)) => "FALSE",
            (Dialect::Postgres, DefaultValue::Bool(true)) => "TRUE",
        }
    }
}

#[derive(Debug)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub non_null: bool,
    /// Upper bound on the character count of a text column.
    pub max_length: Option<usize>,
    pub default_value: Option<DefaultValue>,
}

/// A `(local_id, malette_id)` reference to another table.
#[derive(Debug)]
pub struct ForeignKey {
    pub columns: [&'static str; 2],
    pub foreign_table: &'static str,
    pub foreign_columns: [&'static str; 2],
    /// Both columns null means "no reference".
    pub optional: bool,
}

#[derive(Debug)]
pub struct Table {
    pub name: &'static str,
    /// `[local_id, malette_id]`, in that order.
    pub primary_key: [&'static str; 2],
    /// Primary key columns come first.
    pub columns: &'static [Column],
    pub foreign_keys: &'static [ForeignKey],
    pub indices: &'static [(&'static str, [&'static str; 2])],
}

impl Table {
    pub fn local_id_column(&self) -> &'static str {
        self.primary_key[0]
    }

    pub fn malette_column(&self) -> &'static str {
        self.primary_key[1]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote(c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn column_sql(&self, column: &Column, dialect: Dialect) -> String {
        if dialect == Dialect::Postgres && column.name == self.local_id_column() {
            // The sequence backs local id allocation
            return format!("{} BIGSERIAL", column.name);
        }
        let mut sql = format!("{} {}", quote(column.name), column.sql_type.render(dialect));
        if column.non_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default_value) = column.default_value {
            sql.push_str(&format!(" DEFAULT {}", default_value.render(dialect)));
        }
        sql
    }

    fn foreign_key_sql(&self, fk: &ForeignKey) -> String {
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            fk.columns.join(", "),
            fk.foreign_table,
            fk.foreign_columns.join(", ")
        )
    }

    /// `CREATE TABLE` statement. SQLite gets its foreign keys inline; on
    /// PostgreSQL they are added afterwards because lot and tile reference
    /// each other.
    pub fn create_sql(&self, dialect: Dialect) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|column| self.column_sql(column, dialect))
            .collect();

        parts.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));

        for column in self.columns {
            if let Some(max) = column.max_length {
                parts.push(format!(
                    "CONSTRAINT {} CHECK (length({}) <= {})",
                    length_check_name(self, column),
                    quote(column.name),
                    max
                ));
            }
        }

        for fk in self.foreign_keys.iter().filter(|fk| fk.optional) {
            parts.push(format!(
                "CONSTRAINT {} CHECK (({} IS NULL) = ({} IS NULL))",
                pair_check_name(self, fk),
                fk.columns[0],
                fk.columns[1]
            ));
        }

        if dialect == Dialect::Sqlite {
            for fk in self.foreign_keys {
                parts.push(self.foreign_key_sql(fk));
            }
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            parts.join(",\n    ")
        )
    }

    fn index_sql(&self) -> Vec<String> {
        self.indices
            .iter()
            .map(|(index_name, columns)| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    index_name,
                    self.name,
                    columns.join(", ")
                )
            })
            .collect()
    }

    /// PostgreSQL has no `ADD CONSTRAINT IF NOT EXISTS`.
    fn add_foreign_keys_sql(&self) -> Vec<String> {
        self.foreign_keys
            .iter()
            .map(|fk| {
                let name = foreign_key_name(self, fk);
                format!(
                    "DO $$ BEGIN\n    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = '{name}') THEN\n        ALTER TABLE {table} ADD CONSTRAINT {name} {fk};\n    END IF;\nEND $$",
                    name = name,
                    table = self.name,
                    fk = self.foreign_key_sql(fk),
                )
            })
            .collect()
    }

    /// Insert every column and return the stored key. A null local id is
    /// allocated by the engine within the same statement.
    pub fn insert_sql(&self, dialect: Dialect) -> String {
        let values: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let placeholder = dialect.placeholder(i + 1);
                if column.name == self.local_id_column() {
                    match dialect {
                        // NULL once the id space is used up, so NOT NULL fires
                        Dialect::Sqlite => format!(
                            "COALESCE({p}, (SELECT CASE WHEN MAX({c}) >= {max} THEN NULL \
                             ELSE COALESCE(MAX({c}), 0) + 1 END FROM {t}))",
                            p = placeholder,
                            c = column.name,
                            max = i64::MAX,
                            t = self.name
                        ),
                        Dialect::Postgres => format!(
                            "COALESCE({}, nextval(pg_get_serial_sequence('{}', '{}')))",
                            placeholder, self.name, column.name
                        ),
                    }
                } else if dialect == Dialect::Postgres
                    && column.sql_type == SqlType::GeographyPointZ
                {
                    format!("ST_GeogFromText({})", placeholder)
                } else {
                    placeholder
                }
            })
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}, {}",
            self.name,
            self.column_list(),
            values.join(", "),
            self.local_id_column(),
            self.malette_column()
        )
    }

    /// Select every column, in declaration order.
    pub fn select_sql(&self, dialect: Dialect) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                if dialect == Dialect::Postgres && column.sql_type == SqlType::GeographyPointZ {
                    format!("ST_AsEWKT({})", quote(column.name))
                } else {
                    quote(column.name)
                }
            })
            .collect();
        format!("SELECT {} FROM {}", columns.join(", "), self.name)
    }

    /// Select the rows whose `columns` pair equals the two bound parameters.
    pub fn select_by_pair_sql(&self, dialect: Dialect, columns: [&str; 2]) -> String {
        format!(
            "{} WHERE {} = {} AND {} = {} ORDER BY {}",
            self.select_sql(dialect),
            columns[0],
            dialect.placeholder(1),
            columns[1],
            dialect.placeholder(2),
            self.primary_key.join(", ")
        )
    }

    pub fn select_all_sql(&self, dialect: Dialect) -> String {
        format!(
            "{} ORDER BY {}",
            self.select_sql(dialect),
            self.primary_key.join(", ")
        )
    }

    /// Point the `columns` pair of one row at another key. Parameters: new
    /// local id, new malette id, row local id, row malette id.
    pub fn update_pair_sql(&self, dialect: Dialect, columns: [&str; 2]) -> String {
        format!(
            "UPDATE {} SET {} = {}, {} = {} WHERE {} = {} AND {} = {}",
            self.name,
            columns[0],
            dialect.placeholder(1),
            columns[1],
            dialect.placeholder(2),
            self.local_id_column(),
            dialect.placeholder(3),
            self.malette_column(),
            dialect.placeholder(4)
        )
    }
}

/// Mixed-case names are quoted so PostgreSQL does not fold them to lower case.
pub fn quote(name: &str) -> String {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        format!("\"{}\"", name)
    } else {
        name.to_string()
    }
}

pub fn length_check_name(table: &Table, column: &Column) -> String {
    format!("{}_{}_length", table.name, column.name)
}

pub fn pair_check_name(table: &Table, fk: &ForeignKey) -> String {
    format!("{}_{}_pair", table.name, fk.columns[0])
}

pub fn foreign_key_name(table: &Table, fk: &ForeignKey) -> String {
    format!("{}_{}_fk", table.name, fk.columns[0])
}

pub const CAMPAIGN: Table = Table {
    name: "campaign",
    primary_key: ["id_campaign", "id_malette"],
    columns: &[
        column!("id_campaign", SqlType::Integer, non_null = true),
        column!("id_malette", SqlType::Integer, non_null = true),
        column!("name", SqlType::Text, max_length = Some(50)),
        column!("decription", SqlType::Text, max_length = Some(150)),
        column!("id_rederbro", SqlType::Integer),
    ],
    foreign_keys: &[],
    indices: &[],
};

pub const SENSORS: Table = Table {
    name: "sensors",
    primary_key: ["id_sensors", "id_malette"],
    columns: &[
        column!("id_sensors", SqlType::Integer, non_null = true),
        column!("id_malette", SqlType::Integer, non_null = true),
        column!("gps_pos", SqlType::GeographyPointZ),
        // Compass heading
        column!("degrees", SqlType::Real),
        column!("minutes", SqlType::Real),
    ],
    foreign_keys: &[],
    indices: &[],
};

pub const LOT: Table = Table {
    name: "lot",
    primary_key: ["id_lot", "id_malette"],
    columns: &[
        column!("id_lot", SqlType::Integer, non_null = true),
        column!("id_malette", SqlType::Integer, non_null = true),
        column!("pictures_path", SqlType::Text, non_null = true, max_length = Some(100)),
        column!("goprofailed", SqlType::Integer, non_null = true),
        column!("takenDate", SqlType::Timestamp, non_null = true),
        column!("id_sensors", SqlType::Integer, non_null = true),
        column!("id_sensors_malette", SqlType::Integer, non_null = true),
        column!("id_campaign", SqlType::Integer, non_null = true),
        column!("id_campaign_malette", SqlType::Integer, non_null = true),
        column!("id_tile", SqlType::Integer),
        column!("id_tile_malette", SqlType::Integer),
    ],
    foreign_keys: &[
        ForeignKey {
            columns: ["id_campaign", "id_campaign_malette"],
            foreign_table: "campaign",
            foreign_columns: ["id_campaign", "id_malette"],
            optional: false,
        },
        ForeignKey {
            columns: ["id_sensors", "id_sensors_malette"],
            foreign_table: "sensors",
            foreign_columns: ["id_sensors", "id_malette"],
            optional: false,
        },
        ForeignKey {
            columns: ["id_tile", "id_tile_malette"],
            foreign_table: "tile",
            foreign_columns: ["id_tile", "id_malette"],
            optional: true,
        },
    ],
    indices: &[
        ("idx_lot_campaign", ["id_campaign", "id_campaign_malette"]),
        ("idx_lot_sensors", ["id_sensors", "id_sensors_malette"]),
    ],
};

pub const CP: Table = Table {
    name: "cp",
    primary_key: ["id_cp", "id_malette"],
    columns: &[
        column!("id_cp", SqlType::Integer, non_null = true),
        column!("id_malette", SqlType::Integer, non_null = true),
        column!("search_algo_version", SqlType::Text, non_null = true, max_length = Some(20)),
        column!("nb_cp", SqlType::Integer),
        column!("stichable", SqlType::Boolean),
        column!(
            "optimized",
            SqlType::Boolean,
            non_null = true,
            default_value = Some(DefaultValue::Bool(false))
        ),
        column!("pto_dir", SqlType::Text, non_null = true, max_length = Some(100)),
        column!("id_lot", SqlType::Integer, non_null = true),
        column!("id_lot_malette", SqlType::Integer, non_null = true),
    ],
    foreign_keys: &[ForeignKey {
        columns: ["id_lot", "id_lot_malette"],
        foreign_table: "lot",
        foreign_columns: ["id_lot", "id_malette"],
        optional: false,
    }],
    indices: &[("idx_cp_lot", ["id_lot", "id_lot_malette"])],
};

pub const PANORAMA: Table = Table {
    name: "panorama",
    primary_key: ["id_panorama", "id_malette"],
    columns: &[
        column!("id_panorama", SqlType::Integer, non_null = true),
        column!("id_malette", SqlType::Integer, non_null = true),
        column!("equirectangular_path", SqlType::Text, max_length = Some(100)),
        column!("id_cp", SqlType::Integer, non_null = true),
        column!("id_cp_malette", SqlType::Integer, non_null = true),
    ],
    foreign_keys: &[ForeignKey {
        columns: ["id_cp", "id_cp_malette"],
        foreign_table: "cp",
        foreign_columns: ["id_cp", "id_malette"],
        optional: false,
    }],
    indices: &[("idx_panorama_cp", ["id_cp", "id_cp_malette"])],
};

pub const TILE: Table = Table {
    name: "tile",
    primary_key: ["id_tile", "id_malette"],
    columns: &[
        column!("id_tile", SqlType::Integer, non_null = true),
        column!("id_malette", SqlType::Integer, non_null = true),
        column!("param_location", SqlType::Text, non_null = true, max_length = Some(100)),
        column!("fallback_path", SqlType::Text, non_null = true, max_length = Some(100)),
        column!("extension", SqlType::Text, non_null = true, max_length = Some(5)),
        column!("resolution", SqlType::Integer, non_null = true),
        column!("max_level", SqlType::Integer, non_null = true),
        column!("cube_resolution", SqlType::Integer, non_null = true),
        column!("id_panorama", SqlType::Integer, non_null = true),
        column!("id_panorama_malette", SqlType::Integer, non_null = true),
    ],
    foreign_keys: &[ForeignKey {
        columns: ["id_panorama", "id_panorama_malette"],
        foreign_table: "panorama",
        foreign_columns: ["id_panorama", "id_malette"],
        optional: false,
    }],
    indices: &[("idx_tile_panorama", ["id_panorama", "id_panorama_malette"])],
};

pub const TABLES: &[&Table] = &[&CAMPAIGN, &SENSORS, &LOT, &CP, &PANORAMA, &TILE];

pub fn table(name: &str) -> Option<&'static Table> {
    TABLES.iter().copied().find(|t| t.name == name)
}

/// All statements needed to create the schema on an empty database.
pub fn ddl(dialect: Dialect) -> Vec<String> {
    let mut statements = Vec::new();
    if dialect == Dialect::Postgres {
        statements.push("CREATE EXTENSION IF NOT EXISTS postgis".to_string());
    }
    for table in TABLES {
        statements.push(table.create_sql(dialect));
        statements.extend(table.index_sql());
    }
    if dialect == Dialect::Postgres {
        for table in TABLES {
            statements.extend(table.add_foreign_keys_sql());
        }
    }
    statements
}

/// The DDL as one script, statements terminated by `;`.
pub fn render(dialect: Dialect) -> String {
    ddl(dialect)
        .into_iter()
        .map(|statement| format!("{};\n", statement))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn create(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(DbError::SchemaMismatch(format!(
            "database schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    conn.execute_batch(&render(Dialect::Sqlite))?;
    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), params![])?;
    Ok(())
}

struct ActualColumn {
    name: String,
    sql_type: String,
    non_null: bool,
    default_value: Option<String>,
    primary_key_position: i64,
}

struct ActualForeignKey {
    id: i64,
    to_table: String,
    from_column: String,
    to_column: String,
}

/// Compare a live SQLite database against the declared tables.
pub fn validate(conn: &Connection) -> Result<()> {
    for table in TABLES {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table.name))?;
        let actual_columns: Vec<ActualColumn> = stmt
            .query_map(params![], |row| {
                Ok(ActualColumn {
                    name: row.get(1)?,
                    sql_type: row.get(2)?,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get(4)?,
                    primary_key_position: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        if actual_columns.is_empty() {
            return Err(DbError::SchemaMismatch(format!(
                "table {} does not exist",
                table.name
            )));
        }

        if actual_columns.len() != table.columns.len() {
            return Err(DbError::SchemaMismatch(format!(
                "table {} has {} columns, expected {}. Found column names: {}, expected: {}",
                table.name,
                actual_columns.len(),
                table.columns.len(),
                actual_columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                table.column_list()
            )));
        }

        for (actual, expected) in actual_columns.iter().zip(table.columns.iter()) {
            if actual.name != expected.name {
                return Err(DbError::SchemaMismatch(format!(
                    "table {} column name mismatch: expected {}, got {}",
                    table.name, expected.name, actual.name
                )));
            }
            let expected_type = expected.sql_type.render(Dialect::Sqlite);
            if !actual.sql_type.eq_ignore_ascii_case(expected_type) {
                return Err(DbError::SchemaMismatch(format!(
                    "table {} column {} type mismatch: expected {}, got {}",
                    table.name, expected.name, expected_type, actual.sql_type
                )));
            }
            if actual.non_null != expected.non_null {
                return Err(DbError::SchemaMismatch(format!(
                    "table {} column {} non-null mismatch: expected {}, got {}",
                    table.name, expected.name, expected.non_null, actual.non_null
                )));
            }
            let expected_default = expected
                .default_value
                .map(|d| d.render(Dialect::Sqlite).to_string());
            if actual.default_value != expected_default {
                return Err(DbError::SchemaMismatch(format!(
                    "table {} column {} default value mismatch: expected {:?}, got {:?}",
                    table.name, expected.name, expected_default, actual.default_value
                )));
            }
            let expected_position = table
                .primary_key
                .iter()
                .position(|pk| *pk == expected.name)
                .map(|p| p as i64 + 1)
                .unwrap_or(0);
            if actual.primary_key_position != expected_position {
                return Err(DbError::SchemaMismatch(format!(
                    "table {} column {} primary key position mismatch: expected {}, got {}",
                    table.name, expected.name, expected_position, actual.primary_key_position
                )));
            }
        }

        for (index_name, _columns) in table.indices {
            let index_exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, table.name],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !index_exists {
                return Err(DbError::SchemaMismatch(format!(
                    "table {} is missing index '{}'",
                    table.name, index_name
                )));
            }
        }

        // PRAGMA foreign_key_list: id, seq, table, from, to, on_update, on_delete, match
        let mut fk_stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", table.name))?;
        let mut actual_fks: Vec<ActualForeignKey> = fk_stmt
            .query_map(params![], |row| {
                Ok(ActualForeignKey {
                    id: row.get(0)?,
                    to_table: row.get(2)?,
                    from_column: row.get(3)?,
                    to_column: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        actual_fks.sort_by_key(|fk| fk.id);

        for expected in table.foreign_keys {
            let found = actual_fks
                .iter()
                .filter(|fk| fk.to_table == expected.foreign_table)
                .map(|fk| fk.id)
                .any(|id| {
                    let pairs: Vec<(&str, &str)> = actual_fks
                        .iter()
                        .filter(|fk| fk.id == id)
                        .map(|fk| (fk.from_column.as_str(), fk.to_column.as_str()))
                        .collect();
                    pairs.len() == 2
                        && pairs.contains(&(expected.columns[0], expected.foreign_columns[0]))
                        && pairs.contains(&(expected.columns[1], expected.foreign_columns[1]))
                });
            if !found {
                return Err(DbError::SchemaMismatch(format!(
                    "table {} is missing foreign key ({}) REFERENCES {} ({})",
                    table.name,
                    expected.columns.join(", "),
                    expected.foreign_table,
                    expected.foreign_columns.join(", ")
                )));
            }
        }
    }
    Ok(())
}
