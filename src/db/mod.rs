pub mod error;
pub mod geo;
pub mod key;
pub mod models;
pub mod row;
pub mod schema;
pub mod sqlite;
pub mod validate;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{DbError, Result};
pub use geo::GeoPoint;
pub use key::CompositeKey;
pub use models::{
    Campaign, Cp, Draft, Entity, Lot, NewCampaign, NewCp, NewLot, NewPanorama, NewSensors,
    NewTile, Panorama, Record, Sensors, StoredRecord, Tile,
};
pub use schema::Dialect;

use crate::config::{DatabaseConfig, DatabaseType};
use crate::malette::MaletteIdSource;
use row::Value;

const LOT_TILE: [&str; 2] = ["id_tile", "id_tile_malette"];
const LOT_CAMPAIGN: [&str; 2] = ["id_campaign", "id_campaign_malette"];

/// Macro to dispatch a method call to the active backend variant.
macro_rules! dispatch {
    // No arguments beyond self
    ($self:expr, $method:ident()) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method(),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method(),
        }
    };
    // With arguments
    ($self:expr, $method:ident($($arg:expr),+ $(,)?)) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method($($arg),+),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method($($arg),+),
        }
    };
}

enum DatabaseInner {
    Sqlite(sqlite::SqliteDb),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgDb),
}

pub struct Database {
    inner: DatabaseInner,
    malette: Box<dyn MaletteIdSource>,
}

impl Database {
    /// Open a database connection based on the provided configuration.
    /// `malette` supplies the malette id of records created without one.
    pub fn open(config: &DatabaseConfig, malette: Box<dyn MaletteIdSource>) -> Result<Self> {
        if config.backend == DatabaseType::Postgresql {
            #[cfg(feature = "postgres")]
            {
                let url = config.postgresql_url.as_deref().ok_or_else(|| {
                    DbError::Unsupported("PostgreSQL URL not configured".to_string())
                })?;
                let pool_size = config.pool_size.unwrap_or(10);
                let pg = postgres::PgDb::open(url, pool_size)?;
                tracing::info!(pool_size, "Opened PostgreSQL database");
                return Ok(Self {
                    inner: DatabaseInner::Postgres(pg),
                    malette,
                });
            }
            #[cfg(not(feature = "postgres"))]
            return Err(DbError::Unsupported(
                "PostgreSQL backend requires the `postgres` feature".to_string(),
            ));
        }

        let db = sqlite::SqliteDb::open(&config.sqlite_path)?;
        tracing::info!(path = %config.sqlite_path.display(), "Opened SQLite database");
        Ok(Self {
            inner: DatabaseInner::Sqlite(db),
            malette,
        })
    }

    pub fn open_sqlite_in_memory(malette: Box<dyn MaletteIdSource>) -> Result<Self> {
        Ok(Self {
            inner: DatabaseInner::Sqlite(sqlite::SqliteDb::open_in_memory()?),
            malette,
        })
    }

    pub fn initialize(&self) -> Result<()> {
        dispatch!(self, initialize())
    }

    pub fn validate_schema(&self) -> Result<()> {
        dispatch!(self, validate_schema())
    }

    // ========================================================================
    // Inserts
    // ========================================================================

    fn insert<D: Draft>(&self, draft: D) -> Result<D::Stored> {
        let table = D::Stored::ENTITY.table();

        let malette_id = match draft.requested_key() {
            (_, Some(malette_id)) => malette_id,
            (_, None) => self.malette.current_malette_id()?,
        };
        let mut values = draft.into_values(malette_id);
        validate::check_row(table, &values)?;

        let key = dispatch!(self, insert(table, &values))?;
        tracing::debug!(table = table.name, %key, "Inserted record");

        values[0] = Value::Integer(Some(key.local_id));
        values[1] = Value::Integer(Some(key.malette_id));
        D::Stored::from_values(values)
    }

    pub fn create_campaign(&self, draft: NewCampaign) -> Result<Campaign> {
        self.insert(draft)
    }

    pub fn create_sensors(&self, draft: NewSensors) -> Result<Sensors> {
        tracing::debug!(?draft, "Creating sensors record");
        let sensors = self.insert(draft)?;
        tracing::debug!(?sensors, "Created sensors record");
        Ok(sensors)
    }

    pub fn create_lot(&self, draft: NewLot) -> Result<Lot> {
        self.insert(draft)
    }

    pub fn create_cp(&self, draft: NewCp) -> Result<Cp> {
        self.insert(draft)
    }

    pub fn create_panorama(&self, draft: NewPanorama) -> Result<Panorama> {
        self.insert(draft)
    }

    pub fn create_tile(&self, draft: NewTile) -> Result<Tile> {
        self.insert(draft)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    fn find<R: StoredRecord>(&self, key: CompositeKey) -> Result<Option<R>> {
        let table = R::ENTITY.table();
        let rows = dispatch!(self, select_by_pair(table, table.primary_key, key))?;
        rows.into_iter().next().map(R::from_values).transpose()
    }

    pub fn get_campaign(&self, key: CompositeKey) -> Result<Option<Campaign>> {
        self.find(key)
    }

    pub fn get_sensors(&self, key: CompositeKey) -> Result<Option<Sensors>> {
        self.find(key)
    }

    pub fn get_lot(&self, key: CompositeKey) -> Result<Option<Lot>> {
        self.find(key)
    }

    pub fn get_cp(&self, key: CompositeKey) -> Result<Option<Cp>> {
        self.find(key)
    }

    pub fn get_panorama(&self, key: CompositeKey) -> Result<Option<Panorama>> {
        self.find(key)
    }

    pub fn get_tile(&self, key: CompositeKey) -> Result<Option<Tile>> {
        self.find(key)
    }

    pub fn get(&self, entity: Entity, key: CompositeKey) -> Result<Option<Record>> {
        let table = entity.table();
        let rows = dispatch!(self, select_by_pair(table, table.primary_key, key))?;
        rows.into_iter().next().map(|row| entity.decode(row)).transpose()
    }

    /// Resolve an external `"<local_id>-<malette_id>"` identifier.
    pub fn lookup(&self, entity: Entity, id: &str) -> Result<Option<Record>> {
        let key: CompositeKey = id.parse()?;
        self.get(entity, key)
    }

    /// Every row of `entity`, ordered by `(local_id, malette_id)`.
    pub fn list(&self, entity: Entity) -> Result<Vec<Record>> {
        let rows = dispatch!(self, select_all(entity.table()))?;
        rows.into_iter().map(|row| entity.decode(row)).collect()
    }

    pub fn lots_for_campaign(&self, campaign: CompositeKey) -> Result<Vec<Lot>> {
        let rows = dispatch!(self, select_by_pair(&schema::LOT, LOT_CAMPAIGN, campaign))?;
        rows.into_iter().map(Lot::from_values).collect()
    }

    // ========================================================================
    // Lot/tile link
    // ========================================================================

    /// Point a lot at its tile, or clear the link with `None`. The tile is
    /// created after the lot it derives from, so this is the only update.
    pub fn assign_tile_to_lot(&self, lot: CompositeKey, tile: Option<CompositeKey>) -> Result<Lot> {
        let updated = dispatch!(self, update_pair(&schema::LOT, lot, LOT_TILE, tile))?;
        if updated == 0 {
            return Err(DbError::NotFound {
                table: schema::LOT.name.to_string(),
                key: lot.to_string(),
            });
        }
        tracing::debug!(%lot, tile = ?tile.map(|k| k.to_string()), "Assigned tile to lot");

        self.get_lot(lot)?.ok_or_else(|| DbError::NotFound {
            table: schema::LOT.name.to_string(),
            key: lot.to_string(),
        })
    }
}
