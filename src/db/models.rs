//! Record types for the six pipeline tables.
//!
//! `New*` drafts mirror a row before it is written: the local id and malette
//! id may be left unset, and every other column is nullable so that missing
//! values surface as [`DbError::NotNullViolation`] at write time. The record
//! structs are rows as read back from storage.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{DbError, Result};
use super::geo::GeoPoint;
use super::key::CompositeKey;
use super::row::{Fields, Value};
use super::schema::{self, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Campaign,
    Sensors,
    Lot,
    Cp,
    Panorama,
    Tile,
}

impl Entity {
    pub const ALL: [Entity; 6] = [
        Entity::Campaign,
        Entity::Sensors,
        Entity::Lot,
        Entity::Cp,
        Entity::Panorama,
        Entity::Tile,
    ];

    pub fn table(&self) -> &'static Table {
        match self {
            Entity::Campaign => &schema::CAMPAIGN,
            Entity::Sensors => &schema::SENSORS,
            Entity::Lot => &schema::LOT,
            Entity::Cp => &schema::CP,
            Entity::Panorama => &schema::PANORAMA,
            Entity::Tile => &schema::TILE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.table().name
    }

    /// Decode a row of this entity's table.
    pub fn decode(&self, values: Vec<Value>) -> Result<Record> {
        Ok(match self {
            Entity::Campaign => Record::Campaign(Campaign::from_values(values)?),
            Entity::Sensors => Record::Sensors(Sensors::from_values(values)?),
            Entity::Lot => Record::Lot(Lot::from_values(values)?),
            Entity::Cp => Record::Cp(Cp::from_values(values)?),
            Entity::Panorama => Record::Panorama(Panorama::from_values(values)?),
            Entity::Tile => Record::Tile(Tile::from_values(values)?),
        })
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Entity {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Entity::ALL
            .into_iter()
            .find(|entity| entity.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DbError::UnknownEntity(s.to_string()))
    }
}

/// Any stored row, tagged with its entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Record {
    Campaign(Campaign),
    Sensors(Sensors),
    Lot(Lot),
    Cp(Cp),
    Panorama(Panorama),
    Tile(Tile),
}

impl Record {
    pub fn key(&self) -> CompositeKey {
        match self {
            Record::Campaign(r) => r.key(),
            Record::Sensors(r) => r.key(),
            Record::Lot(r) => r.key(),
            Record::Cp(r) => r.key(),
            Record::Panorama(r) => r.key(),
            Record::Tile(r) => r.key(),
        }
    }
}

/// A row type read back from storage.
pub trait StoredRecord: Sized {
    const ENTITY: Entity;

    fn from_values(values: Vec<Value>) -> Result<Self>;

    fn key(&self) -> CompositeKey;
}

/// A row about to be written.
pub trait Draft: fmt::Debug {
    type Stored: StoredRecord;

    /// Explicit `(local_id, malette_id)`, either half may be unset.
    fn requested_key(&self) -> (Option<i64>, Option<i64>);

    /// Column values in declaration order, with the resolved malette id.
    fn into_values(self, malette_id: i64) -> Vec<Value>;
}

macro_rules! stored_record {
    ($record:ident, $entity:ident, $local:ident) => {
        impl $record {
            pub fn key(&self) -> CompositeKey {
                CompositeKey::new(self.$local, self.id_malette)
            }
        }

        impl StoredRecord for $record {
            const ENTITY: Entity = Entity::$entity;

            fn from_values(values: Vec<Value>) -> Result<Self> {
                $record::decode(Fields::new(Entity::$entity.table(), values)?)
            }

            fn key(&self) -> CompositeKey {
                $record::key(self)
            }
        }
    };
}

// ============================================================================
// Campaign
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id_campaign: i64,
    pub id_malette: i64,
    pub name: Option<String>,
    #[serde(rename = "decription")]
    pub description: Option<String>,
    /// Reference into the rederbro system.
    pub id_rederbro: Option<i64>,
}

impl Campaign {
    fn decode(mut f: Fields) -> Result<Self> {
        Ok(Self {
            id_campaign: f.required_integer()?,
            id_malette: f.required_integer()?,
            name: f.text()?,
            description: f.text()?,
            id_rederbro: f.integer()?,
        })
    }
}

stored_record!(Campaign, Campaign, id_campaign);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewCampaign {
    pub id_campaign: Option<i64>,
    pub id_malette: Option<i64>,
    pub name: Option<String>,
    #[serde(rename = "decription")]
    pub description: Option<String>,
    pub id_rederbro: Option<i64>,
}

impl NewCampaign {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

impl Draft for NewCampaign {
    type Stored = Campaign;

    fn requested_key(&self) -> (Option<i64>, Option<i64>) {
        (self.id_campaign, self.id_malette)
    }

    fn into_values(self, malette_id: i64) -> Vec<Value> {
        vec![
            Value::Integer(self.id_campaign),
            Value::Integer(Some(malette_id)),
            Value::Text(self.name),
            Value::Text(self.description),
            Value::Integer(self.id_rederbro),
        ]
    }
}

// ============================================================================
// Sensors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensors {
    pub id_sensors: i64,
    pub id_malette: i64,
    pub gps_pos: Option<GeoPoint>,
    /// Compass heading, degrees part.
    pub degrees: Option<f64>,
    /// Compass heading, minutes part.
    pub minutes: Option<f64>,
}

impl Sensors {
    fn decode(mut f: Fields) -> Result<Self> {
        Ok(Self {
            id_sensors: f.required_integer()?,
            id_malette: f.required_integer()?,
            gps_pos: f.point()?,
            degrees: f.real()?,
            minutes: f.real()?,
        })
    }
}

stored_record!(Sensors, Sensors, id_sensors);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewSensors {
    pub id_sensors: Option<i64>,
    pub id_malette: Option<i64>,
    pub gps_pos: Option<GeoPoint>,
    pub degrees: Option<f64>,
    pub minutes: Option<f64>,
}

impl NewSensors {
    pub fn at(position: GeoPoint, degrees: f64, minutes: f64) -> Self {
        Self {
            gps_pos: Some(position),
            degrees: Some(degrees),
            minutes: Some(minutes),
            ..Default::default()
        }
    }
}

impl Draft for NewSensors {
    type Stored = Sensors;

    fn requested_key(&self) -> (Option<i64>, Option<i64>) {
        (self.id_sensors, self.id_malette)
    }

    fn into_values(self, malette_id: i64) -> Vec<Value> {
        vec![
            Value::Integer(self.id_sensors),
            Value::Integer(Some(malette_id)),
            Value::Point(self.gps_pos),
            Value::Real(self.degrees),
            Value::Real(self.minutes),
        ]
    }
}

// ============================================================================
// Lot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id_lot: i64,
    pub id_malette: i64,
    pub pictures_path: String,
    /// Number of GoPro cameras that failed during the capture.
    pub goprofailed: i64,
    #[serde(rename = "takenDate")]
    pub taken_date: NaiveDateTime,
    pub id_sensors: i64,
    pub id_sensors_malette: i64,
    pub id_campaign: i64,
    pub id_campaign_malette: i64,
    pub id_tile: Option<i64>,
    pub id_tile_malette: Option<i64>,
}

impl Lot {
    fn decode(mut f: Fields) -> Result<Self> {
        Ok(Self {
            id_lot: f.required_integer()?,
            id_malette: f.required_integer()?,
            pictures_path: f.required_text()?,
            goprofailed: f.required_integer()?,
            taken_date: f.required_timestamp()?,
            id_sensors: f.required_integer()?,
            id_sensors_malette: f.required_integer()?,
            id_campaign: f.required_integer()?,
            id_campaign_malette: f.required_integer()?,
            id_tile: f.integer()?,
            id_tile_malette: f.integer()?,
        })
    }

    pub fn campaign_key(&self) -> CompositeKey {
        CompositeKey::new(self.id_campaign, self.id_campaign_malette)
    }

    pub fn sensors_key(&self) -> CompositeKey {
        CompositeKey::new(self.id_sensors, self.id_sensors_malette)
    }

    pub fn tile_key(&self) -> Result<Option<CompositeKey>> {
        CompositeKey::from_optional_pair(
            self.id_tile,
            self.id_tile_malette,
            schema::LOT.name,
            ["id_tile", "id_tile_malette"],
        )
    }
}

stored_record!(Lot, Lot, id_lot);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewLot {
    pub id_lot: Option<i64>,
    pub id_malette: Option<i64>,
    pub pictures_path: Option<String>,
    pub goprofailed: Option<i64>,
    #[serde(rename = "takenDate")]
    pub taken_date: Option<NaiveDateTime>,
    pub id_sensors: Option<i64>,
    pub id_sensors_malette: Option<i64>,
    pub id_campaign: Option<i64>,
    pub id_campaign_malette: Option<i64>,
    pub id_tile: Option<i64>,
    pub id_tile_malette: Option<i64>,
}

impl NewLot {
    pub fn new(
        pictures_path: impl Into<String>,
        goprofailed: i64,
        taken_date: NaiveDateTime,
        campaign: CompositeKey,
        sensors: CompositeKey,
    ) -> Self {
        Self {
            pictures_path: Some(pictures_path.into()),
            goprofailed: Some(goprofailed),
            taken_date: Some(taken_date),
            id_sensors: Some(sensors.local_id),
            id_sensors_malette: Some(sensors.malette_id),
            id_campaign: Some(campaign.local_id),
            id_campaign_malette: Some(campaign.malette_id),
            ..Default::default()
        }
    }

    pub fn with_tile(mut self, tile: CompositeKey) -> Self {
        self.id_tile = Some(tile.local_id);
        self.id_tile_malette = Some(tile.malette_id);
        self
    }
}

impl Draft for NewLot {
    type Stored = Lot;

    fn requested_key(&self) -> (Option<i64>, Option<i64>) {
        (self.id_lot, self.id_malette)
    }

    fn into_values(self, malette_id: i64) -> Vec<Value> {
        vec![
            Value::Integer(self.id_lot),
            Value::Integer(Some(malette_id)),
            Value::Text(self.pictures_path),
            Value::Integer(self.goprofailed),
            Value::Timestamp(self.taken_date),
            Value::Integer(self.id_sensors),
            Value::Integer(self.id_sensors_malette),
            Value::Integer(self.id_campaign),
            Value::Integer(self.id_campaign_malette),
            Value::Integer(self.id_tile),
            Value::Integer(self.id_tile_malette),
        ]
    }
}

// ============================================================================
// Cp (control points)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cp {
    pub id_cp: i64,
    pub id_malette: i64,
    pub search_algo_version: String,
    pub nb_cp: Option<i64>,
    #[serde(rename = "stichable")]
    pub stitchable: Option<bool>,
    pub optimized: bool,
    /// Directory holding the Hugin project file.
    pub pto_dir: String,
    pub id_lot: i64,
    pub id_lot_malette: i64,
}

impl Cp {
    fn decode(mut f: Fields) -> Result<Self> {
        Ok(Self {
            id_cp: f.required_integer()?,
            id_malette: f.required_integer()?,
            search_algo_version: f.required_text()?,
            nb_cp: f.integer()?,
            stitchable: f.boolean()?,
            optimized: f.required_boolean()?,
            pto_dir: f.required_text()?,
            id_lot: f.required_integer()?,
            id_lot_malette: f.required_integer()?,
        })
    }

    pub fn lot_key(&self) -> CompositeKey {
        CompositeKey::new(self.id_lot, self.id_lot_malette)
    }
}

stored_record!(Cp, Cp, id_cp);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewCp {
    pub id_cp: Option<i64>,
    pub id_malette: Option<i64>,
    pub search_algo_version: Option<String>,
    pub nb_cp: Option<i64>,
    #[serde(rename = "stichable")]
    pub stitchable: Option<bool>,
    /// Unset means false.
    pub optimized: Option<bool>,
    pub pto_dir: Option<String>,
    pub id_lot: Option<i64>,
    pub id_lot_malette: Option<i64>,
}

impl NewCp {
    pub fn new(
        search_algo_version: impl Into<String>,
        pto_dir: impl Into<String>,
        lot: CompositeKey,
    ) -> Self {
        Self {
            search_algo_version: Some(search_algo_version.into()),
            pto_dir: Some(pto_dir.into()),
            id_lot: Some(lot.local_id),
            id_lot_malette: Some(lot.malette_id),
            ..Default::default()
        }
    }
}

impl Draft for NewCp {
    type Stored = Cp;

    fn requested_key(&self) -> (Option<i64>, Option<i64>) {
        (self.id_cp, self.id_malette)
    }

    fn into_values(self, malette_id: i64) -> Vec<Value> {
        vec![
            Value::Integer(self.id_cp),
            Value::Integer(Some(malette_id)),
            Value::Text(self.search_algo_version),
            Value::Integer(self.nb_cp),
            Value::Boolean(self.stitchable),
            Value::Boolean(Some(self.optimized.unwrap_or(false))),
            Value::Text(self.pto_dir),
            Value::Integer(self.id_lot),
            Value::Integer(self.id_lot_malette),
        ]
    }
}

// ============================================================================
// Panorama
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panorama {
    pub id_panorama: i64,
    pub id_malette: i64,
    pub equirectangular_path: Option<String>,
    pub id_cp: i64,
    pub id_cp_malette: i64,
}

impl Panorama {
    fn decode(mut f: Fields) -> Result<Self> {
        Ok(Self {
            id_panorama: f.required_integer()?,
            id_malette: f.required_integer()?,
            equirectangular_path: f.text()?,
            id_cp: f.required_integer()?,
            id_cp_malette: f.required_integer()?,
        })
    }

    pub fn cp_key(&self) -> CompositeKey {
        CompositeKey::new(self.id_cp, self.id_cp_malette)
    }
}

stored_record!(Panorama, Panorama, id_panorama);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewPanorama {
    pub id_panorama: Option<i64>,
    pub id_malette: Option<i64>,
    pub equirectangular_path: Option<String>,
    pub id_cp: Option<i64>,
    pub id_cp_malette: Option<i64>,
}

impl NewPanorama {
    pub fn new(equirectangular_path: impl Into<String>, cp: CompositeKey) -> Self {
        Self {
            equirectangular_path: Some(equirectangular_path.into()),
            id_cp: Some(cp.local_id),
            id_cp_malette: Some(cp.malette_id),
            ..Default::default()
        }
    }
}

impl Draft for NewPanorama {
    type Stored = Panorama;

    fn requested_key(&self) -> (Option<i64>, Option<i64>) {
        (self.id_panorama, self.id_malette)
    }

    fn into_values(self, malette_id: i64) -> Vec<Value> {
        vec![
            Value::Integer(self.id_panorama),
            Value::Integer(Some(malette_id)),
            Value::Text(self.equirectangular_path),
            Value::Integer(self.id_cp),
            Value::Integer(self.id_cp_malette),
        ]
    }
}

// ============================================================================
// Tile
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub id_tile: i64,
    pub id_malette: i64,
    pub param_location: String,
    pub fallback_path: String,
    pub extension: String,
    pub resolution: i64,
    pub max_level: i64,
    pub cube_resolution: i64,
    pub id_panorama: i64,
    pub id_panorama_malette: i64,
}

impl Tile {
    fn decode(mut f: Fields) -> Result<Self> {
        Ok(Self {
            id_tile: f.required_integer()?,
            id_malette: f.required_integer()?,
            param_location: f.required_text()?,
            fallback_path: f.required_text()?,
            extension: f.required_text()?,
            resolution: f.required_integer()?,
            max_level: f.required_integer()?,
            cube_resolution: f.required_integer()?,
            id_panorama: f.required_integer()?,
            id_panorama_malette: f.required_integer()?,
        })
    }

    pub fn panorama_key(&self) -> CompositeKey {
        CompositeKey::new(self.id_panorama, self.id_panorama_malette)
    }
}

stored_record!(Tile, Tile, id_tile);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTile {
    pub id_tile: Option<i64>,
    pub id_malette: Option<i64>,
    pub param_location: Option<String>,
    pub fallback_path: Option<String>,
    pub extension: Option<String>,
    pub resolution: Option<i64>,
    pub max_level: Option<i64>,
    pub cube_resolution: Option<i64>,
    pub id_panorama: Option<i64>,
    pub id_panorama_malette: Option<i64>,
}

impl Draft for NewTile {
    type Stored = Tile;

    fn requested_key(&self) -> (Option<i64>, Option<i64>) {
        (self.id_tile, self.id_malette)
    }

    fn into_values(self, malette_id: i64) -> Vec<Value> {
        vec![
            Value::Integer(self.id_tile),
            Value::Integer(Some(malette_id)),
            Value::Text(self.param_location),
            Value::Text(self.fallback_path),
            Value::Text(self.extension),
            Value::Integer(self.resolution),
            Value::Integer(self.max_level),
            Value::Integer(self.cube_resolution),
            Value::Integer(self.id_panorama),
            Value::Integer(self.id_panorama_malette),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_names_match_tables() {
        for entity in Entity::ALL {
            assert_eq!(entity.as_str().parse::<Entity>().unwrap(), entity);
        }
        assert_eq!("CAMPAIGN".parse::<Entity>().unwrap(), Entity::Campaign);
        assert!(matches!(
            "photo".parse::<Entity>(),
            Err(DbError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_draft_values_follow_column_order() {
        let drafts: Vec<(Entity, Vec<Value>)> = vec![
            (Entity::Campaign, NewCampaign::default().into_values(1)),
            (Entity::Sensors, NewSensors::default().into_values(1)),
            (Entity::Lot, NewLot::default().into_values(1)),
            (Entity::Cp, NewCp::default().into_values(1)),
            (Entity::Panorama, NewPanorama::default().into_values(1)),
            (Entity::Tile, NewTile::default().into_values(1)),
        ];
        for (entity, values) in drafts {
            let table = entity.table();
            assert_eq!(values.len(), table.columns.len(), "{}", entity);
            for (value, column) in values.iter().zip(table.columns) {
                assert_eq!(value.sql_type(), column.sql_type, "{}.{}", entity, column.name);
            }
            assert_eq!(values[1], Value::Integer(Some(1)));
        }
    }

    #[test]
    fn test_cp_optimized_defaults_to_false() {
        let values = NewCp::new("v1", "/pto", CompositeKey::new(1, 1)).into_values(1);
        assert_eq!(values[5], Value::Boolean(Some(false)));
    }

    #[test]
    fn test_draft_json_uses_column_names() {
        let draft: NewLot = serde_json::from_str(
            r#"{"pictures_path": "/data/lot1", "goprofailed": 0,
                "takenDate": "2018-06-01T10:30:00",
                "id_campaign": 0, "id_campaign_malette": 1,
                "id_sensors": 3, "id_sensors_malette": 1}"#,
        )
        .unwrap();
        assert_eq!(draft.id_campaign, Some(0));
        assert_eq!(draft.id_tile, None);
        assert_eq!(draft.requested_key(), (None, None));

        // JSON keys follow the stored column names
        let campaign: NewCampaign =
            serde_json::from_str(r#"{"name": "Survey A", "decription": "coastline"}"#).unwrap();
        assert_eq!(campaign.description.as_deref(), Some("coastline"));

        let unknown = serde_json::from_str::<NewCampaign>(r#"{"description": "coastline"}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_record_serializes_with_entity_tag() {
        let record = Record::Campaign(Campaign {
            id_campaign: 0,
            id_malette: 1,
            name: Some("Survey A".to_string()),
            description: None,
            id_rederbro: None,
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["entity"], "campaign");
        assert_eq!(json["name"], "Survey A");
        assert!(json["decription"].is_null());
        assert!(json.get("description").is_none());
        assert_eq!(record.key().to_string(), "0-1");
    }
}
