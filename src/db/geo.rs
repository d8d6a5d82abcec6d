//! Three-dimensional WGS-84 positions.
//!
//! Positions are exchanged as EWKT (`SRID=4326;POINT Z (lon lat alt)`). SQLite
//! stores that text as-is; PostGIS parses it into a `GEOGRAPHY(POINTZ, 4326)`
//! column and hands it back through `ST_AsEWKT`, which drops the `Z` tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DbError;

/// SRID 4326 -> WGS 84
pub const WGS84_SRID: i32 = 4326;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    #[serde(default = "default_srid")]
    pub srid: i32,
}

fn default_srid() -> i32 {
    WGS84_SRID
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64, altitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            altitude,
            srid: WGS84_SRID,
        }
    }

    pub fn to_ewkt(&self) -> String {
        self.to_string()
    }

    /// Coordinates must be finite and inside the WGS-84 longitude/latitude
    /// ranges; the SRID must be 4326.
    pub fn check(&self) -> Result<(), DbError> {
        if self.srid != WGS84_SRID {
            return Err(DbError::InvalidGeometry(format!(
                "unsupported SRID {}, expected {}",
                self.srid, WGS84_SRID
            )));
        }
        if !(self.longitude.is_finite() && self.latitude.is_finite() && self.altitude.is_finite())
        {
            return Err(DbError::InvalidGeometry(format!(
                "non-finite coordinate in {}",
                self
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(DbError::InvalidGeometry(format!(
                "coordinate out of range in {}",
                self
            )));
        }
        Ok(())
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SRID={};POINT Z ({} {} {})",
            self.srid, self.longitude, self.latitude, self.altitude
        )
    }
}

impl FromStr for GeoPoint {
    type Err = DbError;

    /// Accepts `SRID=4326;POINT Z (x y z)`, `SRID=4326;POINT(x y z)` and the
    /// same forms without the SRID prefix (4326 assumed).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| DbError::InvalidGeometry(format!("{}: '{}'", why, s));

        let (srid, wkt) = match s.trim().split_once(';') {
            Some((prefix, wkt)) => {
                let srid = prefix
                    .trim()
                    .strip_prefix("SRID=")
                    .and_then(|n| n.parse::<i32>().ok())
                    .ok_or_else(|| invalid("bad SRID prefix"))?;
                (srid, wkt.trim())
            }
            None => (WGS84_SRID, s.trim()),
        };

        let upper = wkt.to_ascii_uppercase();
        let body = upper
            .strip_prefix("POINT")
            .ok_or_else(|| invalid("not a POINT"))?
            .trim_start();
        let body = body.strip_prefix('Z').unwrap_or(body).trim();
        let coords = body
            .strip_prefix('(')
            .and_then(|b| b.strip_suffix(')'))
            .ok_or_else(|| invalid("missing parentheses"))?;

        let values = coords
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("bad coordinate"))?;
        let [longitude, latitude, altitude] = values[..] else {
            return Err(invalid("expected three coordinates"));
        };

        let point = GeoPoint {
            longitude,
            latitude,
            altitude,
            srid,
        };
        point.check()?;
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ewkt_round_trip() {
        let paris = GeoPoint::new(2.3522, 48.8566, 35.0);
        let text = paris.to_ewkt();
        assert_eq!(text, "SRID=4326;POINT Z (2.3522 48.8566 35)");

        let back: GeoPoint = text.parse().unwrap();
        assert_eq!(back.srid, WGS84_SRID);
        assert!((back.longitude - 2.3522).abs() < 1e-9);
        assert!((back.latitude - 48.8566).abs() < 1e-9);
        assert!((back.altitude - 35.0).abs() < 1e-9);
    }

    #[test]
    fn test_parses_postgis_output() {
        let point: GeoPoint = "SRID=4326;POINT(-1.5 47.25 12.75)".parse().unwrap();
        assert_eq!(point, GeoPoint::new(-1.5, 47.25, 12.75));

        let point: GeoPoint = "point z (10 20 30)".parse().unwrap();
        assert_eq!(point.srid, WGS84_SRID);
    }

    #[test]
    fn test_rejects_other_srid_and_2d_points() {
        assert!(matches!(
            "SRID=3857;POINT Z (1 2 3)".parse::<GeoPoint>(),
            Err(DbError::InvalidGeometry(_))
        ));
        assert!(matches!(
            "SRID=4326;POINT (1 2)".parse::<GeoPoint>(),
            Err(DbError::InvalidGeometry(_))
        ));
        assert!(matches!(
            "SRID=4326;LINESTRING (1 2 3, 4 5 6)".parse::<GeoPoint>(),
            Err(DbError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_check_ranges() {
        assert!(GeoPoint::new(181.0, 0.0, 0.0).check().is_err());
        assert!(GeoPoint::new(0.0, -91.0, 0.0).check().is_err());
        assert!(GeoPoint::new(0.0, 0.0, f64::NAN).check().is_err());
        assert!(GeoPoint::new(-180.0, 90.0, -400.0).check().is_ok());
    }
}
