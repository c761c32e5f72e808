//! Tile coordinates and distances.
//!
//! Location ids encode grid coordinates as `"x,y"`.

use crate::EngineError;
use mto_core::LocationId;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;

/// A point on the map grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: Decimal,
    pub y: Decimal,
}

/// Parse a location id of the form `"x,y"` into a point.
pub fn parse_location(id: &LocationId) -> Result<Point, EngineError> {
    let malformed = || EngineError::MalformedLocationId(id.clone());
    let mut parts = id.as_str().split(',');
    let (x, y) = match (parts.next(), parts.next(), parts.next()) {
        (Some(x), Some(y), None) => (x.trim(), y.trim()),
        _ => return Err(malformed()),
    };
    let x = Decimal::from_str(x).map_err(|_| malformed())?;
    let y = Decimal::from_str(y).map_err(|_| malformed())?;
    Ok(Point { x, y })
}

/// Euclidean distance between two points.
pub fn point_distance(a: Point, b: Point) -> Result<Decimal, EngineError> {
    let dx = (a.x - b.x).to_f64().ok_or(EngineError::NonFinite)?;
    let dy = (a.y - b.y).to_f64().ok_or(EngineError::NonFinite)?;
    let d = dx.hypot(dy);
    if !d.is_finite() {
        return Err(EngineError::NonFinite);
    }
    Decimal::from_f64(d).ok_or(EngineError::NonFinite)
}

/// Euclidean distance between two tiles.
pub fn distance(from: &LocationId, to: &LocationId) -> Result<Decimal, EngineError> {
    point_distance(parse_location(from)?, parse_location(to)?)
}
