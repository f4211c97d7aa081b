use anyhow::{Context, Result};
use geo::{Coord, Geometry, LineString, MapCoords, Polygon};
use proj::Proj;

/// EPSG:2180 - PUWG 1992, the planar system used for area computation in Poland.
pub const CRS_POLAND: i32 = 2180;
/// EPSG:4326 - WGS84, used by OSM and for all network queries.
pub const CRS_WGS84: i32 = 4326;

/// Geographic bounding box (west, south, east, north).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        BoundingBox {
            west,
            south,
            east,
            north,
        }
    }

    /// A box is usable only when west < east and south < north.
    pub fn is_valid(&self) -> bool {
        self.west < self.east && self.south < self.north
    }

    /// The box as a closed polygon, for intersection filtering.
    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                Coord {
                    x: self.west,
                    y: self.south,
                },
                Coord {
                    x: self.east,
                    y: self.south,
                },
                Coord {
                    x: self.east,
                    y: self.north,
                },
                Coord {
                    x: self.west,
                    y: self.north,
                },
                Coord {
                    x: self.west,
                    y: self.south,
                },
            ]),
            vec![],
        )
    }
}

/// Build a CRS-to-CRS transformation between two EPSG codes.
pub fn transformer(from_epsg: i32, to_epsg: i32) -> Result<Proj> {
    let from_crs = format!("EPSG:{}", from_epsg);
    let to_crs = format!("EPSG:{}", to_epsg);
    Proj::new_known_crs(&from_crs, &to_crs, None).with_context(|| {
        format!(
            "Failed to create Proj transformation {} -> {}",
            from_crs, to_crs
        )
    })
}

/// Reproject every coordinate of a geometry with the given transformation.
pub fn reproject(geometry: &Geometry<f64>, proj: &Proj) -> Result<Geometry<f64>> {
    geometry
        .try_map_coords(|coord| {
            proj.convert((coord.x, coord.y))
                .map(|(x, y)| Coord { x, y })
        })
        .context("Failed to transform coordinates")
}
