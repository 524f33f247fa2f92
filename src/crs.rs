use crate::error::LoadError;
use geo::{Coord, MapCoords, MultiPolygon, Point};
use proj::Proj;

/// Every record and district is expressed in this CRS after load.
pub const CANONICAL_CRS: &str = "EPSG:4326";

/// Converts source coordinates to canonical lon/lat. Identity when the
/// source already is canonical.
pub struct Reprojector {
    from: String,
    proj: Option<Proj>,
}

impl Reprojector {
    pub fn to_canonical(from: &str) -> Result<Self, LoadError> {
        if from.eq_ignore_ascii_case(CANONICAL_CRS) {
            return Ok(Reprojector {
                from: from.to_string(),
                proj: None,
            });
        }

        // new_known_crs normalizes axis order, so output is (lon, lat).
        let proj = Proj::new_known_crs(from, CANONICAL_CRS, None).map_err(|e| {
            LoadError::Projection {
                from: from.to_string(),
                to: CANONICAL_CRS.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Reprojector {
            from: from.to_string(),
            proj: Some(proj),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.proj.is_none()
    }

    pub fn coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, LoadError> {
        match &self.proj {
            None => Ok(coord),
            Some(proj) => proj
                .convert((coord.x, coord.y))
                .map(|(x, y)| Coord { x, y })
                .map_err(|e| LoadError::Projection {
                    from: self.from.clone(),
                    to: CANONICAL_CRS.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    pub fn point(&self, point: Point<f64>) -> Result<Point<f64>, LoadError> {
        self.coord(point.0).map(Point::from)
    }

    pub fn multi_polygon(&self, mp: MultiPolygon<f64>) -> Result<MultiPolygon<f64>, LoadError> {
        if self.is_identity() {
            return Ok(mp);
        }
        mp.try_map_coords(|c| self.coord(c))
    }
}
