//! Neighbour geometry for directional fire spread.
//!
//! For every cell and every neighbour slot this module precomputes the
//! quantities the spread-rate function needs:
//!
//! - the direction vector from the cell to its neighbour,
//! - the slope-adjusted distance `planar / cos(incline)`,
//! - the sine of the incline angle (positive uphill),
//! - the wind alignment `|w| · cos(angle(w, direction))`.
//!
//! # Conventions
//!
//! Rows grow southward and columns eastward. Direction vectors are
//! `(east, north)`. Wind direction is the heading the wind blows *toward* in
//! degrees clockwise from north, so 90° pushes fire east.
//!
//! The incline is taken from the elevation difference along each link. The
//! slope raster has no aspect and is not read here.
//!
//! Fire spreads faster uphill because flames lean into the fuel upslope
//! (`McArthur` 1967, Rothermel 1972); the incline term carries that effect
//! and its strength is left to calibration.

use crate::error::{FireCaError, Result};
use crate::grid::Covariates;
use nalgebra::Vector2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Offset from a cell to one neighbour, in grid rows and columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Direction {
    /// Row offset (positive = south)
    pub d_row: i32,
    /// Column offset (positive = east)
    pub d_col: i32,
}

impl Direction {
    const fn new(d_row: i32, d_col: i32) -> Self {
        Self { d_row, d_col }
    }

    /// Planar length in cells (1 for cardinal, √2 for diagonal)
    pub fn planar_length(self) -> f64 {
        f64::from(self.d_row).hypot(f64::from(self.d_col))
    }

    /// Unit vector `(east, north)`; zero for the null offset
    pub fn unit_vector(self) -> Vector2<f64> {
        let v = Vector2::new(f64::from(self.d_col), -f64::from(self.d_row));
        let norm = v.norm();
        if norm > 0.0 {
            v / norm
        } else {
            Vector2::zeros()
        }
    }
}

/// N, S, W, E, then NW, NE, SW, SE; consecutive pairs are opposites
const OFFSETS: [Direction; 8] = [
    Direction::new(-1, 0),
    Direction::new(1, 0),
    Direction::new(0, -1),
    Direction::new(0, 1),
    Direction::new(-1, -1),
    Direction::new(-1, 1),
    Direction::new(1, -1),
    Direction::new(1, 1),
];

const OPPOSITE: [usize; 8] = [1, 0, 3, 2, 7, 6, 5, 4];

/// Neighbourhood used for spread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Connectivity {
    /// Von Neumann neighbourhood (cardinal directions)
    Four,
    /// Moore neighbourhood (cardinal and diagonal)
    #[default]
    Eight,
}

impl Connectivity {
    /// Neighbour slots per cell
    pub const fn degree(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Offsets for this neighbourhood, in slot order
    pub fn offsets(self) -> &'static [Direction] {
        &OFFSETS[..self.degree()]
    }

    /// Slot pointing back along `slot`
    pub fn opposite(self, slot: usize) -> usize {
        OPPOSITE[slot]
    }

    /// Build from a neighbour count (4 or 8)
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for any other count.
    pub fn from_degree(degree: usize) -> Result<Self> {
        match degree {
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(FireCaError::config(
                "connectivity",
                format!("{other} neighbours requested, expected 4 or 8"),
            )),
        }
    }
}

/// Geometry of the directed link from a cell to one of its neighbours
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborLink {
    /// Flat index of the neighbour
    pub neighbor: usize,
    /// Grid offset to the neighbour
    pub direction: Direction,
    /// Unit vector `(east, north)` toward the neighbour
    pub unit: Vector2<f64>,
    /// Slope-adjusted distance in meters
    pub adjusted_distance: f64,
    /// Slope-adjusted distance relative to one cell width, minus one
    ///
    /// Zero for a flat cardinal link, `√2 - 1` for a flat diagonal.
    pub distance_excess: f64,
    /// Sine of the incline toward the neighbour (positive uphill)
    pub incline_sin: f64,
    /// Wind speed projected onto the direction (m/s, negative for headwind)
    pub wind_alignment: f64,
}

/// Wind velocity `(east, north)` from speed and heading
pub fn wind_vector(speed: f64, direction_degrees: f64) -> Vector2<f64> {
    let rad = direction_degrees.to_radians();
    Vector2::new(rad.sin(), rad.cos()) * speed
}

/// `|w| · cos(angle(w, d))` for a unit (or zero) direction `d`
///
/// A zero direction or calm wind contributes nothing.
pub fn wind_alignment(wind: &Vector2<f64>, unit_direction: &Vector2<f64>) -> f64 {
    wind.dot(unit_direction)
}

/// Precomputed neighbour links for every cell of a grid
#[derive(Debug, Clone)]
pub struct NeighborGeometry {
    rows: usize,
    cols: usize,
    connectivity: Connectivity,
    cell_size: f64,
    /// `links[cell * degree + slot]`; `None` where the slot leaves the grid
    links: Vec<Option<NeighborLink>>,
}

impl NeighborGeometry {
    /// Compute links from the covariates
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `cell_size` is not a positive finite number.
    pub fn compute(
        covariates: &Covariates,
        connectivity: Connectivity,
        cell_size: f64,
    ) -> Result<Self> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(FireCaError::config(
                "cell_size",
                format!("{cell_size} is not a positive length"),
            ));
        }

        let rows = covariates.rows();
        let cols = covariates.cols();
        let degree = connectivity.degree();
        let elevation = covariates.elevation().as_slice();
        let wind_speed = covariates.wind_speed().as_slice();
        let wind_direction = covariates.wind_direction().as_slice();

        let mut links = vec![None; rows * cols * degree];
        links
            .par_chunks_mut(degree)
            .enumerate()
            .for_each(|(cell, slots)| {
                let row = cell / cols;
                let col = cell % cols;
                let wind = wind_vector(wind_speed[cell], wind_direction[cell]);

                for (slot, &direction) in slots.iter_mut().zip(connectivity.offsets()) {
                    let Some(neighbor) = offset_index(row, col, direction, rows, cols) else {
                        continue;
                    };

                    let planar = direction.planar_length() * cell_size;
                    let rise = elevation[neighbor] - elevation[cell];
                    // planar > 0 so the hypotenuse never vanishes
                    let adjusted_distance = planar.hypot(rise);
                    let unit = direction.unit_vector();

                    *slot = Some(NeighborLink {
                        neighbor,
                        direction,
                        unit,
                        adjusted_distance,
                        distance_excess: adjusted_distance / cell_size - 1.0,
                        incline_sin: rise / adjusted_distance,
                        wind_alignment: wind_alignment(&wind, &unit),
                    });
                }
            });

        Ok(Self {
            rows,
            cols,
            connectivity,
            cell_size,
            links,
        })
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Neighbourhood in use
    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    /// Cell size in meters
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Outgoing links of `cell`, one per slot
    pub fn links(&self, cell: usize) -> &[Option<NeighborLink>] {
        let degree = self.connectivity.degree();
        &self.links[cell * degree..(cell + 1) * degree]
    }

    /// Links pointing *into* `cell`, paired with their source cell
    pub fn incoming(&self, cell: usize) -> impl Iterator<Item = (usize, &NeighborLink)> + '_ {
        let degree = self.connectivity.degree();
        self.links(cell).iter().enumerate().filter_map(move |(slot, out)| {
            let source = out.as_ref()?.neighbor;
            let back = self.connectivity.opposite(slot);
            self.links[source * degree + back]
                .as_ref()
                .map(|link| (source, link))
        })
    }

    /// Number of in-bounds neighbours of `cell`
    pub fn neighbor_count(&self, cell: usize) -> usize {
        self.links(cell).iter().flatten().count()
    }
}

fn offset_index(
    row: usize,
    col: usize,
    direction: Direction,
    rows: usize,
    cols: usize,
) -> Option<usize> {
    let r = row.checked_add_signed(direction.d_row as isize)?;
    let c = col.checked_add_signed(direction.d_col as isize)?;
    (r < rows && c < cols).then_some(r * cols + c)
}
