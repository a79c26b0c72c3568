//! Axis-aligned rectangle algebra over fixed-dimension points.

use crate::error::{Result, SelvaError};
use crate::model::{Point, DIMENSION};

/// Axis-aligned rectangle given by its lower and upper corners.
///
/// A point is represented as the degenerate rectangle whose corners
/// coincide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub lower: Point,
    pub upper: Point,
}

impl Rect {
    pub fn new(lower: Point, upper: Point) -> Self {
        Self { lower, upper }
    }

    /// Rectangle that contains nothing: corners at opposite infinities, so
    /// the first union with any point or rectangle replaces both.
    pub fn empty() -> Self {
        Self {
            lower: [f64::INFINITY; DIMENSION],
            upper: [f64::NEG_INFINITY; DIMENSION],
        }
    }

    pub fn from_point(point: Point) -> Self {
        Self {
            lower: point,
            upper: point,
        }
    }

    /// Whether both corners coincide.
    pub fn is_point(&self) -> bool {
        self.lower == self.upper
    }

    /// Product of the absolute side lengths. Zero for a point.
    pub fn volume(&self) -> f64 {
        self.lower
            .iter()
            .zip(self.upper.iter())
            .map(|(l, u)| (u - l).abs())
            .product()
    }

    /// Smallest rectangle covering both operands.
    pub fn union(&self, other: &Rect) -> Rect {
        let mut lower = self.lower;
        let mut upper = self.upper;
        for i in 0..DIMENSION {
            lower[i] = lower[i].min(other.lower[i]);
            upper[i] = upper[i].max(other.upper[i]);
        }
        Rect { lower, upper }
    }

    pub fn union_point(&self, point: &Point) -> Rect {
        self.union(&Rect::from_point(*point))
    }

    /// Volume growth needed to cover `point`.
    pub fn enlargement(&self, point: &Point) -> f64 {
        self.union_point(point).volume() - self.volume()
    }

    /// Volume wasted by covering both rectangles with a single one.
    pub fn waste(&self, other: &Rect) -> f64 {
        self.union(other).volume() - self.volume() - other.volume()
    }

    /// Euclidean distance from `point` to the rectangle; zero when the
    /// point lies inside, otherwise each coordinate contributes the gap on
    /// its nearer side.
    pub fn min_distance(&self, point: &Point) -> f64 {
        let mut sum = 0.0;
        for i in 0..DIMENSION {
            let gap = if point[i] < self.lower[i] {
                self.lower[i] - point[i]
            } else if point[i] > self.upper[i] {
                point[i] - self.upper[i]
            } else {
                0.0
            };
            sum += gap * gap;
        }
        sum.sqrt()
    }

    pub fn contains_point(&self, point: &Point) -> bool {
        self.min_distance(point) == 0.0
    }
}

/// Checks the coordinate count before fixing a slice into a `Point`.
pub fn point_from(coords: &[f64]) -> Result<Point> {
    <[f64; DIMENSION]>::try_from(coords).map_err(|_| SelvaError::DimensionMismatch {
        expected: DIMENSION,
        got: coords.len(),
    })
}
