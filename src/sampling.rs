//! Uniform random points inside a polygon by rejection sampling.
//!
//! Candidates are drawn uniformly over the polygon's bounding box and kept when
//! the polygon strictly contains them (points on the boundary are rejected).
//! Two guards keep the loop finite: polygons whose area is negligible next to
//! their bounding box are refused before any draw, and each accepted point may
//! take at most `max_attempts_per_point` consecutive candidates.
use geo::algorithm::area::Area;
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{MultiPolygon, Point};
use rand::Rng;

use crate::config::SamplingConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PolygonSampler {
    max_attempts_per_point: usize,
    min_area_ratio: f64,
}

impl PolygonSampler {
    pub fn new(config: &SamplingConfig) -> Self {
        Self {
            max_attempts_per_point: config.max_attempts_per_point.max(1),
            min_area_ratio: config.min_area_ratio,
        }
    }

    /// Draw exactly `n` points strictly inside `poly`.
    ///
    /// `region` only labels the error. `n == 0` returns without touching `rng`.
    pub fn sample<R: Rng>(
        &self,
        region: &str,
        poly: &MultiPolygon<f64>,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<Point<f64>>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let area = poly.unsigned_area();
        let degenerate = |attempts| Error::DegeneratePolygon {
            region: region.to_string(),
            area,
            attempts,
        };

        let bbox = poly.bounding_rect().ok_or_else(|| degenerate(0))?;
        let bbox_area = bbox.width() * bbox.height();
        if !(area.is_finite() && bbox_area.is_finite())
            || area <= 0.0
            || area <= bbox_area * self.min_area_ratio
        {
            return Err(degenerate(0));
        }

        let (min, max) = (bbox.min(), bbox.max());
        let mut points = Vec::with_capacity(n);
        while points.len() < n {
            let mut attempts = 0;
            let accepted = loop {
                if attempts == self.max_attempts_per_point {
                    break None;
                }
                attempts += 1;
                let pt = Point::new(rng.gen_range(min.x..=max.x), rng.gen_range(min.y..=max.y));
                if poly.contains(&pt) {
                    break Some(pt);
                }
            };
            match accepted {
                Some(pt) => points.push(pt),
                None => return Err(degenerate(attempts)),
            }
        }

        Ok(points)
    }
}
