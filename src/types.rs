use std::collections::HashMap;

use geo::{MultiPolygon, Point};

/// A census tract after the join: boundary plus the raw per-category cells.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
    // Keyed by CSV column name
    pub population: HashMap<String, PopulationCell>,
}

/// One CSV cell of a category column, parsed as far as possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulationCell {
    Count(u32),
    Unparsed(String),
}

impl PopulationCell {
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();
        if let Ok(n) = text.parse::<u32>() {
            return PopulationCell::Count(n);
        }
        // Float counts ("12.0", "2.5") truncate toward zero.
        match text.parse::<f64>() {
            Ok(f) if f.is_finite() && f >= 0.0 && f.trunc() <= u32::MAX as f64 => {
                PopulationCell::Count(f.trunc() as u32)
            }
            _ => PopulationCell::Unparsed(text.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub name: String,
    pub column: String,
    pub color: [u8; 3],
}

#[derive(Debug, Clone)]
pub struct Dot {
    pub point: Point<f64>,
    pub category: usize, // index into the configured category list
}

/// Every dot of a run, in region then category order.
pub type DotCollection = Vec<Dot>;
