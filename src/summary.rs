use std::fmt;
use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::processing::RegionPoints;
use crate::types::{Category, Dot, DotCollection};

pub const REGION_HEADER: &str = "Census Tract ID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub region: String,
    /// Generated point counts, in configured category order.
    pub counts: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryTable {
    pub categories: Vec<String>,
    pub rows: Vec<SummaryRow>,
}

/// Flattens per-region points into one labelled collection and tallies the
/// per-region counts. Each tally is checked against the count the points were
/// generated for; any disagreement fails the aggregation.
pub fn aggregate(generated: Vec<RegionPoints>, categories: &[Category]) -> Result<(DotCollection, SummaryTable)> {
    let total: usize = generated
        .iter()
        .flat_map(|rp| rp.categories.iter().map(|cp| cp.points.len()))
        .sum();
    let mut dots: DotCollection = Vec::with_capacity(total);
    let mut rows = Vec::with_capacity(generated.len());

    for rp in generated {
        let mut counts = vec![0usize; categories.len()];
        for cp in rp.categories {
            let Some(category) = categories.get(cp.category) else {
                return Err(Error::InvalidConfig(format!(
                    "region '{}' has points for unknown category index {}",
                    rp.region, cp.category
                )));
            };
            if cp.points.len() != cp.commanded as usize {
                return Err(Error::CountMismatch {
                    region: rp.region.clone(),
                    category: category.name.clone(),
                    expected: cp.commanded,
                    actual: cp.points.len(),
                });
            }
            counts[cp.category] += cp.points.len();
            dots.extend(cp.points.into_iter().map(|point| Dot {
                point,
                category: cp.category,
            }));
        }
        rows.push(SummaryRow {
            region: rp.region,
            counts,
        });
    }

    info!("All points combined: {} dots across {} regions", dots.len(), rows.len());

    let summary = SummaryTable {
        categories: categories.iter().map(|c| c.name.clone()).collect(),
        rows,
    };
    Ok((dots, summary))
}

impl SummaryTable {
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path).map_err(|e| Error::output_write(path, e))?;
        let header = std::iter::once(REGION_HEADER).chain(self.categories.iter().map(String::as_str));
        wtr.write_record(header).map_err(|e| Error::output_write(path, e))?;
        for row in &self.rows {
            let record = std::iter::once(row.region.clone()).chain(row.counts.iter().map(|c| c.to_string()));
            wtr.write_record(record).map_err(|e| Error::output_write(path, e))?;
        }
        wtr.flush().map_err(|e| Error::output_write(path, e))?;
        Ok(())
    }
}

/// Right-aligned plain text table, no index column.
impl fmt::Display for SummaryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths: Vec<usize> = std::iter::once(REGION_HEADER.len())
            .chain(self.categories.iter().map(|c| c.len()))
            .collect();
        for row in &self.rows {
            widths[0] = widths[0].max(row.region.len());
            for (i, count) in row.counts.iter().enumerate() {
                widths[i + 1] = widths[i + 1].max(count.to_string().len());
            }
        }

        write!(f, "{:>w$}", REGION_HEADER, w = widths[0])?;
        for (name, w) in self.categories.iter().zip(&widths[1..]) {
            write!(f, "  {:>w$}", name, w = *w)?;
        }
        for row in &self.rows {
            writeln!(f)?;
            write!(f, "{:>w$}", row.region, w = widths[0])?;
            for (count, w) in row.counts.iter().zip(&widths[1..]) {
                write!(f, "  {:>w$}", count, w = *w)?;
            }
        }
        Ok(())
    }
}
