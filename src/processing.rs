use geo::Point;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::SamplingConfig;
use crate::error::{Error, Result};
use crate::sampling::PolygonSampler;
use crate::types::{Category, PopulationCell, Region};

/// Points generated for one category of one region.
#[derive(Debug, Clone)]
pub struct CategoryPoints {
    pub category: usize,
    /// Population count the points were generated for.
    pub commanded: u32,
    pub points: Vec<Point<f64>>,
}

/// Every category's points for one region, in configured category order.
#[derive(Debug, Clone)]
pub struct RegionPoints {
    pub region: String,
    pub categories: Vec<CategoryPoints>,
}

/// Samples one (region, category) pair from the region's population cell.
pub struct CategoryPointGenerator<'a> {
    sampler: &'a PolygonSampler,
}

impl<'a> CategoryPointGenerator<'a> {
    pub fn new(sampler: &'a PolygonSampler) -> Self {
        Self { sampler }
    }

    pub fn generate<R: Rng>(
        &self,
        region: &Region,
        category_index: usize,
        category: &Category,
        rng: &mut R,
    ) -> Result<CategoryPoints> {
        let commanded = population(region, category)?;
        let points = self
            .sampler
            .sample(&region.id, &region.geometry, commanded as usize, rng)?;
        Ok(CategoryPoints {
            category: category_index,
            commanded,
            points,
        })
    }
}

/// The region's count for `category`; absent or unparsable cells are errors, never zero.
pub fn population(region: &Region, category: &Category) -> Result<u32> {
    match region.population.get(&category.column) {
        Some(PopulationCell::Count(n)) => Ok(*n),
        Some(PopulationCell::Unparsed(raw)) => Err(Error::MissingPopulation {
            region: region.id.clone(),
            category: category.name.clone(),
            value: Some(raw.clone()),
        }),
        None => Err(Error::MissingPopulation {
            region: region.id.clone(),
            category: category.name.clone(),
            value: None,
        }),
    }
}

/// Generate points for every (region, category) pair. The first failure fails the whole run.
pub fn generate_all(
    config: &SamplingConfig,
    regions: &[Region],
    categories: &[Category],
) -> Result<Vec<RegionPoints>> {
    let run_seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
    debug!("Sampling with run seed {}", run_seed);

    let sampler = PolygonSampler::new(config);
    let generator = CategoryPointGenerator::new(&sampler);

    info!(
        "Generating points for {} regions x {} categories...",
        regions.len(),
        categories.len()
    );

    let generated: Vec<RegionPoints> = regions
        .par_iter()
        .enumerate()
        .map(|(r, region)| -> Result<RegionPoints> {
            let per_category = categories
                .iter()
                .enumerate()
                .map(|(c, category)| {
                    let mut rng = StdRng::seed_from_u64(seed_for_pair(run_seed, r, c));
                    generator.generate(region, c, category, &mut rng)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(RegionPoints {
                region: region.id.clone(),
                categories: per_category,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    for (c, category) in categories.iter().enumerate() {
        let total: usize = generated
            .iter()
            .map(|rp| rp.categories[c].points.len())
            .sum();
        info!("Points generated for {}: {}", category.name, total);
    }

    Ok(generated)
}

/// Independent stream seed for one (region, category) pair, stable under any scheduling.
pub fn seed_for_pair(run_seed: u64, region: usize, category: usize) -> u64 {
    let r = region as u64;
    let c = category as u64;
    mix_u64(run_seed ^ r.wrapping_mul(0x9E3779B97F4A7C15) ^ c.wrapping_mul(0xBF58476D1CE4E5B9))
}

#[inline]
fn mix_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58476D1CE4E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}
