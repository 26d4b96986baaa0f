use std::path::PathBuf;

use tracing::error;

use crate::config::AppConfig;
use crate::data;
use crate::error::Result;
use crate::processing;
use crate::render;
use crate::summary::{self, SummaryTable};

/// What a run produced. The summary exists whenever points were generated,
/// even if the map could not be written.
#[derive(Debug)]
pub struct RunReport {
    pub summary: SummaryTable,
    /// Saved map path, `Ok(None)` when rendering was skipped.
    pub map: Result<Option<PathBuf>>,
}

pub fn run(config: &AppConfig, render_map: bool) -> Result<RunReport> {
    let categories = config.category_list()?;

    // 1. Load and join
    let regions = data::load_data(&config.input, &categories)?;

    // 2. Points per region and category
    let generated = processing::generate_all(&config.sampling, &regions, &categories)?;

    // 3. Flatten and tally
    let (dots, summary) = summary::aggregate(generated, &categories)?;

    // 4. Map image. A failed write is handed back next to the summary.
    let map = if render_map {
        render::render_map(&config.output, &regions, &dots, &categories, config.sampling.seed)
            .and_then(|img| render::save_map(&img, &config.output.dir))
            .map(Some)
    } else {
        Ok(None)
    };
    if let Err(e) = &map {
        error!("{}", e);
    }

    Ok(RunReport { summary, map })
}
