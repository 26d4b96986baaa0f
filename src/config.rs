use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::Error;
use crate::types::Category;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// Tract boundaries, `.shp` or `.json`/`.geojson`.
    pub boundaries: PathBuf,
    pub data_csv: PathBuf,
    #[serde(default = "default_join_column_shape")]
    pub join_column_shape: String,
    #[serde(default = "default_join_column_csv")]
    pub join_column_csv: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CategoryConfig {
    pub name: String,
    pub column: String,
    pub color: String, // Hex code
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplingConfig {
    /// Consecutive rejected candidates tolerated before a polygon is declared degenerate.
    pub max_attempts_per_point: usize,
    pub seed: Option<u64>,
    /// Polygon area over bounding box area below which sampling is refused outright.
    pub min_area_ratio: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_point: 10_000,
            seed: None,
            min_area_ratio: 1e-12,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    #[default]
    Planar,
    WebMercator,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub marker_radius: u32,
    pub alpha: f32,
    pub shuffle_draw_order: bool,
    pub summary_csv: Option<PathBuf>,
    pub projection: Projection,
    pub basemap: Option<BasemapConfig>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            width: 1000,
            height: 1000,
            title: "Dot Density Map of Race/Ethnicity in Galveston County".to_string(),
            marker_radius: 2,
            alpha: 0.6,
            shuffle_draw_order: true,
            summary_csv: None,
            projection: Projection::Planar,
            basemap: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BasemapConfig {
    /// Root of an XYZ tile tree laid out as `{z}/{x}/{y}.png`.
    pub tile_dir: PathBuf,
    pub zoom: u8,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_join_column_shape() -> String {
    "TRT".to_string()
}

fn default_join_column_csv() -> String {
    "census_tract_id".to_string()
}

fn default_categories() -> Vec<CategoryConfig> {
    [
        ("race_hispanic", "#2ca02c"),
        ("race_white", "#d62728"),
        ("race_black", "#ff7f0e"),
        ("race_asian", "#1f77b4"),
    ]
    .into_iter()
    .map(|(column, color)| CategoryConfig {
        name: label_from_column(column),
        column: column.to_string(),
        color: color.to_string(),
    })
    .collect()
}

/// `race_hispanic` -> `Hispanic`: the text after the first underscore, capitalized.
pub fn label_from_column(column: &str) -> String {
    let tail = column.split_once('_').map(|(_, t)| t).unwrap_or(column);
    let mut chars = tail.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.categories.is_empty() {
            return Err(Error::InvalidConfig("at least one category is required".into()));
        }
        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for cat in &self.categories {
            if !names.insert(cat.name.as_str()) {
                return Err(Error::InvalidConfig(format!("duplicate category name '{}'", cat.name)));
            }
            if !columns.insert(cat.column.as_str()) {
                return Err(Error::InvalidConfig(format!("duplicate category column '{}'", cat.column)));
            }
            parse_hex_color(&cat.color)?;
        }
        if self.sampling.max_attempts_per_point == 0 {
            return Err(Error::InvalidConfig("sampling.max_attempts_per_point must be at least 1".into()));
        }
        if !(self.sampling.min_area_ratio >= 0.0 && self.sampling.min_area_ratio < 1.0) {
            return Err(Error::InvalidConfig("sampling.min_area_ratio must lie in [0, 1)".into()));
        }
        if self.output.width == 0 || self.output.height == 0 {
            return Err(Error::InvalidConfig("output image size must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.output.alpha) {
            return Err(Error::InvalidConfig("output.alpha must lie in [0, 1]".into()));
        }
        if self.output.basemap.is_some() && self.output.projection != Projection::WebMercator {
            return Err(Error::InvalidConfig(
                "a basemap requires output.projection = \"web_mercator\"".into(),
            ));
        }
        Ok(())
    }

    /// Categories in configured order, colors resolved.
    pub fn category_list(&self) -> crate::error::Result<Vec<Category>> {
        self.categories
            .iter()
            .map(|c| {
                Ok(Category {
                    name: c.name.clone(),
                    column: c.column.clone(),
                    color: parse_hex_color(&c.color)?,
                })
            })
            .collect()
    }
}

pub fn parse_hex_color(hex: &str) -> crate::error::Result<[u8; 3]> {
    let digits = hex.trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(Error::InvalidConfig(format!("color '{hex}' is not #rrggbb")));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16)
            .map_err(|_| Error::InvalidConfig(format!("color '{hex}' is not #rrggbb")))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [input]
        boundaries = "Tracts.shp"
        data_csv = "Galveston_county_tract.csv"
    "#;

    #[test]
    fn minimal_config_takes_defaults() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.input.join_column_shape, "TRT");
        assert_eq!(config.input.join_column_csv, "census_tract_id");
        let names: Vec<_> = config.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Hispanic", "White", "Black", "Asian"]);
        assert_eq!(config.output.dir, PathBuf::from("output"));
        assert_eq!(config.sampling.max_attempts_per_point, 10_000);
        assert!(config.sampling.seed.is_none());
        assert_eq!(config.output.projection, Projection::Planar);
    }

    #[test]
    fn explicit_sections_override_defaults() {
        let text = r##"
            [input]
            boundaries = "tracts.geojson"
            data_csv = "tracts.csv"
            join_column_shape = "GEOID"

            [[categories]]
            name = "Owners"
            column = "tenure_owner"
            color = "#000000"

            [sampling]
            seed = 7
            max_attempts_per_point = 50

            [output]
            projection = "web_mercator"
            alpha = 1.0

            [output.basemap]
            tile_dir = "tiles"
            zoom = 11
        "##;
        let config: AppConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.sampling.seed, Some(7));
        assert_eq!(config.output.basemap.as_ref().map(|b| b.zoom), Some(11));
        // untouched fields keep defaults
        assert_eq!(config.output.width, 1000);
    }

    #[test]
    fn shipped_config_is_valid() {
        let config: AppConfig = toml::from_str(include_str!("../config.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.category_list().unwrap().len(), 4);
    }

    #[test]
    fn basemap_requires_web_mercator() {
        let mut config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.output.basemap = Some(BasemapConfig {
            tile_dir: "tiles".into(),
            zoom: 10,
        });
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn duplicate_columns_and_bad_colors_are_rejected() {
        let mut config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.categories[1].column = "race_hispanic".into();
        assert!(config.validate().is_err());

        let mut config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.categories[0].color = "green".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn hex_colors_parse_with_or_without_hash() {
        assert_eq!(parse_hex_color("#1f77b4").unwrap(), [0x1f, 0x77, 0xb4]);
        assert_eq!(parse_hex_color("FF0000").unwrap(), [255, 0, 0]);
        assert!(parse_hex_color("#12345").is_err());
    }

    #[test]
    fn labels_follow_column_suffix() {
        assert_eq!(label_from_column("race_hispanic"), "Hispanic");
        assert_eq!(label_from_column("race_WHITE"), "White");
        assert_eq!(label_from_column("asian"), "Asian");
    }
}
