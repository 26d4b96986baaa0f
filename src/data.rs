use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use csv::ReaderBuilder;
use geo::MultiPolygon;
use shapefile::dbase::{FieldValue, Record};
use shapefile::Reader;
use tracing::{debug, info};

use crate::config::InputConfig;
use crate::error::{Error, Result};
use crate::types::{Category, PopulationCell, Region};

/// Tabular rows keyed by their coerced join key.
pub type PopulationTable = HashMap<String, HashMap<String, PopulationCell>>;

/// A boundary record before the join.
#[derive(Debug, Clone)]
pub struct Boundary {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

pub fn load_data(input: &InputConfig, categories: &[Category]) -> Result<Vec<Region>> {
    let table = load_csv_data(&input.data_csv, &input.join_column_csv, categories)?;
    info!("CSV file loaded: {} rows from {:?}", table.len(), input.data_csv);

    let boundaries = load_boundaries(&input.boundaries, &input.join_column_shape)?;
    info!(
        "Spatial dataset loaded: {} boundaries from {:?}",
        boundaries.len(),
        input.boundaries
    );

    let regions = join_regions(table, boundaries);
    info!("Joined tables: {} regions", regions.len());
    Ok(regions)
}

pub fn load_csv_data(path: &Path, join_column: &str, categories: &[Category]) -> Result<PopulationTable> {
    let file = File::open(path).map_err(|e| Error::input_load(path, e))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers().map_err(|e| Error::input_load(path, e))?.clone();

    let join_col_idx = headers
        .iter()
        .position(|h| h.trim() == join_column)
        .ok_or_else(|| Error::input_load(path, format!("join column '{join_column}' not found")))?;

    // Category columns absent from the header simply produce no cell.
    let category_indices: Vec<(&str, usize)> = categories
        .iter()
        .filter_map(|c| {
            headers
                .iter()
                .position(|h| h.trim() == c.column)
                .map(|idx| (c.column.as_str(), idx))
        })
        .collect();
    for cat in categories {
        if !category_indices.iter().any(|(col, _)| *col == cat.column) {
            debug!("CSV has no column '{}' for category '{}'", cat.column, cat.name);
        }
    }

    let mut data_map = HashMap::new();
    for result in rdr.records() {
        let record = result.map_err(|e| Error::input_load(path, e))?;
        let id = normalize_key(record.get(join_col_idx).unwrap_or(""));
        if id.is_empty() {
            continue;
        }

        let cells = category_indices
            .iter()
            .filter_map(|&(col, idx)| record.get(idx).map(|raw| (col.to_string(), PopulationCell::parse(raw))))
            .collect();
        data_map.insert(id, cells);
    }

    Ok(data_map)
}

pub fn load_boundaries(path: &Path, join_column: &str) -> Result<Vec<Boundary>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| Error::input_load(path, "boundary file has no extension"))?;

    match extension.as_str() {
        "shp" => load_shapefile(path, join_column),
        "json" | "geojson" => load_geojson(path, join_column),
        other => Err(Error::input_load(path, format!("unsupported geometry format '{other}'"))),
    }
}

fn load_shapefile(path: &Path, join_column: &str) -> Result<Vec<Boundary>> {
    let mut reader = Reader::from_path(path).map_err(|e| Error::input_load(path, e))?;

    let mut boundaries = Vec::new();
    for (index, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result.map_err(|e| Error::input_load(path, e))?;
        if index == 0 {
            info!("Columns in boundary dataset: {:?}", record_columns(&record));
        }

        let id_value = record
            .get(join_column)
            .ok_or_else(|| Error::input_load(path, format!("join column '{join_column}' not found")))?;
        let id = match shape_key(id_value, join_column)? {
            Some(id) => id,
            None => continue,
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| Error::input_load(path, format!("failed to convert polygon: {e:?}")))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| Error::input_load(path, format!("failed to convert polygonM: {e:?}")))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| Error::input_load(path, format!("failed to convert polygonZ: {e:?}")))?,
            other => {
                debug!("Skipping non-polygon shape {:?} for '{}'", other.shapetype(), id);
                continue;
            }
        };

        boundaries.push(Boundary { id, geometry });
    }

    Ok(boundaries)
}

fn load_geojson(path: &Path, join_column: &str) -> Result<Vec<Boundary>> {
    use geojson::GeoJson;

    let file = File::open(path).map_err(|e| Error::input_load(path, e))?;
    let geojson = GeoJson::from_reader(BufReader::new(file)).map_err(|e| Error::input_load(path, e))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(Error::input_load(path, "GeoJSON must be a FeatureCollection")),
    };

    if let Some(props) = collection.features.first().and_then(|f| f.properties.as_ref()) {
        let columns: Vec<&String> = props.keys().collect();
        info!("Columns in boundary dataset: {:?}", columns);
    }

    let mut boundaries = Vec::new();
    for feature in collection.features {
        let id_val = feature.properties.as_ref().and_then(|props| props.get(join_column));
        let id = match id_val.map(|v| json_key(v, join_column)).transpose()?.flatten() {
            Some(id) => id,
            None => continue,
        };

        let geometry = match feature.geometry {
            Some(geom) => {
                let geom: geo::Geometry<f64> = geom
                    .value
                    .try_into()
                    .map_err(|e| Error::input_load(path, format!("failed to convert geometry: {e:?}")))?;
                match geom {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        debug!("Skipping non-polygon geometry for '{}'", id);
                        continue;
                    }
                }
            }
            None => continue,
        };

        boundaries.push(Boundary { id, geometry });
    }

    Ok(boundaries)
}

/// Inner join on the coerced key. Boundary order is kept; unmatched rows on
/// either side are dropped.
pub fn join_regions(mut table: PopulationTable, boundaries: Vec<Boundary>) -> Vec<Region> {
    let boundary_count = boundaries.len();

    let regions: Vec<Region> = boundaries
        .into_iter()
        .filter_map(|b| {
            table.remove(&b.id).map(|population| Region {
                id: b.id,
                geometry: b.geometry,
                population,
            })
        })
        .collect();

    debug!(
        "Join dropped {} boundaries and {} table rows without a partner",
        boundary_count - regions.len(),
        table.len()
    );
    regions
}

/// Largest magnitude below which every integer is exact in an `f32` (2^24).
const F32_EXACT_LIMIT: f32 = 16_777_216.0;

/// Attribute names of a dBase record, sorted for stable logging.
fn record_columns(record: &Record) -> Vec<&str> {
    let fields: &HashMap<String, FieldValue> = record.as_ref();
    let mut columns: Vec<&str> = fields.keys().map(String::as_str).collect();
    columns.sort_unstable();
    columns
}

fn shape_key(value: &FieldValue, column: &str) -> Result<Option<String>> {
    let key = match value {
        FieldValue::Character(Some(s)) => Some(normalize_key(s)),
        FieldValue::Character(None) | FieldValue::Numeric(None) | FieldValue::Float(None) => None,
        FieldValue::Numeric(Some(f)) => Some(numeric_key(*f)),
        FieldValue::Double(f) => Some(numeric_key(*f)),
        FieldValue::Float(Some(f)) if f.abs() > F32_EXACT_LIMIT => {
            return Err(Error::JoinKeyTypeMismatch {
                column: column.to_string(),
                found: format!("single-precision float ({f}) too large to hold an exact id"),
            })
        }
        FieldValue::Float(Some(f)) => Some(numeric_key(*f as f64)),
        FieldValue::Integer(i) => Some(i.to_string()),
        other => {
            return Err(Error::JoinKeyTypeMismatch {
                column: column.to_string(),
                found: format!("{other:?}"),
            })
        }
    };
    Ok(key.filter(|k| !k.is_empty()))
}

fn json_key(value: &serde_json::Value, column: &str) -> Result<Option<String>> {
    use serde_json::Value;

    let key = match value {
        Value::Null => None,
        Value::String(s) => Some(normalize_key(s)),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => Some(i.to_string()),
            (None, Some(u), _) => Some(u.to_string()),
            (None, None, Some(f)) => Some(numeric_key(f)),
            _ => None,
        },
        other => {
            let found = match other {
                Value::Bool(_) => "boolean",
                Value::Array(_) => "array",
                _ => "object",
            };
            return Err(Error::JoinKeyTypeMismatch {
                column: column.to_string(),
                found: found.to_string(),
            });
        }
    };
    Ok(key.filter(|k| !k.is_empty()))
}

fn numeric_key(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Trims the key and drops an all-zero fractional part (`"7201.0"` -> `"7201"`).
/// Leading zeros are significant and kept.
pub fn normalize_key(raw: &str) -> String {
    let key = raw.trim();
    if let Some((int, frac)) = key.split_once('.') {
        if !int.is_empty()
            && int.bytes().all(|b| b.is_ascii_digit())
            && frac.bytes().all(|b| b == b'0')
        {
            return int.to_string();
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use geo::polygon;
    use tempfile::NamedTempFile;

    use super::*;

    fn categories() -> Vec<Category> {
        ["race_hispanic", "race_white", "race_black", "race_asian"]
            .iter()
            .map(|col| Category {
                name: crate::config::label_from_column(col),
                column: col.to_string(),
                color: [0, 0, 0],
            })
            .collect()
    }

    fn square(id: &str, x: f64) -> Boundary {
        Boundary {
            id: id.to_string(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: x, y: 0.0),
                (x: x + 1.0, y: 0.0),
                (x: x + 1.0, y: 1.0),
                (x: x, y: 1.0),
            ]]),
        }
    }

    fn table(ids: &[&str]) -> PopulationTable {
        ids.iter()
            .map(|id| {
                let cells = HashMap::from([("race_white".to_string(), PopulationCell::Count(3))]);
                (id.to_string(), cells)
            })
            .collect()
    }

    fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn join_keeps_every_row_when_keys_match() {
        let regions = join_regions(table(&["1", "2", "3"]), vec![square("1", 0.0), square("2", 1.0), square("3", 2.0)]);
        assert_eq!(regions.len(), 3);
        let ids: Vec<_> = regions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[test]
    fn join_drops_rows_without_partner() {
        let regions = join_regions(table(&["1", "2", "orphan"]), vec![square("1", 0.0), square("2", 1.0), square("9", 2.0)]);
        let ids: Vec<_> = regions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
    }

    #[test]
    fn keys_normalize_integral_decimals_but_keep_leading_zeros() {
        assert_eq!(normalize_key(" 720100 "), "720100");
        assert_eq!(normalize_key("7201.00"), "7201");
        assert_eq!(normalize_key("0720.5"), "0720.5");
        assert_eq!(normalize_key("007201"), "007201");
        assert_eq!(numeric_key(48167720100.0), "48167720100");
        assert_eq!(numeric_key(12.5), "12.5");
    }

    #[test]
    fn shape_keys_coerce_numbers_and_reject_logicals() {
        assert_eq!(shape_key(&FieldValue::Numeric(Some(7201.0)), "TRT").unwrap(), Some("7201".into()));
        assert_eq!(shape_key(&FieldValue::Integer(42), "TRT").unwrap(), Some("42".into()));
        assert_eq!(shape_key(&FieldValue::Character(None), "TRT").unwrap(), None);
        assert!(matches!(
            shape_key(&FieldValue::Logical(Some(true)), "TRT"),
            Err(Error::JoinKeyTypeMismatch { .. })
        ));
    }

    #[test]
    fn single_precision_keys_beyond_exact_range_are_rejected() {
        assert_eq!(shape_key(&FieldValue::Float(Some(720100.0)), "TRT").unwrap(), Some("720100".into()));
        assert_eq!(
            shape_key(&FieldValue::Float(Some(16_777_216.0)), "TRT").unwrap(),
            Some("16777216".into())
        );
        // an 11-digit GEOID does not survive the trip through f32
        assert!(matches!(
            shape_key(&FieldValue::Float(Some(48167720100.0)), "GEOID"),
            Err(Error::JoinKeyTypeMismatch { ref column, .. }) if column == "GEOID"
        ));
    }

    #[test]
    fn record_columns_are_listed_in_order() {
        let record = Record::from(HashMap::from([
            ("TRT".to_string(), FieldValue::Character(Some("720100".into()))),
            ("AREA".to_string(), FieldValue::Double(1.5)),
            ("NAME".to_string(), FieldValue::Character(None)),
        ]));
        assert_eq!(record_columns(&record), ["AREA", "NAME", "TRT"]);
    }

    #[test]
    fn json_keys_coerce_numbers_and_reject_booleans() {
        use serde_json::json;
        assert_eq!(json_key(&json!(720100), "TRT").unwrap(), Some("720100".into()));
        assert_eq!(json_key(&json!("720100"), "TRT").unwrap(), Some("720100".into()));
        assert_eq!(json_key(&json!(null), "TRT").unwrap(), None);
        assert!(matches!(json_key(&json!(true), "TRT"), Err(Error::JoinKeyTypeMismatch { .. })));
    }

    #[test]
    fn csv_cells_are_parsed_per_category_column() {
        let csv = write_temp(
            ".csv",
            "census_tract_id,race_hispanic,race_white,race_black\n\
             720100,5,n/a,12.0\n\
             ,1,1,1\n",
        );
        let data = load_csv_data(csv.path(), "census_tract_id", &categories()).unwrap();
        assert_eq!(data.len(), 1, "row with empty key is skipped");
        let row = &data["720100"];
        assert_eq!(row["race_hispanic"], PopulationCell::Count(5));
        assert_eq!(row["race_white"], PopulationCell::Unparsed("n/a".into()));
        assert_eq!(row["race_black"], PopulationCell::Count(12));
        assert!(!row.contains_key("race_asian"));
    }

    #[test]
    fn csv_without_join_column_is_an_input_error() {
        let csv = write_temp(".csv", "tract,race_white\n1,2\n");
        let err = load_csv_data(csv.path(), "census_tract_id", &categories()).unwrap_err();
        assert!(matches!(err, Error::InputLoad { .. }));
    }

    #[test]
    fn missing_input_file_is_an_input_error() {
        let err = load_csv_data(Path::new("does/not/exist.csv"), "id", &categories()).unwrap_err();
        assert!(matches!(err, Error::InputLoad { .. }));
        let err = load_boundaries(Path::new("tracts.kml"), "TRT").unwrap_err();
        assert!(matches!(err, Error::InputLoad { .. }));
    }

    #[test]
    fn geojson_boundaries_join_with_csv() {
        let geojson = write_temp(
            ".geojson",
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"TRT":720100},
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
                {"type":"Feature","properties":{"TRT":"720200"},
                 "geometry":{"type":"MultiPolygon","coordinates":[[[[1,0],[2,0],[2,1],[1,1],[1,0]]]]}},
                {"type":"Feature","properties":{"TRT":"999999"},
                 "geometry":{"type":"Point","coordinates":[5,5]}}
            ]}"#,
        );
        let csv = write_temp(
            ".csv",
            "census_tract_id,race_hispanic,race_white,race_black,race_asian\n\
             720100,0,1,50,1000\n\
             720200.0,1,1,1,1\n\
             720300,1,1,1,1\n",
        );
        let input = InputConfig {
            boundaries: geojson.path().to_path_buf(),
            data_csv: csv.path().to_path_buf(),
            join_column_shape: "TRT".into(),
            join_column_csv: "census_tract_id".into(),
        };
        let regions = load_data(&input, &categories()).unwrap();
        let ids: Vec<_> = regions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["720100", "720200"]);
        assert_eq!(regions[0].population["race_asian"], PopulationCell::Count(1000));
        assert_eq!(regions[1].geometry.0.len(), 1);
    }
}
