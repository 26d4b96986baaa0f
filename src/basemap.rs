//! Background layer read from a local XYZ tile tree (`{z}/{x}/{y}.png`).
use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::PathBuf;

use image::RgbaImage;
use tracing::{debug, warn};

use crate::config::BasemapConfig;
use crate::render::Viewport;

/// Lon/lat degrees to Web Mercator unit square, y pointing up.
pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = (lon + 180.0) / 360.0;
    let lat_rad = lat.to_radians();
    let y_down = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0;
    (x, 1.0 - y_down)
}

pub struct TileLayer {
    tile_dir: PathBuf,
    zoom: u8,
    tiles: HashMap<(u32, u32), Option<RgbaImage>>,
}

impl TileLayer {
    pub fn new(config: &BasemapConfig) -> Self {
        Self {
            tile_dir: config.tile_dir.clone(),
            zoom: config.zoom,
            tiles: HashMap::new(),
        }
    }

    /// Fill every pixel of `img` that falls on an available tile.
    /// Returns the number of pixels painted.
    pub fn paint(&mut self, img: &mut RgbaImage, viewport: &Viewport) -> usize {
        let n = 2.0_f64.powi(self.zoom as i32);
        let mut painted = 0;

        for py in 0..img.height() {
            for px in 0..img.width() {
                let (x, y_up) = viewport.to_world(px as f64 + 0.5, py as f64 + 0.5);
                let y = 1.0 - y_up;
                if !(0.0..1.0).contains(&x) || !(0.0..1.0).contains(&y) {
                    continue;
                }
                let x_t = x * n;
                let y_t = y * n;
                let (tx, ty) = (x_t as u32, y_t as u32);

                let Some(tile) = self.tile(tx, ty) else {
                    continue;
                };
                let sx = (((x_t - tx as f64) * tile.width() as f64) as u32).min(tile.width() - 1);
                let sy = (((y_t - ty as f64) * tile.height() as f64) as u32).min(tile.height() - 1);
                img.put_pixel(px, py, *tile.get_pixel(sx, sy));
                painted += 1;
            }
        }

        debug!("Basemap painted {} pixels from {} tiles", painted, self.tiles.len());
        painted
    }

    fn tile(&mut self, x: u32, y: u32) -> Option<&RgbaImage> {
        let path = self
            .tile_dir
            .join(self.zoom.to_string())
            .join(x.to_string())
            .join(format!("{}.png", y));
        self.tiles
            .entry((x, y))
            .or_insert_with(|| match image::open(&path) {
                Ok(img) => Some(img.to_rgba8()).filter(|t| t.width() > 0 && t.height() > 0),
                Err(e) => {
                    warn!("Basemap tile {:?} unavailable: {}", path, e);
                    None
                }
            })
            .as_ref()
    }
}
