use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::{Coord, LineString, Rect};
use image::{ImageBuffer, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use crate::basemap::{lon_lat_to_mercator, TileLayer};
use crate::config::{OutputConfig, Projection};
use crate::error::{Error, Result};
use crate::font;
use crate::types::{Category, Dot, Region};

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const OUTLINE: Rgba<u8> = Rgba([0, 0, 0, 255]);
const PADDING: f64 = 0.05;
const TITLE_SCALE: u32 = 3;
const LEGEND_SCALE: u32 = 2;
const MARGIN: u32 = 10;

/// Maps projected coordinates (y up) into an image frame with equal x/y scale.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    min_x: f64,
    max_y: f64,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

impl Viewport {
    /// Fit `bounds`, padded on every side, centred in the frame at (`x0`, `y0`) of size `w` x `h`.
    pub fn fit(bounds: Rect<f64>, x0: f64, y0: f64, w: f64, h: f64) -> Self {
        let span_x = if bounds.width() > 0.0 { bounds.width() } else { 1.0 };
        let span_y = if bounds.height() > 0.0 { bounds.height() } else { 1.0 };
        let min_x = bounds.min().x - span_x * PADDING;
        let max_y = bounds.max().y + span_y * PADDING;
        let span_x = span_x * (1.0 + 2.0 * PADDING);
        let span_y = span_y * (1.0 + 2.0 * PADDING);

        let scale = (w / span_x).min(h / span_y);
        Self {
            min_x,
            max_y,
            scale,
            offset_x: x0 + (w - span_x * scale) / 2.0,
            offset_y: y0 + (h - span_y * scale) / 2.0,
        }
    }

    pub fn to_pixel(&self, c: Coord<f64>) -> (f64, f64) {
        (
            self.offset_x + (c.x - self.min_x) * self.scale,
            self.offset_y + (self.max_y - c.y) * self.scale,
        )
    }

    pub fn to_world(&self, px: f64, py: f64) -> (f64, f64) {
        (
            self.min_x + (px - self.offset_x) / self.scale,
            self.max_y - (py - self.offset_y) / self.scale,
        )
    }
}

pub fn project(projection: Projection, c: Coord<f64>) -> Coord<f64> {
    match projection {
        Projection::Planar => c,
        Projection::WebMercator => {
            let (x, y) = lon_lat_to_mercator(c.x, c.y);
            Coord { x, y }
        }
    }
}

/// Draw tract outlines, dots, legend and title into a new image.
pub fn render_map(
    output: &OutputConfig,
    regions: &[Region],
    dots: &[Dot],
    categories: &[Category],
    seed: Option<u64>,
) -> Result<RgbaImage> {
    let (width, height) = (output.width, output.height);
    let mut img: RgbaImage = ImageBuffer::from_pixel(width, height, BACKGROUND);

    let title_band = if output.title.is_empty() {
        0
    } else {
        font::text_height(TITLE_SCALE) + 2 * MARGIN
    };
    let bounds = projected_bounds(output.projection, regions)
        .unwrap_or_else(|| Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }));
    let viewport = Viewport::fit(
        bounds,
        0.0,
        title_band as f64,
        width as f64,
        height.saturating_sub(title_band) as f64,
    );

    if let Some(basemap) = &output.basemap {
        let mut layer = TileLayer::new(basemap);
        layer.paint(&mut img, &viewport);
    }

    for region in regions {
        for poly in &region.geometry {
            draw_ring(&mut img, &viewport, output.projection, poly.exterior());
            for ring in poly.interiors() {
                draw_ring(&mut img, &viewport, output.projection, ring);
            }
        }
    }

    // Random draw order so no category is always on top.
    let mut order: Vec<&Dot> = dots.iter().collect();
    if output.shuffle_draw_order {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        order.shuffle(&mut rng);
    }

    let colors: Vec<[u8; 3]> = categories.iter().map(|c| c.color).collect();
    for dot in order {
        let Some(&color) = colors.get(dot.category) else {
            continue;
        };
        let (px, py) = viewport.to_pixel(project(output.projection, dot.point.0));
        draw_disc(&mut img, px, py, output.marker_radius, color, output.alpha);
    }

    draw_legend(&mut img, categories, output.alpha);
    if !output.title.is_empty() {
        let tw = font::text_width(&output.title, TITLE_SCALE);
        let x = width.saturating_sub(tw) / 2;
        draw_text(&mut img, x, MARGIN, &output.title, [0, 0, 0], TITLE_SCALE);
    }

    info!("Plot generated: {}x{} with {} dots", width, height, dots.len());
    Ok(img)
}

/// `dot_density_map_<YYYYMMDDHHMMSS>.png` under `dir`.
pub fn output_path(dir: &Path, at: DateTime<Local>) -> PathBuf {
    dir.join(format!("dot_density_map_{}.png", at.format("%Y%m%d%H%M%S")))
}

/// Save to a timestamped path. The directory must already exist.
pub fn save_map(img: &RgbaImage, dir: &Path) -> Result<PathBuf> {
    let path = output_path(dir, Local::now());
    if !dir.is_dir() {
        return Err(Error::output_write(&path, "output directory does not exist"));
    }
    img.save(&path).map_err(|e| Error::output_write(&path, e))?;
    info!("Plot saved as {:?}", path);
    Ok(path)
}

fn projected_bounds(projection: Projection, regions: &[Region]) -> Option<Rect<f64>> {
    regions
        .iter()
        .filter_map(|r| r.geometry.bounding_rect())
        .map(|rect| Rect::new(project(projection, rect.min()), project(projection, rect.max())))
        .reduce(|a, b| {
            Rect::new(
                Coord {
                    x: a.min().x.min(b.min().x),
                    y: a.min().y.min(b.min().y),
                },
                Coord {
                    x: a.max().x.max(b.max().x),
                    y: a.max().y.max(b.max().y),
                },
            )
        })
}

fn draw_ring(img: &mut RgbaImage, viewport: &Viewport, projection: Projection, ring: &LineString<f64>) {
    for line in ring.lines() {
        let (x0, y0) = viewport.to_pixel(project(projection, line.start));
        let (x1, y1) = viewport.to_pixel(project(projection, line.end));
        draw_line(img, x0.round() as i64, y0.round() as i64, x1.round() as i64, y1.round() as i64, OUTLINE);
    }
}

// Bresenham; pixels outside the image are dropped.
fn draw_line(img: &mut RgbaImage, mut x0: i64, mut y0: i64, x1: i64, y1: i64, color: Rgba<u8>) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_disc(img: &mut RgbaImage, cx: f64, cy: f64, radius: u32, color: [u8; 3], alpha: f32) {
    let r = radius as i64;
    let (cx, cy) = (cx.floor() as i64, cy.floor() as i64);
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                blend(img, cx + dx, cy + dy, color, alpha);
            }
        }
    }
}

fn draw_legend(img: &mut RgbaImage, categories: &[Category], alpha: f32) {
    if categories.is_empty() {
        return;
    }
    let line_h = font::text_height(LEGEND_SCALE) + 6;
    let swatch = font::text_height(LEGEND_SCALE);
    let label_w = categories
        .iter()
        .map(|c| font::text_width(&c.name, LEGEND_SCALE))
        .max()
        .unwrap_or(0);
    let box_w = 2 * MARGIN + swatch + 6 + label_w;
    let box_h = 2 * MARGIN + line_h * categories.len() as u32 - 6;
    let x0 = img.width().saturating_sub(box_w + MARGIN);
    let y0 = img.height().saturating_sub(box_h + MARGIN);

    for y in y0..(y0 + box_h).min(img.height()) {
        for x in x0..(x0 + box_w).min(img.width()) {
            let edge = y == y0 || x == x0 || y + 1 == y0 + box_h || x + 1 == x0 + box_w;
            if edge {
                put(img, x as i64, y as i64, OUTLINE);
            } else {
                blend(img, x as i64, y as i64, [255, 255, 255], 0.85);
            }
        }
    }

    for (i, cat) in categories.iter().enumerate() {
        let top = y0 + MARGIN + i as u32 * line_h;
        let r = swatch / 2;
        draw_disc(
            img,
            (x0 + MARGIN + r) as f64,
            (top + r) as f64,
            r,
            cat.color,
            alpha.max(0.6),
        );
        draw_text(img, x0 + MARGIN + swatch + 6, top, &cat.name, [0, 0, 0], LEGEND_SCALE);
    }
}

fn draw_text(img: &mut RgbaImage, x: u32, y: u32, text: &str, color: [u8; 3], scale: u32) {
    let c = Rgba([color[0], color[1], color[2], 255]);
    for (dx, dy) in font::lit_pixels(text, scale) {
        put(img, (x + dx) as i64, (y + dy) as i64, c);
    }
}

fn put(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u64) < img.width() as u64 && (y as u64) < img.height() as u64 {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn blend(img: &mut RgbaImage, x: i64, y: i64, color: [u8; 3], alpha: f32) {
    if x < 0 || y < 0 || x as u64 >= img.width() as u64 || y as u64 >= img.height() as u64 {
        return;
    }
    let dst = img.get_pixel_mut(x as u32, y as u32);
    for i in 0..3 {
        let mixed = color[i] as f32 * alpha + dst.0[i] as f32 * (1.0 - alpha);
        dst.0[i] = mixed.round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = 255;
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use geo::{polygon, MultiPolygon, Point};

    use super::*;
    use crate::config::BasemapConfig;

    fn square_region(id: &str, x0: f64, y0: f64, side: f64) -> Region {
        Region {
            id: id.to_string(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: x0, y: y0),
                (x: x0 + side, y: y0),
                (x: x0 + side, y: y0 + side),
                (x: x0, y: y0 + side),
            ]]),
            population: HashMap::new(),
        }
    }

    fn categories() -> Vec<Category> {
        vec![
            Category {
                name: "Hispanic".into(),
                column: "race_hispanic".into(),
                color: [0, 200, 0],
            },
            Category {
                name: "White".into(),
                column: "race_white".into(),
                color: [200, 0, 0],
            },
        ]
    }

    fn plain_output() -> OutputConfig {
        OutputConfig {
            width: 200,
            height: 200,
            title: String::new(),
            alpha: 1.0,
            marker_radius: 1,
            ..OutputConfig::default()
        }
    }

    #[test]
    fn viewport_round_trips_and_keeps_aspect() {
        let bounds = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 5.0 });
        let vp = Viewport::fit(bounds, 0.0, 0.0, 100.0, 100.0);
        let (px, py) = vp.to_pixel(Coord { x: 5.0, y: 2.5 });
        assert!((px - 50.0).abs() < 1e-9 && (py - 50.0).abs() < 1e-9, "centre maps to centre");
        let (x, y) = vp.to_world(px, py);
        assert!((x - 5.0).abs() < 1e-9 && (y - 2.5).abs() < 1e-9);
        // North is up.
        let (_, top) = vp.to_pixel(Coord { x: 0.0, y: 5.0 });
        let (_, bottom) = vp.to_pixel(Coord { x: 0.0, y: 0.0 });
        assert!(top < bottom);
    }

    #[test]
    fn outlines_and_dots_land_in_the_image() {
        let regions = vec![square_region("a", 0.0, 0.0, 10.0)];
        let dots = vec![Dot {
            point: Point::new(5.0, 5.0),
            category: 1,
        }];
        let output = plain_output();
        let img = render_map(&output, &regions, &dots, &categories(), Some(1)).unwrap();

        let bounds = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 10.0 });
        let vp = Viewport::fit(bounds, 0.0, 0.0, 200.0, 200.0);

        let (px, py) = vp.to_pixel(Coord { x: 5.0, y: 5.0 });
        assert_eq!(*img.get_pixel(px as u32, py as u32), Rgba([200, 0, 0, 255]));

        let (ox, oy) = vp.to_pixel(Coord { x: 0.0, y: 5.0 });
        assert_eq!(*img.get_pixel(ox.round() as u32, oy.round() as u32), OUTLINE);

        assert_eq!(*img.get_pixel(1, 1), BACKGROUND);
    }

    #[test]
    fn alpha_blends_with_background() {
        let mut img: RgbaImage = ImageBuffer::from_pixel(3, 3, BACKGROUND);
        blend(&mut img, 1, 1, [0, 0, 0], 0.6);
        assert_eq!(*img.get_pixel(1, 1), Rgba([102, 102, 102, 255]));
        // Off-image writes are ignored.
        blend(&mut img, -1, 7, [0, 0, 0], 1.0);
    }

    #[test]
    fn legend_draws_each_category_swatch() {
        let output = plain_output();
        let img = render_map(&output, &[], &[], &categories(), None).unwrap();
        let has = |rgb: [u8; 3]| img.pixels().any(|p| p.0[..3] == rgb);
        assert!(has([0, 200, 0]));
        assert!(has([200, 0, 0]));
    }

    #[test]
    fn output_path_is_timestamped() {
        use chrono::TimeZone;
        let at = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let path = output_path(Path::new("output"), at);
        assert_eq!(path, PathBuf::from("output/dot_density_map_20240305140709.png"));
    }

    #[test]
    fn save_requires_existing_directory() {
        let img: RgbaImage = ImageBuffer::from_pixel(4, 4, BACKGROUND);
        let err = save_map(&img, Path::new("definitely/missing/dir")).unwrap_err();
        assert!(matches!(err, Error::OutputWrite { .. }));

        let dir = tempfile::tempdir().unwrap();
        let path = save_map(&img, dir.path()).unwrap();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("dot_density_map_") && name.ends_with(".png"));
        assert_eq!(name.len(), "dot_density_map_".len() + 14 + ".png".len());
    }

    #[test]
    fn basemap_tiles_fill_the_background() {
        let tiles = tempfile::tempdir().unwrap();
        // Zoom 1: only the north-west quadrant is available.
        let nw = tiles.path().join("1").join("0");
        std::fs::create_dir_all(&nw).unwrap();
        let blue: RgbaImage = ImageBuffer::from_pixel(8, 8, Rgba([0, 0, 255, 255]));
        blue.save(nw.join("0.png")).unwrap();

        let output = OutputConfig {
            projection: Projection::WebMercator,
            basemap: Some(BasemapConfig {
                tile_dir: tiles.path().to_path_buf(),
                zoom: 1,
            }),
            ..plain_output()
        };
        let regions = vec![square_region("a", -10.0, -10.0, 20.0)];
        let img = render_map(&output, &regions, &[], &[], None).unwrap();

        assert_eq!(*img.get_pixel(1, 1), Rgba([0, 0, 255, 255]), "north-west corner from tile 1/0/0");
        assert_eq!(*img.get_pixel(198, 198), BACKGROUND, "south-east tile is missing");
    }
}
