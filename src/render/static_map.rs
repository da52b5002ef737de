//! Static world map: Robinson projection, equal-interval classes, labelled largest shapes.

use geo::{Area, Coord, Geometry, InteriorPoint, MapCoords, MultiPolygon};
use geojson::{Feature, GeoJson};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{human_format, titlecase, JoinedTable, TOP_N};
use crate::aggregate::Metric;

pub const IMAGE_SIZE: (u32, u32) = (1600, 1000);

/// Number of color classes
pub const CLASSES: usize = 9;

/// Shapes that get a name and value label, largest projected area first
const LABELLED_SHAPES: usize = 25;

const FONT: &str = "sans-serif";

// OrRd, 9 classes
const PALETTE: [RGBColor; CLASSES] = [
    RGBColor(0xff, 0xf7, 0xec),
    RGBColor(0xfe, 0xe8, 0xc8),
    RGBColor(0xfd, 0xd4, 0x9e),
    RGBColor(0xfd, 0xbb, 0x84),
    RGBColor(0xfc, 0x8d, 0x59),
    RGBColor(0xef, 0x65, 0x48),
    RGBColor(0xd7, 0x30, 0x1f),
    RGBColor(0xb3, 0x00, 0x00),
    RGBColor(0x7f, 0x00, 0x00),
];
const WATER: RGBColor = RGBColor(0x87, 0xce, 0xfa);
const MISSING: RGBColor = RGBColor(0xd3, 0xd3, 0xd3);
const MISSING_EDGE: RGBColor = RGBColor(0xff, 0x00, 0x00);

pub const MISSING_LABEL: &str = "No values recorded";

const PANEL: ((i32, i32), (i32, i32)) = ((40, 80), (1560, 960));

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot read shapes from {path}: {source}")]
    ShapesIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("shape file must be a GeoJSON FeatureCollection")]
    NotFeatureCollection,

    #[error("{} is an ESRI shapefile; convert it first: ogr2ogr -f GeoJSON countries.geojson {}", .0.display(), .0.display())]
    Shapefile(PathBuf),

    #[error("unsupported image format {0:?}; use jpg, png or svg")]
    UnsupportedFormat(String),

    #[error("drawing failed: {0}")]
    Draw(String),
}

// Robinson table at 5 degree latitude steps: parallel length and distance from equator
const ROBINSON_X: [f64; 19] = [
    1.0000, 0.9986, 0.9954, 0.9900, 0.9822, 0.9730, 0.9600, 0.9427, 0.9216, 0.8962, 0.8679,
    0.8350, 0.7986, 0.7597, 0.7186, 0.6732, 0.6213, 0.5722, 0.5322,
];
const ROBINSON_Y: [f64; 19] = [
    0.0000, 0.0620, 0.1240, 0.1860, 0.2480, 0.3100, 0.3720, 0.4340, 0.4958, 0.5571, 0.6176,
    0.6769, 0.7346, 0.7903, 0.8435, 0.8936, 0.9394, 0.9761, 1.0000,
];
const ROBINSON_XSCALE: f64 = 0.8487;
const ROBINSON_YSCALE: f64 = 1.3523;

/// Project longitude/latitude in degrees onto the unit-sphere Robinson plane.
pub fn robinson(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-90.0, 90.0);
    let step = lat.abs() / 5.0;
    let i = (step.floor() as usize).min(ROBINSON_X.len() - 2);
    let t = step - i as f64;
    let x_factor = ROBINSON_X[i] + (ROBINSON_X[i + 1] - ROBINSON_X[i]) * t;
    let y_factor = ROBINSON_Y[i] + (ROBINSON_Y[i + 1] - ROBINSON_Y[i]) * t;

    let x = ROBINSON_XSCALE * x_factor * lon.clamp(-180.0, 180.0).to_radians();
    let y = ROBINSON_YSCALE * y_factor * lat.signum();
    (x, y)
}

/// One country shape, already projected
#[derive(Debug, Clone)]
pub struct Shape {
    pub iso3: String,
    pub name: String,
    geometry: MultiPolygon<f64>,
    area: f64,
    anchor: Option<Coord<f64>>,
}

impl Shape {
    pub fn area(&self) -> f64 {
        self.area
    }
}

/// Country boundaries keyed by alpha-3 code.
#[derive(Debug, Clone, Default)]
pub struct ShapeSet {
    shapes: Vec<Shape>,
}

impl ShapeSet {
    pub fn load(path: &Path) -> Result<Self, RenderError> {
        let is_shp = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("shp"));
        if is_shp {
            return Err(RenderError::Shapefile(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| RenderError::ShapesIo {
            path: path.to_path_buf(),
            source,
        })?;
        let shapes = Self::from_geojson_str(&text)?;
        debug!("Loaded {} shapes from {}", shapes.len(), path.display());
        Ok(shapes)
    }

    /// Parse a FeatureCollection. Features without a polygon geometry or a usable code
    /// are skipped.
    pub fn from_geojson_str(text: &str) -> Result<Self, RenderError> {
        let collection = match text.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(fc) => fc,
            _ => return Err(RenderError::NotFeatureCollection),
        };

        let mut shapes: Vec<Shape> = collection
            .features
            .iter()
            .filter_map(shape_from_feature)
            .collect();
        // Large shapes first so enclaves stay visible
        shapes.sort_by(|a, b| b.area.total_cmp(&a.area));
        Ok(ShapeSet { shapes })
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.iter()
    }
}

fn feature_code(feature: &Feature) -> Option<String> {
    ["ISO_A3", "ADM0_A3"]
        .iter()
        .filter_map(|key| feature.property(key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|code| !code.is_empty() && *code != "-99")
        .map(str::to_uppercase)
}

fn shape_from_feature(feature: &Feature) -> Option<Shape> {
    let iso3 = feature_code(feature)?;
    let geometry = feature.geometry.as_ref()?;
    let polygons = match Geometry::<f64>::try_from(&geometry.value).ok()? {
        Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        Geometry::MultiPolygon(mp) => mp,
        _ => return None,
    };
    let name = feature
        .property("NAME")
        .and_then(|v| v.as_str())
        .unwrap_or(&iso3)
        .to_string();

    let projected = polygons.map_coords(|c| {
        let (x, y) = robinson(c.x, c.y);
        Coord { x, y }
    });
    let area = projected.unsigned_area();
    let anchor = projected.interior_point().map(|p| p.0);

    Some(Shape {
        iso3,
        name,
        geometry: projected,
        area,
        anchor,
    })
}

/// Equal-interval classification between the smallest and largest value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classes {
    min: f64,
    max: f64,
    k: usize,
}

impl Classes {
    /// `None` when there are no values
    pub fn equal_interval(values: impl IntoIterator<Item = u64>, k: usize) -> Option<Self> {
        let mut iter = values.into_iter();
        let first = iter.next()? as f64;
        let (min, max) = iter.fold((first, first), |(lo, hi), v| {
            let v = v as f64;
            (lo.min(v), hi.max(v))
        });
        Some(Classes {
            min,
            max,
            k: k.max(1),
        })
    }

    fn width(&self) -> f64 {
        (self.max - self.min) / self.k as f64
    }

    /// Index of the class holding `value`; upper bounds are inclusive
    pub fn class_of(&self, value: f64) -> usize {
        let width = self.width();
        if width <= 0.0 {
            return 0;
        }
        let idx = ((value - self.min) / width).ceil() as i64 - 1;
        idx.clamp(0, self.k as i64 - 1) as usize
    }

    pub fn bounds(&self, class: usize) -> (f64, f64) {
        let width = self.width();
        let lower = self.min + width * class as f64;
        let upper = if class + 1 >= self.k {
            self.max
        } else {
            self.min + width * (class + 1) as f64
        };
        (lower, upper)
    }

    pub fn legend_label(&self, class: usize) -> String {
        let (lower, upper) = self.bounds(class);
        format!("{} - {}", human_format(lower), human_format(upper))
    }
}

/// Maps projected coordinates into the panel, preserving aspect ratio
struct Frame {
    x0: f64,
    y0: f64,
    scale: f64,
}

impl Frame {
    fn fit(panel: ((i32, i32), (i32, i32))) -> Self {
        let (x_max, y_max) = (ROBINSON_XSCALE * std::f64::consts::PI, ROBINSON_YSCALE);
        let ((left, top), (right, bottom)) = panel;
        let (w, h) = (f64::from(right - left), f64::from(bottom - top));
        let scale = (w / (2.0 * x_max)).min(h / (2.0 * y_max));
        Frame {
            x0: f64::from(left) + w / 2.0,
            y0: f64::from(top) + h / 2.0,
            scale,
        }
    }

    fn to_px(&self, c: Coord<f64>) -> (i32, i32) {
        (
            (self.x0 + c.x * self.scale).round() as i32,
            (self.y0 - c.y * self.scale).round() as i32,
        )
    }
}

fn draw_error<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::Draw(e.to_string())
}

/// Map title, e.g. `Views by Country March 2023 to May 2023`
pub fn map_title(metric: Metric, date_label: Option<&str>) -> String {
    let title = titlecase(&format!("{} by country", metric.title()));
    match date_label {
        Some(label) if !label.is_empty() => format!("{} {}", title, label),
        _ => title,
    }
}

/// Render the static map to `path`; the format follows the extension.
pub fn render_image(
    path: &Path,
    table: &JoinedTable,
    metric: Metric,
    date_label: Option<&str>,
    shapes: &ShapeSet,
) -> Result<(), RenderError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "bmp" => {
            let root = BitMapBackend::new(path, IMAGE_SIZE).into_drawing_area();
            draw_map(&root, table, metric, date_label, shapes)?;
            root.present().map_err(draw_error)?;
        }
        "svg" => {
            let root = SVGBackend::new(path, IMAGE_SIZE).into_drawing_area();
            draw_map(&root, table, metric, date_label, shapes)?;
            root.present().map_err(draw_error)?;
        }
        _ => return Err(RenderError::UnsupportedFormat(ext)),
    }

    info!("Wrote static map {}", path.display());
    Ok(())
}

/// Render the static map as an SVG document
pub fn render_svg_string(
    table: &JoinedTable,
    metric: Metric,
    date_label: Option<&str>,
    shapes: &ShapeSet,
) -> Result<String, RenderError> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, IMAGE_SIZE).into_drawing_area();
        draw_map(&root, table, metric, date_label, shapes)?;
        root.present().map_err(draw_error)?;
    }
    Ok(svg)
}

fn draw_map<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    table: &JoinedTable,
    metric: Metric,
    date_label: Option<&str>,
    shapes: &ShapeSet,
) -> Result<(), RenderError> {
    root.fill(&WHITE).map_err(draw_error)?;
    root.draw(&Rectangle::new([PANEL.0, PANEL.1], WATER.filled()))
        .map_err(draw_error)?;

    let value_of = |shape: &Shape| table.get(&shape.iso3).map(|row| row.metrics.get(metric));
    let classes = Classes::equal_interval(shapes.iter().filter_map(value_of), CLASSES);
    let frame = Frame::fit(PANEL);

    let mut missing = 0;
    for shape in shapes.iter() {
        let (fill, edge) = match (value_of(shape), classes) {
            (Some(value), Some(classes)) => {
                (PALETTE[classes.class_of(value as f64)], BLACK)
            }
            _ => {
                missing += 1;
                (MISSING, MISSING_EDGE)
            }
        };

        for polygon in shape.geometry.iter() {
            let mut points: Vec<(i32, i32)> =
                polygon.exterior().coords().map(|c| frame.to_px(*c)).collect();
            points.dedup();
            if points.len() < 3 {
                continue;
            }
            root.draw(&Polygon::new(points.clone(), fill.filled()))
                .map_err(draw_error)?;
            root.draw(&PathElement::new(points, edge.mix(0.6).stroke_width(1)))
                .map_err(draw_error)?;
        }
    }
    if missing > 0 {
        warn!("{} shapes have no matching country row", missing);
    }

    draw_labels(root, shapes, &frame, &value_of)?;
    draw_legend(root, metric, classes.as_ref(), missing > 0)?;
    draw_top_ten(root, table, metric)?;

    let title_style = TextStyle::from((FONT, 32).into_font())
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Center));
    root.draw_text(
        &map_title(metric, date_label),
        &title_style,
        (IMAGE_SIZE.0 as i32 / 2, 40),
    )
    .map_err(draw_error)?;

    Ok(())
}

fn draw_labels<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    shapes: &ShapeSet,
    frame: &Frame,
    value_of: &dyn Fn(&Shape) -> Option<u64>,
) -> Result<(), RenderError> {
    let style = TextStyle::from((FONT, 13).into_font())
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Center));

    // Shapes are stored largest first
    for shape in shapes.iter().take(LABELLED_SHAPES) {
        let Some(anchor) = shape.anchor else {
            continue;
        };
        let (x, y) = frame.to_px(anchor);
        match value_of(shape) {
            Some(value) => {
                root.draw_text(&shape.name, &style, (x, y - 7))
                    .map_err(draw_error)?;
                root.draw_text(&human_format(value as f64), &style, (x, y + 7))
                    .map_err(draw_error)?;
            }
            None => {
                root.draw_text(&shape.name, &style, (x, y)).map_err(draw_error)?;
            }
        }
    }
    Ok(())
}

fn draw_legend<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    metric: Metric,
    classes: Option<&Classes>,
    show_missing: bool,
) -> Result<(), RenderError> {
    const ROW: i32 = 24;
    let mut entries: Vec<(RGBColor, String)> = match classes {
        Some(classes) => (0..CLASSES)
            .map(|i| (PALETTE[i], classes.legend_label(i)))
            .collect(),
        None => Vec::new(),
    };
    if show_missing {
        entries.push((MISSING, MISSING_LABEL.to_string()));
    }

    let left = PANEL.0 .0 + 20;
    let mut y = PANEL.1 .1 - 20 - ROW * entries.len() as i32 - ROW;

    let heading = TextStyle::from((FONT, 18).into_font())
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Center));
    root.draw_text(metric.title(), &heading, (left, y + ROW / 2))
        .map_err(draw_error)?;

    let label = TextStyle::from((FONT, 15).into_font())
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Center));
    for (color, text) in entries {
        y += ROW;
        root.draw(&Rectangle::new(
            [(left, y + 4), (left + 28, y + ROW - 4)],
            color.filled(),
        ))
        .map_err(draw_error)?;
        root.draw(&Rectangle::new(
            [(left, y + 4), (left + 28, y + ROW - 4)],
            BLACK.stroke_width(1),
        ))
        .map_err(draw_error)?;
        root.draw_text(&text, &label, (left + 38, y + ROW / 2))
            .map_err(draw_error)?;
    }
    Ok(())
}

fn draw_top_ten<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    table: &JoinedTable,
    metric: Metric,
) -> Result<(), RenderError> {
    const LINE: i32 = 22;
    let top = table.top(metric, TOP_N);
    let right = PANEL.1 .0 - 20;
    let left = right - 300;
    let bottom = PANEL.1 .1 - 20;
    let top_y = bottom - LINE * (top.len() as i32 + 2);

    root.draw(&Rectangle::new(
        [(left, top_y), (right, bottom)],
        WHITE.mix(0.8).filled(),
    ))
    .map_err(draw_error)?;

    let style = TextStyle::from((FONT, 15).into_font())
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Center));
    let mut y = top_y + LINE / 2 + 4;
    root.draw_text(
        &format!("Top ten countries for {}:", metric.title()),
        &style,
        (left + 12, y),
    )
    .map_err(draw_error)?;
    y += LINE / 2;

    for (i, row) in top.iter().enumerate() {
        y += LINE;
        root.draw_text(&format!("{}. {}", i + 1, row.name), &style, (left + 12, y))
            .map_err(draw_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateTable, Metrics};
    use crate::country::CountryRef;
    use crate::render::join;

    const SHAPES: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {
          "type": "Feature",
          "properties": {"ISO_A3": "FRA", "NAME": "France"},
          "geometry": {"type": "Polygon", "coordinates": [[[0,40],[10,40],[10,50],[0,50],[0,40]]]}
        },
        {
          "type": "Feature",
          "properties": {"ISO_A3": "-99", "ADM0_A3": "DEU", "NAME": "Germany"},
          "geometry": {"type": "MultiPolygon", "coordinates": [[[[10,47],[15,47],[15,55],[10,55],[10,47]]]]}
        },
        {
          "type": "Feature",
          "properties": {"ISO_A3": "-99", "ADM0_A3": "XNA", "NAME": "Nowhere"},
          "geometry": {"type": "Polygon", "coordinates": [[[-60,-10],[-40,-10],[-40,10],[-60,10],[-60,-10]]]}
        },
        {
          "type": "Feature",
          "properties": {"ISO_A3": "ITA", "NAME": "Point"},
          "geometry": {"type": "Point", "coordinates": [12, 42]}
        }
      ]
    }"#;

    fn joined() -> JoinedTable {
        let countries = CountryRef::from_reader(
            "alpha2,alpha3,name\nFR,FRA,France\nDE,DEU,Germany\n".as_bytes(),
        )
        .unwrap();
        let mut table = AggregateTable::new();
        table.add(
            "FRA",
            Metrics {
                sessions: 10,
                users: 9,
                pageviews: 1234,
            },
        );
        table.add(
            "DEU",
            Metrics {
                sessions: 4,
                users: 4,
                pageviews: 5,
            },
        );
        join(&table, &countries)
    }

    #[test]
    fn test_robinson_reference_points() {
        assert_eq!(robinson(0.0, 0.0), (0.0, 0.0));

        let (x, y) = robinson(180.0, 90.0);
        assert!((x - 0.8487 * 0.5322 * std::f64::consts::PI).abs() < 1e-9);
        assert!((y - 1.3523).abs() < 1e-9);

        // Halfway between the 0 and 5 degree rows
        let (_, y) = robinson(0.0, -2.5);
        assert!((y + 1.3523 * 0.0310).abs() < 1e-9);
    }

    #[test]
    fn test_equal_interval_classes() {
        let classes = Classes::equal_interval([0, 90, 45], 9).unwrap();
        assert_eq!(classes.class_of(0.0), 0);
        assert_eq!(classes.class_of(10.0), 0);
        assert_eq!(classes.class_of(10.5), 1);
        assert_eq!(classes.class_of(90.0), 8);
        assert_eq!(classes.bounds(0), (0.0, 10.0));
        assert_eq!(classes.bounds(8), (80.0, 90.0));
        assert_eq!(classes.legend_label(1), "10 - 20");

        let flat = Classes::equal_interval([7, 7], 9).unwrap();
        assert_eq!(flat.class_of(7.0), 0);
        assert!(Classes::equal_interval(Vec::<u64>::new(), 9).is_none());
    }

    #[test]
    fn test_legend_label_is_human_formatted() {
        let classes = Classes::equal_interval([0, 9_000_000], 9).unwrap();
        assert_eq!(classes.legend_label(0), "0 - 1M");
        assert_eq!(classes.legend_label(8), "8M - 9M");
    }

    #[test]
    fn test_shape_set_codes_and_skips() {
        let shapes = ShapeSet::from_geojson_str(SHAPES).unwrap();
        let mut codes: Vec<&str> = shapes.iter().map(|s| s.iso3.as_str()).collect();
        codes.sort();
        assert_eq!(codes, vec!["DEU", "FRA", "XNA"]);
        // Sorted largest first
        let areas: Vec<f64> = shapes.iter().map(Shape::area).collect();
        assert!(areas.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(shapes.iter().next().unwrap().iso3, "XNA");
    }

    #[test]
    fn test_not_a_feature_collection() {
        let result = ShapeSet::from_geojson_str(r#"{"type": "Point", "coordinates": [0, 0]}"#);
        assert!(matches!(result, Err(RenderError::NotFeatureCollection)));
    }

    #[test]
    fn test_map_title() {
        assert_eq!(
            map_title(Metric::Pageviews, Some("December 2022 to February 2023")),
            "Views by Country December 2022 to February 2023"
        );
        assert_eq!(map_title(Metric::Sessions, None), "Sessions by Country");
    }

    #[test]
    fn test_render_svg() {
        let shapes = ShapeSet::from_geojson_str(SHAPES).unwrap();
        let svg = render_svg_string(&joined(), Metric::Pageviews, Some("March 2023 to May 2023"), &shapes)
            .unwrap();

        assert!(svg.contains("Views by Country March 2023 to May 2023"));
        assert!(svg.contains(MISSING_LABEL));
        assert!(svg.contains("Top ten countries for Views:"));
        assert!(svg.contains("1. France"));
        assert!(svg.contains("1.23K"));
        // Highest and lowest classes, water and missing fill
        assert!(svg.contains("#7F0000"));
        assert!(svg.contains("#FFF7EC"));
        assert!(svg.contains("#87CEFA"));
        assert!(svg.contains("#D3D3D3"));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let shapes = ShapeSet::from_geojson_str(SHAPES).unwrap();
        let result = render_image(
            &dir.path().join("map.gif"),
            &joined(),
            Metric::Pageviews,
            None,
            &shapes,
        );
        assert!(matches!(result, Err(RenderError::UnsupportedFormat(ext)) if ext == "gif"));
    }

    #[test]
    fn test_shapefile_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ne_10m_admin_0_map_units.shp");
        std::fs::write(&path, [0u8, 0, 39, 10]).unwrap();

        let err = ShapeSet::load(&path).unwrap_err();
        assert!(matches!(&err, RenderError::Shapefile(p) if p == &path));
        assert!(err.to_string().contains("ogr2ogr -f GeoJSON"));

        let geojson = dir.path().join("countries.geojson");
        std::fs::write(&geojson, SHAPES).unwrap();
        assert_eq!(ShapeSet::load(&geojson).unwrap().len(), 3);
    }

    #[test]
    fn test_render_svg_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.svg");
        let shapes = ShapeSet::from_geojson_str(SHAPES).unwrap();
        render_image(&path, &joined(), Metric::Sessions, None, &shapes).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
    }
}
