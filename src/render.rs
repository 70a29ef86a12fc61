//! Scatter-plot artifacts: built from a layout and an expression vector,
//! drawn as SVG and rasterised for display or export.
//!
//! Figure geometry is expressed in points (1/72 in), so a figure of
//! `fig_inches` rasterises to `fig_inches * dpi` pixels on each side.

use crate::{
    color::{alpha, gradient_map, hex_color, hex_rgb, value_range, Colormap, ValueRange, NO_DATA_RGBA},
    config::{FigureConfig, LayoutConfig},
    store::Layout,
};
use anyhow::{anyhow, Context as _};
use image::RgbaImage;
use once_cell::sync::Lazy;
use resvg::{tiny_skia, usvg};
use std::sync::Arc;
use svg::node::element::{Circle, Definitions, Group, Line, LinearGradient, Rectangle, Stop, Text};
use svg::Document;
use tracing::{debug, warn};

const PT_PER_INCH: f32 = 72.0;
const METERS_PER_INCH: f64 = 0.0254;
const AXIS_PAD_FRAC: f32 = 0.05;
const COLORBAR_STOPS: usize = 16;
const FONT_FAMILY: &str = "DejaVu Sans, Liberation Sans, Arial, Helvetica, sans-serif";
pub const COLORBAR_LABEL: &str = "Normalized gene expression";

static FONTS: Lazy<Arc<usvg::fontdb::Database>> = Lazy::new(|| {
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    let preferred = ["DejaVu Sans", "Liberation Sans", "Arial", "Helvetica"];
    let family = preferred
        .iter()
        .map(|s| s.to_string())
        .find(|name| {
            db.faces()
                .any(|f| f.families.iter().any(|(fam, _)| fam == name))
        })
        .or_else(|| {
            db.faces()
                .next()
                .and_then(|f| f.families.first().map(|(fam, _)| fam.clone()))
        });
    match family {
        Some(family) => db.set_sans_serif_family(family),
        None => warn!("no system fonts found, plot text will be missing"),
    }
    Arc::new(db)
});

#[derive(Clone, Debug, PartialEq)]
pub struct PlotStyle {
    pub x_label: String,
    pub y_label: String,
    pub colorbar_label: String,
    pub colormap: Colormap,
    /// pt^2
    pub marker_area: f32,
    pub fig_inches: f32,
    pub font_scale: f32,
}

impl PlotStyle {
    pub fn from_config(layout: &LayoutConfig, figure: &FigureConfig) -> Self {
        Self {
            x_label: layout.x_label.clone(),
            y_label: layout.y_label.clone(),
            colorbar_label: COLORBAR_LABEL.to_string(),
            colormap: layout.colormap,
            marker_area: layout.marker_area,
            fig_inches: figure.inches,
            font_scale: figure.font_scale,
        }
    }
}

/// A fully resolved scatter plot. Colours are precomputed per point.
#[derive(Clone, Debug)]
pub struct ScatterPlot {
    pub title: String,
    pub style: PlotStyle,
    pub xy: Vec<[f32; 2]>,
    /// `None` when the gene was not found in the layout.
    pub values: Option<Vec<f32>>,
    pub colors: Vec<u32>,
    pub range: Option<ValueRange>,
    /// [min_x, min_y, max_x, max_y]
    pub bounds: [f32; 4],
}

impl ScatterPlot {
    pub fn is_degenerate(&self) -> bool {
        self.values.is_none()
    }
}

/// Padded bounding box; degenerate axes widen to +-0.5, no points gives [0,1].
pub fn axis_bounds(xy: &[[f32; 2]]) -> [f32; 4] {
    let mut b = [f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY];
    for p in xy {
        if p[0].is_finite() && p[1].is_finite() {
            b[0] = b[0].min(p[0]);
            b[1] = b[1].min(p[1]);
            b[2] = b[2].max(p[0]);
            b[3] = b[3].max(p[1]);
        }
    }
    if !b.iter().all(|v| v.is_finite()) {
        return [0.0, 0.0, 1.0, 1.0];
    }
    let pad = |lo: f32, hi: f32| {
        let w = hi - lo;
        if w <= 0.0 {
            (lo - 0.5, hi + 0.5)
        } else {
            (lo - w * AXIS_PAD_FRAC, hi + w * AXIS_PAD_FRAC)
        }
    };
    let (x0, x1) = pad(b[0], b[2]);
    let (y0, y1) = pad(b[1], b[3]);
    [x0, y0, x1, y1]
}

/// Build a plot from interleaved coordinates and an optional expression vector.
pub fn scatter(
    gene: &str,
    coords: &[f32],
    values: Option<&[f32]>,
    style: &PlotStyle,
) -> anyhow::Result<ScatterPlot> {
    if coords.len() % 2 != 0 {
        return Err(anyhow!("odd coordinate count {}", coords.len()));
    }
    let xy: Vec<[f32; 2]> = coords.chunks_exact(2).map(|p| [p[0], p[1]]).collect();
    if let Some(v) = values {
        if v.len() != xy.len() {
            return Err(anyhow!(
                "expression has {} values for {} points",
                v.len(),
                xy.len()
            ));
        }
    }

    let range = values.and_then(value_range);
    let colors = match (values, range) {
        (Some(v), Some(r)) => gradient_map(v, r, style.colormap),
        (Some(v), None) => vec![0; v.len()],
        (None, _) => vec![NO_DATA_RGBA; xy.len()],
    };
    let bounds = axis_bounds(&xy);

    Ok(ScatterPlot {
        title: gene.to_string(),
        style: style.clone(),
        xy,
        values: values.map(<[f32]>::to_vec),
        colors,
        range,
        bounds,
    })
}

/// Look `gene` up in `layout` and plot it; a missing gene gives a degenerate plot.
pub fn render_layout(gene: &str, layout: &Layout, style: &PlotStyle) -> anyhow::Result<ScatterPlot> {
    let values = layout.expression(gene)?;
    if values.is_none() {
        debug!(gene, layout = layout.kind().label(), "gene not in layout");
    }
    let coords = layout.coords()?;
    scatter(gene, coords, values.as_deref(), style)
        .with_context(|| format!("plot {gene} on {}", layout.kind().label()))
}

fn nice_step(raw: f64) -> f64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 1.0;
    }
    let mag = 10f64.powf(raw.log10().floor());
    let norm = raw / mag;
    let nice = if norm <= 1.0 {
        1.0
    } else if norm <= 2.0 {
        2.0
    } else if norm <= 2.5 {
        2.5
    } else if norm <= 5.0 {
        5.0
    } else {
        10.0
    };
    nice * mag
}

/// Round-numbered ticks inside [min, max], roughly `target` of them.
pub fn nice_ticks(min: f32, max: f32, target: usize) -> Vec<f64> {
    let (lo, hi) = (min as f64, max as f64);
    if !lo.is_finite() || !hi.is_finite() || hi <= lo {
        return vec![lo];
    }
    let step = nice_step((hi - lo) / target.max(2).saturating_sub(1) as f64);
    let eps = step * 1e-9;
    let mut v = (lo / step).ceil() * step;
    let mut out = Vec::new();
    while v <= hi + eps && out.len() < 64 {
        // avoid "-0"
        out.push(if v.abs() < eps { 0.0 } else { v });
        v += step;
    }
    out
}

fn format_tick(v: f64, step: f64) -> String {
    let av = v.abs();
    if av > 0.0 && (av < 1e-3 || av >= 1e5) {
        return format!("{v:.1e}");
    }
    let mut decimals = 0usize;
    while decimals < 6 {
        let scaled = step * 10f64.powi(decimals as i32);
        if (scaled - scaled.round()).abs() < 1e-6 * scaled.abs().max(1.0) {
            break;
        }
        decimals += 1;
    }
    format!("{v:.decimals$}")
}

fn tick_step(ticks: &[f64]) -> f64 {
    match ticks {
        [a, b, ..] => b - a,
        _ => 1.0,
    }
}

fn text(content: impl Into<String>, x: f32, y: f32, size: f32, anchor: &str) -> Text {
    Text::new(content.into())
        .set("x", x)
        .set("y", y)
        .set("font-family", FONT_FAMILY)
        .set("font-size", size)
        .set("text-anchor", anchor)
        .set("fill", "#000000")
}

struct Frame {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl Frame {
    fn width(&self) -> f32 {
        self.right - self.left
    }

    fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// SVG document for `plot`. Points are drawn in data order.
pub fn to_svg(plot: &ScatterPlot) -> String {
    let style = &plot.style;
    let fig = (style.fig_inches * PT_PER_INCH).max(36.0);
    let fs = style.font_scale.max(0.1);
    let tick_size = 6.0 * fs;
    let label_size = 7.0 * fs;
    let title_size = 8.0 * fs;
    let tick_len = 3.0;

    let cb_width = fig * 0.035;
    let cb_gap = fig * 0.03;
    let cb_text = tick_size * 2.6;
    let right_margin = cb_gap + cb_width + tick_len + 2.0 + cb_text + label_size * 1.3 + 2.0;

    let axes = Frame {
        left: label_size * 1.4 + tick_size * 2.8 + tick_len + 2.0,
        top: title_size * 1.8,
        right: fig - right_margin,
        bottom: fig - (tick_len + tick_size * 1.5 + label_size * 1.5 + 2.0),
    };
    let cb = Frame {
        left: axes.right + cb_gap,
        top: axes.top,
        right: axes.right + cb_gap + cb_width,
        bottom: axes.bottom,
    };

    let [bx0, by0, bx1, by1] = plot.bounds;
    let sx = axes.width() / (bx1 - bx0).max(f32::EPSILON);
    let sy = axes.height() / (by1 - by0).max(f32::EPSILON);
    let map_x = |x: f32| axes.left + (x - bx0) * sx;
    let map_y = |y: f32| axes.bottom - (y - by0) * sy;

    let mut doc = Document::new()
        .set("viewBox", (0, 0, fig, fig))
        .set("width", fig)
        .set("height", fig)
        .add(
            Rectangle::new()
                .set("x", 0)
                .set("y", 0)
                .set("width", fig)
                .set("height", fig)
                .set("fill", "#ffffff"),
        );

    // points
    let radius = style.marker_area.max(0.0).sqrt() / 2.0;
    let mut points = Group::new().set("stroke", "none");
    for (p, &c) in plot.xy.iter().zip(&plot.colors) {
        if alpha(c) == 0 || !p[0].is_finite() || !p[1].is_finite() {
            continue;
        }
        points = points.add(
            Circle::new()
                .set("cx", map_x(p[0]))
                .set("cy", map_y(p[1]))
                .set("r", radius)
                .set("fill", hex_rgb(c)),
        );
    }
    doc = doc.add(points);

    // frame and ticks
    doc = doc.add(
        Rectangle::new()
            .set("x", axes.left)
            .set("y", axes.top)
            .set("width", axes.width())
            .set("height", axes.height())
            .set("fill", "none")
            .set("stroke", "#000000")
            .set("stroke-width", 0.8),
    );
    let x_ticks = nice_ticks(bx0, bx1, 5);
    let x_step = tick_step(&x_ticks);
    for &t in &x_ticks {
        let x = map_x(t as f32);
        doc = doc
            .add(
                Line::new()
                    .set("x1", x)
                    .set("y1", axes.bottom)
                    .set("x2", x)
                    .set("y2", axes.bottom + tick_len)
                    .set("stroke", "#000000")
                    .set("stroke-width", 0.6),
            )
            .add(text(
                format_tick(t, x_step),
                x,
                axes.bottom + tick_len + tick_size * 1.1,
                tick_size,
                "middle",
            ));
    }
    let y_ticks = nice_ticks(by0, by1, 5);
    let y_step = tick_step(&y_ticks);
    for &t in &y_ticks {
        let y = map_y(t as f32);
        doc = doc
            .add(
                Line::new()
                    .set("x1", axes.left - tick_len)
                    .set("y1", y)
                    .set("x2", axes.left)
                    .set("y2", y)
                    .set("stroke", "#000000")
                    .set("stroke-width", 0.6),
            )
            .add(text(
                format_tick(t, y_step),
                axes.left - tick_len - 1.5,
                y + tick_size * 0.35,
                tick_size,
                "end",
            ));
    }

    // labels and title
    doc = doc.add(text(
        style.x_label.clone(),
        (axes.left + axes.right) / 2.0,
        fig - label_size * 0.45,
        label_size,
        "middle",
    ));
    let ylx = label_size * 1.0;
    let yly = (axes.top + axes.bottom) / 2.0;
    doc = doc.add(
        text(style.y_label.clone(), ylx, yly, label_size, "middle")
            .set("transform", format!("rotate(-90 {ylx} {yly})")),
    );
    doc = doc.add(text(
        plot.title.clone(),
        (axes.left + axes.right) / 2.0,
        title_size * 1.25,
        title_size,
        "middle",
    ));

    // colorbar
    let cb_fill = match plot.range {
        Some(_) => {
            let mut gradient = LinearGradient::new()
                .set("id", "colorbar")
                .set("x1", 0)
                .set("y1", 1)
                .set("x2", 0)
                .set("y2", 0);
            for i in 0..COLORBAR_STOPS {
                let t = i as f64 / (COLORBAR_STOPS - 1) as f64;
                gradient = gradient.add(
                    Stop::new()
                        .set("offset", t)
                        .set("stop-color", hex_color(style.colormap.eval(t))),
                );
            }
            doc = doc.add(Definitions::new().add(gradient));
            "url(#colorbar)"
        }
        None => "#ffffff",
    };
    doc = doc.add(
        Rectangle::new()
            .set("x", cb.left)
            .set("y", cb.top)
            .set("width", cb.width())
            .set("height", cb.height())
            .set("fill", cb_fill)
            .set("stroke", "#000000")
            .set("stroke-width", 0.6),
    );
    if let Some(range) = plot.range {
        let ticks = nice_ticks(range.min, range.max, 5);
        let step = tick_step(&ticks);
        let den = (range.max - range.min).max(f32::EPSILON);
        for &t in &ticks {
            let y = cb.bottom - ((t as f32 - range.min) / den) * cb.height();
            doc = doc
                .add(
                    Line::new()
                        .set("x1", cb.right)
                        .set("y1", y)
                        .set("x2", cb.right + tick_len)
                        .set("y2", y)
                        .set("stroke", "#000000")
                        .set("stroke-width", 0.6),
                )
                .add(text(
                    format_tick(t, step),
                    cb.right + tick_len + 1.5,
                    y + tick_size * 0.35,
                    tick_size,
                    "start",
                ));
        }
    }
    let clx = fig - label_size * 0.6;
    let cly = (cb.top + cb.bottom) / 2.0;
    doc = doc.add(
        text(style.colorbar_label.clone(), clx, cly, label_size * 0.8, "middle")
            .set("transform", format!("rotate(90 {clx} {cly})")),
    );

    doc.to_string()
}

/// Rasterise an SVG whose user units are points, at `dpi`.
pub fn rasterize(svg_text: &str, dpi: f32) -> anyhow::Result<RgbaImage> {
    if !(dpi.is_finite() && dpi > 0.0) {
        return Err(anyhow!("invalid dpi {dpi}"));
    }
    let mut opt = usvg::Options::default();
    opt.fontdb = FONTS.clone();
    let tree = usvg::Tree::from_str(svg_text, &opt).context("parse plot svg")?;

    let scale = dpi / PT_PER_INCH;
    let size = tree.size();
    let w = (size.width() * scale).round().max(1.0) as u32;
    let h = (size.height() * scale).round().max(1.0) as u32;
    let mut pixmap =
        tiny_skia::Pixmap::new(w, h).ok_or_else(|| anyhow!("cannot allocate {w}x{h} pixmap"))?;
    pixmap.fill(tiny_skia::Color::WHITE);
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(scale, scale),
        &mut pixmap.as_mut(),
    );

    let mut rgba = Vec::with_capacity((w * h * 4) as usize);
    for p in pixmap.pixels() {
        let c = p.demultiply();
        rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    RgbaImage::from_raw(w, h, rgba).ok_or_else(|| anyhow!("pixel buffer size mismatch"))
}

/// PNG bytes with a `pHYs` chunk recording `dpi`.
pub fn encode_png(img: &RgbaImage, dpi: f32) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut encoder = png::Encoder::new(&mut bytes, img.width(), img.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Best);
    encoder.set_pixel_dims(Some(pixel_dims(dpi)));
    let mut writer = encoder.write_header().context("png header")?;
    writer
        .write_image_data(img.as_raw())
        .context("encode png")?;
    writer.finish().context("finish png")?;
    Ok(bytes)
}

fn pixel_dims(dpi: f32) -> png::PixelDimensions {
    let ppm = (dpi as f64 / METERS_PER_INCH).round() as u32;
    png::PixelDimensions {
        xppu: ppm,
        yppu: ppm,
        unit: png::Unit::Meter,
    }
}
