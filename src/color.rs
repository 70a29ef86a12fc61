use colorous::Color;
use serde::{Deserialize, Serialize};

/// Light grey to blue, the two-stop map used for embedding views.
const SEURAT_LOW: Color = Color {
    r: 0xd3,
    g: 0xd3,
    b: 0xd3,
};
const SEURAT_HIGH: Color = Color {
    r: 0x00,
    g: 0x00,
    b: 0xff,
};
const SEURAT_LEVELS: usize = 256;

/// Colour of points that carry no expression value.
pub const NO_DATA_RGBA: u32 = pack_rgba8(191, 191, 191, 255);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    Viridis,
    Magma,
    Inferno,
    Plasma,
    Cividis,
    Seurat,
}

impl Colormap {
    pub fn eval(self, t: f64) -> Color {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        match self {
            Colormap::Viridis => colorous::VIRIDIS.eval_continuous(t),
            Colormap::Magma => colorous::MAGMA.eval_continuous(t),
            Colormap::Inferno => colorous::INFERNO.eval_continuous(t),
            Colormap::Plasma => colorous::PLASMA.eval_continuous(t),
            Colormap::Cividis => colorous::CIVIDIS.eval_continuous(t),
            Colormap::Seurat => quantized_lerp(SEURAT_LOW, SEURAT_HIGH, t, SEURAT_LEVELS),
        }
    }
}

fn quantized_lerp(low: Color, high: Color, t: f64, levels: usize) -> Color {
    let top = levels.saturating_sub(1).max(1);
    let idx = ((t * levels as f64) as usize).min(top);
    let f = idx as f64 / top as f64;
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
    Color {
        r: mix(low.r, high.r),
        g: mix(low.g, high.g),
        b: mix(low.b, high.b),
    }
}

pub const fn pack_rgba8(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16) | ((a as u32) << 24)
}

pub fn unpack_rgba8(c: u32) -> [u8; 4] {
    [
        (c & 255) as u8,
        ((c >> 8) & 255) as u8,
        ((c >> 16) & 255) as u8,
        ((c >> 24) & 255) as u8,
    ]
}

pub fn alpha(c: u32) -> u8 {
    ((c >> 24) & 255) as u8
}

pub fn hex_rgb(c: u32) -> String {
    let [r, g, b, _] = unpack_rgba8(c);
    format!("#{r:02x}{g:02x}{b:02x}")
}

pub fn hex_color(c: Color) -> String {
    format!("#{:02x}{:02x}{:02x}", c.r, c.g, c.b)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

/// Finite min/max of `values`. A flat vector maps to the low end of the scale.
pub fn value_range(values: &[f32]) -> Option<ValueRange> {
    let mut vmin = f32::INFINITY;
    let mut vmax = f32::NEG_INFINITY;
    for &v in values {
        if v.is_finite() {
            vmin = vmin.min(v);
            vmax = vmax.max(v);
        }
    }
    if !vmin.is_finite() || !vmax.is_finite() {
        return None;
    }
    if vmin == vmax {
        vmax = vmin + 1.0;
    }
    Some(ValueRange { min: vmin, max: vmax })
}

pub fn gradient_map(values: &[f32], range: ValueRange, cmap: Colormap) -> Vec<u32> {
    let den = (range.max - range.min).max(1e-12);
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return pack_rgba8(128, 128, 128, 0);
            }
            let t = ((v - range.min) / den).clamp(0.0, 1.0);
            let c = cmap.eval(t as f64);
            pack_rgba8(c.r, c.g, c.b, 255)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seurat_map_spans_grey_to_blue() {
        assert_eq!(hex_color(Colormap::Seurat.eval(0.0)), "#d3d3d3");
        assert_eq!(hex_color(Colormap::Seurat.eval(1.0)), "#0000ff");
        let mid = Colormap::Seurat.eval(0.5);
        assert!(mid.b > mid.r && mid.r > 0);
    }

    #[test]
    fn value_range_ignores_non_finite_and_widens_flat_vectors() {
        let r = value_range(&[f32::NAN, 2.0, 5.0, f32::INFINITY]).unwrap();
        assert_eq!(r, ValueRange { min: 2.0, max: 5.0 });

        let flat = value_range(&[0.0, 0.0]).unwrap();
        assert_eq!(flat, ValueRange { min: 0.0, max: 1.0 });

        assert!(value_range(&[]).is_none());
        assert!(value_range(&[f32::NAN]).is_none());
    }

    #[test]
    fn gradient_map_hits_both_ends_and_hides_nan() {
        let range = ValueRange { min: 0.0, max: 4.0 };
        let colors = gradient_map(&[0.0, 4.0, f32::NAN], range, Colormap::Viridis);
        let lo = Colormap::Viridis.eval(0.0);
        let hi = Colormap::Viridis.eval(1.0);
        assert_eq!(colors[0], pack_rgba8(lo.r, lo.g, lo.b, 255));
        assert_eq!(colors[1], pack_rgba8(hi.r, hi.g, hi.b, 255));
        assert_eq!(alpha(colors[2]), 0);
    }

    #[test]
    fn packing_round_trips_through_hex() {
        let c = pack_rgba8(0x12, 0xab, 0xef, 0x80);
        assert_eq!(unpack_rgba8(c), [0x12, 0xab, 0xef, 0x80]);
        assert_eq!(hex_rgb(c), "#12abef");
    }
}
