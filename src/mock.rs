//! Synthetic physical + t-SNE datasets for running the viewer without real data.

use crate::data::{write_dataset, ExprData, SpaceData};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::info;

/// Present in the physical vocabulary only.
pub const PHYSICAL_ONLY_GENE: &str = "HBB";
/// Present in the embedding vocabulary only.
pub const EMBEDDING_ONLY_GENE: &str = "NEAT1";

const SHARED_GENES: &[&str] = &[
    "GAPDH", "ACTB", "VIM", "KRT18", "COL1A1", "EPCAM", "PTPRC", "MKI67", "SOX2", "NES", "PAX6",
    "CD34", "TOP2A", "MALAT1", "S100A6", "TTR",
];

const N_CLUSTERS: usize = 6;
const TISSUE_RADIUS_PX: f32 = 500.0;

pub struct DemoOptions {
    pub spots: usize,
    pub cells: usize,
    pub seed: u64,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            spots: 6000,
            cells: 4000,
            seed: 42,
        }
    }
}

#[cfg(test)]
impl DemoOptions {
    pub fn small() -> Self {
        Self {
            spots: 300,
            cells: 200,
            seed: 7,
        }
    }
}

pub struct DemoPaths {
    pub physical: PathBuf,
    pub embedding: PathBuf,
}

fn gaussian(rng: &mut StdRng) -> f32 {
    // Box-Muller
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

fn physical_genes() -> Vec<String> {
    SHARED_GENES
        .iter()
        .chain(std::iter::once(&PHYSICAL_ONLY_GENE))
        .map(|s| s.to_string())
        .collect()
}

fn embedding_genes() -> Vec<String> {
    SHARED_GENES
        .iter()
        .chain(std::iter::once(&EMBEDDING_ONLY_GENE))
        .map(|s| s.to_string())
        .collect()
}

/// Spatial pattern of gene `g` at normalised position (u, v) in [-1, 1]^2.
fn spatial_pattern(g: usize, u: f32, v: f32) -> f32 {
    let r = (u * u + v * v).sqrt();
    match g % 5 {
        // housekeeping: flat and high
        0 => 3.0,
        1 => 1.5 * (u + 1.0),
        2 => {
            let (cx, cy) = ((g as f32 * 1.7).sin() * 0.5, (g as f32 * 2.3).cos() * 0.5);
            let d2 = (u - cx).powi(2) + (v - cy).powi(2);
            3.0 * (-d2 / 0.08).exp()
        }
        3 => 2.5 * (-((r - 0.6) / 0.12).powi(2)).exp(),
        _ => 1.5 * (v + 1.0),
    }
}

fn write_physical(path: &Path, opts: &DemoOptions, rng: &mut StdRng) -> anyhow::Result<()> {
    let n = opts.spots;
    let mut xy = Vec::with_capacity(n * 2);
    let mut uv = Vec::with_capacity(n);
    while uv.len() < n {
        let u: f32 = rng.gen_range(-1.0..1.0);
        let v: f32 = rng.gen_range(-1.0..1.0);
        if u * u + v * v > 1.0 {
            continue;
        }
        uv.push((u, v));
        xy.push(TISSUE_RADIUS_PX * (u + 1.0));
        xy.push(TISSUE_RADIUS_PX * (v + 1.0));
    }

    let var_names = physical_genes();
    let mut values = Vec::with_capacity(var_names.len() * n);
    for g in 0..var_names.len() {
        for &(u, v) in &uv {
            let base = spatial_pattern(g, u, v);
            values.push((base + 0.25 * gaussian(rng)).max(0.0));
        }
    }

    let spaces = [SpaceData {
        name: "spatial".into(),
        xy,
    }];
    write_dataset(
        path,
        n as u32,
        &spaces,
        Some(&ExprData::Dense { var_names, values }),
    )
}

fn write_embedding(path: &Path, opts: &DemoOptions, rng: &mut StdRng) -> anyhow::Result<()> {
    let n = opts.cells;
    let centers: Vec<(f32, f32)> = (0..N_CLUSTERS)
        .map(|k| {
            let a = std::f32::consts::TAU * k as f32 / N_CLUSTERS as f32;
            (30.0 * a.cos(), 30.0 * a.sin())
        })
        .collect();

    let mut xy = Vec::with_capacity(n * 2);
    let mut cluster = Vec::with_capacity(n);
    for _ in 0..n {
        let k = rng.gen_range(0..N_CLUSTERS);
        let (cx, cy) = centers[k];
        xy.push(cx + 4.0 * gaussian(rng));
        xy.push(cy + 4.0 * gaussian(rng));
        cluster.push(k);
    }

    let var_names = embedding_genes();
    let mut indptr = Vec::with_capacity(var_names.len() + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    indptr.push(0u32);
    for g in 0..var_names.len() {
        // housekeeping genes everywhere, markers in one or two clusters
        let marker = g % N_CLUSTERS;
        for (cell, &k) in cluster.iter().enumerate() {
            let mean = if g == 0 {
                2.5
            } else if k == marker {
                2.0
            } else if k == (marker + 1) % N_CLUSTERS {
                0.6
            } else {
                0.05
            };
            let value = (mean + 0.4 * gaussian(rng)).max(0.0);
            if value > 0.1 {
                indices.push(cell as u32);
                data.push(value);
            }
        }
        indptr.push(indices.len() as u32);
    }

    let spaces = [SpaceData {
        name: "X_tsne".into(),
        xy,
    }];
    write_dataset(
        path,
        n as u32,
        &spaces,
        Some(&ExprData::Csc {
            var_names,
            indptr,
            indices,
            data,
        }),
    )
}

/// Writes `spatial.stviz` and `tsne.stviz` into `dir`.
pub fn write_demo(dir: &Path, opts: &DemoOptions) -> anyhow::Result<DemoPaths> {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let paths = DemoPaths {
        physical: dir.join("spatial.stviz"),
        embedding: dir.join("tsne.stviz"),
    };
    write_physical(&paths.physical, opts, &mut rng)?;
    write_embedding(&paths.embedding, opts, &mut rng)?;
    info!(
        spots = opts.spots,
        cells = opts.cells,
        "wrote demo dataset to {}",
        dir.display()
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use tempfile::tempdir;

    #[test]
    fn demo_files_load_with_expected_shapes() {
        let dir = tempdir().unwrap();
        let opts = DemoOptions::small();
        let paths = write_demo(dir.path(), &opts).unwrap();

        let physical = Dataset::load(&paths.physical).unwrap();
        assert_eq!(physical.meta.n_points as usize, opts.spots);
        assert!(physical.find_gene("GAPDH").is_some());
        assert!(physical.find_gene(EMBEDDING_ONLY_GENE).is_none());
        let bbox = physical.meta.spaces[0].bbox;
        assert!(bbox[0] >= 0.0 && bbox[2] <= 2.0 * TISSUE_RADIUS_PX);

        let embedding = Dataset::load(&paths.embedding).unwrap();
        assert_eq!(embedding.meta.n_points as usize, opts.cells);
        assert!(embedding.find_gene(EMBEDDING_ONLY_GENE).is_some());
        assert!(embedding.find_gene(PHYSICAL_ONLY_GENE).is_none());
    }

    #[test]
    fn same_seed_writes_same_bytes() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let pa = write_demo(a.path(), &DemoOptions::small()).unwrap();
        let pb = write_demo(b.path(), &DemoOptions::small()).unwrap();
        assert_eq!(
            std::fs::read(pa.physical).unwrap(),
            std::fs::read(pb.physical).unwrap()
        );
    }

    #[test]
    fn expression_is_non_negative() {
        let dir = tempdir().unwrap();
        let paths = write_demo(dir.path(), &DemoOptions::small()).unwrap();
        let ds = Dataset::load(&paths.embedding).unwrap();
        for g in 0..ds.var_names().len() as u32 {
            assert!(ds.gene_vector(g).unwrap().iter().all(|v| *v >= 0.0));
        }
    }
}
