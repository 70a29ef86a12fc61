use anyhow::{anyhow, Context};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs::File, io::Write, path::Path, sync::Arc};
use tracing::{debug, warn};

pub const CONTAINER_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SpaceMeta {
    pub name: String,
    pub dims: u32,
    pub offset: u64,
    pub len_bytes: u64,
    /// [min_x, min_y, max_x, max_y] for dims==2
    pub bbox: [f32; 4],
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExprKind {
    /// genes x points, row-major
    Dense,
    /// one column per gene
    Csc,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExprMeta {
    pub kind: ExprKind,
    pub n_genes: u32,
    pub var_names: Vec<String>,
    pub data_offset: u64,
    pub data_len_bytes: u64,
    #[serde(default)]
    pub indptr_offset: u64,
    #[serde(default)]
    pub indptr_len_bytes: u64,
    #[serde(default)]
    pub indices_offset: u64,
    #[serde(default)]
    pub indices_len_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatasetMeta {
    pub version: u32,
    pub n_points: u32,
    pub spaces: Vec<SpaceMeta>,
    pub expr: Option<ExprMeta>,
}

/// A memory-mapped `.stviz` container: JSON header followed by aligned blobs.
pub struct Dataset {
    mmap: Mmap,
    data_start: usize,
    pub meta: DatasetMeta,
    gene_index: HashMap<String, u32>,
}

impl Dataset {
    pub fn load(path: &Path) -> anyhow::Result<Arc<Self>> {
        let file = File::open(path).with_context(|| format!("open: {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file).context("mmap")? };

        if mmap.len() < 8 {
            return Err(anyhow!("file too small"));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&mmap[0..8]);
        let json_len = u64::from_le_bytes(len_bytes) as usize;
        let json_start = 8usize;
        let json_end = json_start
            .checked_add(json_len)
            .ok_or_else(|| anyhow!("invalid json_len"))?;
        if mmap.len() < json_end {
            return Err(anyhow!("invalid json_len"));
        }

        let meta: DatasetMeta =
            serde_json::from_slice(&mmap[json_start..json_end]).context("parse meta json")?;
        if meta.version != CONTAINER_VERSION {
            warn!(
                version = meta.version,
                "unexpected container version in {}",
                path.display()
            );
        }

        // padding to 16-byte boundary
        let pad = (16 - (json_end % 16)) % 16;
        let data_start = json_end + pad;

        if mmap.len() < data_start {
            return Err(anyhow!("invalid padding/data_start"));
        }

        let mut gene_index = HashMap::new();
        if let Some(e) = meta.expr.as_ref() {
            if e.var_names.len() != e.n_genes as usize {
                return Err(anyhow!(
                    "n_genes is {} but {} var_names are listed",
                    e.n_genes,
                    e.var_names.len()
                ));
            }
            gene_index.reserve(e.var_names.len());
            for (i, g) in e.var_names.iter().enumerate() {
                // first occurrence wins on duplicate names
                gene_index.entry(g.clone()).or_insert(i as u32);
            }
        }

        let ds = Self {
            mmap,
            data_start,
            meta,
            gene_index,
        };
        ds.validate()?;
        debug!(
            n_points = ds.meta.n_points,
            spaces = ds.meta.spaces.len(),
            genes = ds.gene_index.len(),
            "loaded {}",
            path.display()
        );
        Ok(Arc::new(ds))
    }

    fn validate(&self) -> anyhow::Result<()> {
        let n = self.meta.n_points as u64;
        for s in &self.meta.spaces {
            if s.dims == 2 && s.len_bytes != n * 8 {
                return Err(anyhow!(
                    "space '{}' holds {} bytes, expected {} for {} points",
                    s.name,
                    s.len_bytes,
                    n * 8,
                    n
                ));
            }
            self.slice_bytes(s.offset, s.len_bytes)
                .with_context(|| format!("space '{}'", s.name))?;
        }
        if let Some(e) = self.meta.expr.as_ref() {
            self.slice_bytes(e.data_offset, e.data_len_bytes)
                .context("expression data")?;
            match e.kind {
                ExprKind::Dense => {
                    let expected = e.n_genes as u64 * n * 4;
                    if e.data_len_bytes != expected {
                        return Err(anyhow!(
                            "dense expression holds {} bytes, expected {}",
                            e.data_len_bytes,
                            expected
                        ));
                    }
                }
                ExprKind::Csc => {
                    self.slice_bytes(e.indptr_offset, e.indptr_len_bytes)
                        .context("expression indptr")?;
                    self.slice_bytes(e.indices_offset, e.indices_len_bytes)
                        .context("expression indices")?;
                }
            }
        }
        Ok(())
    }

    fn slice_bytes(&self, offset: u64, len: u64) -> anyhow::Result<&[u8]> {
        let end = usize::try_from(offset)
            .ok()
            .and_then(|o| self.data_start.checked_add(o))
            .zip(usize::try_from(len).ok())
            .and_then(|(start, len)| start.checked_add(len).map(|end| (start, end)));
        match end {
            Some((start, end)) if end <= self.mmap.len() => Ok(&self.mmap[start..end]),
            _ => Err(anyhow!("out of bounds slice")),
        }
    }

    fn slice_f32(&self, offset: u64, len: u64) -> anyhow::Result<&[f32]> {
        let b = self.slice_bytes(offset, len)?;
        bytemuck::try_cast_slice(b).map_err(|e| anyhow!("unaligned f32 data: {e:?}"))
    }

    fn slice_u32(&self, offset: u64, len: u64) -> anyhow::Result<&[u32]> {
        let b = self.slice_bytes(offset, len)?;
        bytemuck::try_cast_slice(b).map_err(|e| anyhow!("unaligned u32 data: {e:?}"))
    }

    /// Interleaved x,y pairs of a 2-D space.
    pub fn space_f32_2d(&self, space_idx: usize) -> anyhow::Result<&[f32]> {
        let s = self
            .meta
            .spaces
            .get(space_idx)
            .ok_or_else(|| anyhow!("invalid space index"))?;
        if s.dims != 2 {
            return Err(anyhow!("space dims != 2 (got {})", s.dims));
        }
        self.slice_f32(s.offset, s.len_bytes)
    }

    pub fn find_space(&self, needle: &str) -> Option<usize> {
        let needle = needle.to_ascii_lowercase();
        self.meta
            .spaces
            .iter()
            .position(|s| s.name.to_ascii_lowercase().contains(&needle))
    }

    pub fn var_names(&self) -> &[String] {
        self.meta
            .expr
            .as_ref()
            .map(|e| e.var_names.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_expr(&self) -> bool {
        self.meta.expr.is_some()
    }

    pub fn find_gene(&self, gene: &str) -> Option<u32> {
        self.gene_index.get(gene).copied()
    }

    /// Per-point expression for `gene_id`. Output length = n_points.
    pub fn gene_vector(&self, gene_id: u32) -> anyhow::Result<Vec<f32>> {
        let e = self.meta.expr.as_ref().ok_or_else(|| anyhow!("no expr in file"))?;
        if gene_id >= e.n_genes {
            return Err(anyhow!("gene_id out of range"));
        }
        let n = self.meta.n_points as usize;
        let g = gene_id as usize;

        match e.kind {
            ExprKind::Dense => {
                let data = self.slice_f32(e.data_offset, e.data_len_bytes)?;
                let row = data
                    .get(g * n..(g + 1) * n)
                    .ok_or_else(|| anyhow!("dense row out of range"))?;
                Ok(row.to_vec())
            }
            ExprKind::Csc => {
                let indptr = self.slice_u32(e.indptr_offset, e.indptr_len_bytes)?;
                let indices = self.slice_u32(e.indices_offset, e.indices_len_bytes)?;
                let data = self.slice_f32(e.data_offset, e.data_len_bytes)?;

                if g + 1 >= indptr.len() {
                    return Err(anyhow!("indptr too short"));
                }
                let start = indptr[g] as usize;
                let end = indptr[g + 1] as usize;
                if end > indices.len() || end > data.len() || start > end {
                    return Err(anyhow!("invalid csc pointers"));
                }

                let mut out = vec![0.0f32; n];
                for k in start..end {
                    let cell = indices[k] as usize;
                    if cell < out.len() {
                        out[cell] = data[k];
                    }
                }
                Ok(out)
            }
        }
    }
}

pub struct SpaceData {
    pub name: String,
    /// interleaved x,y
    pub xy: Vec<f32>,
}

pub enum ExprData {
    Dense {
        var_names: Vec<String>,
        /// genes x points, row-major
        values: Vec<f32>,
    },
    Csc {
        var_names: Vec<String>,
        indptr: Vec<u32>,
        indices: Vec<u32>,
        data: Vec<f32>,
    },
}

fn push_blob(blob: &mut Vec<u8>, bytes: &[u8]) -> (u64, u64) {
    let offset = blob.len() as u64;
    blob.extend_from_slice(bytes);
    (offset, bytes.len() as u64)
}

fn bbox_2d(xy: &[f32]) -> [f32; 4] {
    let mut bbox = [f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY];
    for p in xy.chunks_exact(2) {
        if p[0].is_finite() && p[1].is_finite() {
            bbox[0] = bbox[0].min(p[0]);
            bbox[1] = bbox[1].min(p[1]);
            bbox[2] = bbox[2].max(p[0]);
            bbox[3] = bbox[3].max(p[1]);
        }
    }
    if !bbox.iter().all(|v| v.is_finite()) {
        return [0.0, 0.0, 1.0, 1.0];
    }
    bbox
}

/// Write a `.stviz` container that [`Dataset::load`] reads back.
pub fn write_dataset(
    path: &Path,
    n_points: u32,
    spaces: &[SpaceData],
    expr: Option<&ExprData>,
) -> anyhow::Result<()> {
    let n = n_points as usize;
    let mut blob = Vec::new();

    let mut space_meta = Vec::with_capacity(spaces.len());
    for s in spaces {
        if s.xy.len() != n * 2 {
            return Err(anyhow!(
                "space '{}' has {} coordinates, expected {}",
                s.name,
                s.xy.len(),
                n * 2
            ));
        }
        let (offset, len_bytes) = push_blob(&mut blob, bytemuck::cast_slice(&s.xy));
        space_meta.push(SpaceMeta {
            name: s.name.clone(),
            dims: 2,
            offset,
            len_bytes,
            bbox: bbox_2d(&s.xy),
        });
    }

    let expr_meta = match expr {
        None => None,
        Some(ExprData::Dense { var_names, values }) => {
            if values.len() != var_names.len() * n {
                return Err(anyhow!("dense expression has wrong length"));
            }
            let (data_offset, data_len_bytes) = push_blob(&mut blob, bytemuck::cast_slice(values));
            Some(ExprMeta {
                kind: ExprKind::Dense,
                n_genes: var_names.len() as u32,
                var_names: var_names.clone(),
                data_offset,
                data_len_bytes,
                indptr_offset: 0,
                indptr_len_bytes: 0,
                indices_offset: 0,
                indices_len_bytes: 0,
            })
        }
        Some(ExprData::Csc {
            var_names,
            indptr,
            indices,
            data,
        }) => {
            if indptr.len() != var_names.len() + 1 || indices.len() != data.len() {
                return Err(anyhow!("csc expression has inconsistent lengths"));
            }
            let (indptr_offset, indptr_len_bytes) = push_blob(&mut blob, bytemuck::cast_slice(indptr));
            let (indices_offset, indices_len_bytes) =
                push_blob(&mut blob, bytemuck::cast_slice(indices));
            let (data_offset, data_len_bytes) = push_blob(&mut blob, bytemuck::cast_slice(data));
            Some(ExprMeta {
                kind: ExprKind::Csc,
                n_genes: var_names.len() as u32,
                var_names: var_names.clone(),
                data_offset,
                data_len_bytes,
                indptr_offset,
                indptr_len_bytes,
                indices_offset,
                indices_len_bytes,
            })
        }
    };

    let meta = DatasetMeta {
        version: CONTAINER_VERSION,
        n_points,
        spaces: space_meta,
        expr: expr_meta,
    };
    let json = serde_json::to_vec(&meta).context("serialize meta json")?;
    let json_end = 8 + json.len();
    let pad = (16 - (json_end % 16)) % 16;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
    }
    let mut file = File::create(path).with_context(|| format!("create: {}", path.display()))?;
    file.write_all(&(json.len() as u64).to_le_bytes())?;
    file.write_all(&json)?;
    file.write_all(&[0u8; 16][..pad])?;
    file.write_all(&blob)?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dense_expression_rows_follow_var_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dense.stviz");
        let spaces = [SpaceData {
            name: "spatial".into(),
            xy: vec![0.0, 0.0, 10.0, 5.0, 20.0, -5.0],
        }];
        let expr = ExprData::Dense {
            var_names: names(&["GAPDH", "ACTB"]),
            values: vec![1.0, 2.0, 3.0, 0.5, 0.0, 0.25],
        };
        write_dataset(&path, 3, &spaces, Some(&expr)).unwrap();

        let ds = Dataset::load(&path).unwrap();
        assert_eq!(ds.meta.n_points, 3);
        assert_eq!(ds.meta.spaces[0].bbox, [0.0, -5.0, 20.0, 5.0]);
        assert_eq!(ds.space_f32_2d(0).unwrap(), &[0.0, 0.0, 10.0, 5.0, 20.0, -5.0]);
        let actb = ds.find_gene("ACTB").unwrap();
        assert_eq!(ds.gene_vector(actb).unwrap(), vec![0.5, 0.0, 0.25]);
        assert_eq!(ds.find_gene("gapdh"), None);
    }

    #[test]
    fn csc_expression_fills_missing_cells_with_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("csc.stviz");
        let spaces = [SpaceData {
            name: "X_tsne".into(),
            xy: vec![0.0; 8],
        }];
        let expr = ExprData::Csc {
            var_names: names(&["A", "B"]),
            indptr: vec![0, 2, 3],
            indices: vec![0, 3, 1],
            data: vec![4.0, 1.5, 2.0],
        };
        write_dataset(&path, 4, &spaces, Some(&expr)).unwrap();

        let ds = Dataset::load(&path).unwrap();
        assert_eq!(ds.find_space("tsne"), Some(0));
        assert_eq!(ds.gene_vector(0).unwrap(), vec![4.0, 0.0, 0.0, 1.5]);
        assert_eq!(ds.gene_vector(1).unwrap(), vec![0.0, 2.0, 0.0, 0.0]);
        assert!(ds.gene_vector(2).is_err());
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.stviz");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(Dataset::load(&path).is_err());

        std::fs::write(&path, 1000u64.to_le_bytes()).unwrap();
        let err = Dataset::load(&path).err().unwrap();
        assert!(format!("{err:#}").contains("json_len"));
    }

    fn write_raw(path: &Path, meta: &str, blob: &[u8]) {
        let json = meta.as_bytes();
        let pad = (16 - ((8 + json.len()) % 16)) % 16;
        let mut bytes = (json.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(json);
        bytes.extend(std::iter::repeat(0u8).take(pad));
        bytes.extend_from_slice(blob);
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn oversized_blob_header_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.stviz");
        let blob = [0u8; 16];

        let huge_offset = format!(
            r#"{{"version":1,"n_points":2,"spaces":[{{"name":"spatial","dims":2,"offset":{},"len_bytes":16,"bbox":[0,0,1,1]}}],"expr":null}}"#,
            u64::MAX - 4
        );
        write_raw(&path, &huge_offset, &blob);
        let err = Dataset::load(&path).err().unwrap();
        assert!(format!("{err:#}").contains("out of bounds"));

        let huge_len = format!(
            r#"{{"version":1,"n_points":2,"spaces":[{{"name":"spatial","dims":2,"offset":0,"len_bytes":16,"bbox":[0,0,1,1]}}],
               "expr":{{"kind":"csc","n_genes":1,"var_names":["A"],"data_offset":0,"data_len_bytes":{}}}}}"#,
            u64::MAX
        );
        write_raw(&path, &huge_len, &blob);
        let err = Dataset::load(&path).err().unwrap();
        assert!(format!("{err:#}").contains("out of bounds"));
    }

    #[test]
    fn writer_rejects_mismatched_coordinates() {
        let dir = tempdir().unwrap();
        let spaces = [SpaceData {
            name: "spatial".into(),
            xy: vec![0.0; 5],
        }];
        assert!(write_dataset(&dir.path().join("bad.stviz"), 3, &spaces, None).is_err());
    }
}
