use crate::{
    config::{resolve_path, DashboardConfig},
    data::Dataset,
};
use anyhow::{anyhow, Context as _};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayoutKind {
    Physical,
    Embedding,
}

impl LayoutKind {
    pub fn label(self) -> &'static str {
        match self {
            LayoutKind::Physical => "spatial",
            LayoutKind::Embedding => "t-SNE",
        }
    }
}

/// One coordinate space plus the expression matrix that indexes its points.
pub struct Layout {
    kind: LayoutKind,
    source: PathBuf,
    dataset: Arc<Dataset>,
    space_idx: usize,
}

impl Layout {
    pub fn open(kind: LayoutKind, path: &Path, space: &str) -> anyhow::Result<Self> {
        let dataset = Dataset::load(path).with_context(|| format!("load {} layout", kind.label()))?;
        Self::from_dataset(kind, path, dataset, space)
    }

    pub fn from_dataset(
        kind: LayoutKind,
        path: &Path,
        dataset: Arc<Dataset>,
        space: &str,
    ) -> anyhow::Result<Self> {
        let space_idx = dataset.find_space(space).ok_or_else(|| {
            let names: Vec<&str> = dataset.meta.spaces.iter().map(|s| s.name.as_str()).collect();
            anyhow!("no space matching '{space}' in {} (has {names:?})", path.display())
        })?;
        if dataset.meta.spaces[space_idx].dims != 2 {
            return Err(anyhow!("space '{space}' is not 2-D"));
        }
        if !dataset.has_expr() {
            return Err(anyhow!("{} has no expression data", path.display()));
        }
        Ok(Self {
            kind,
            source: path.to_path_buf(),
            dataset,
            space_idx,
        })
    }

    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn space_name(&self) -> &str {
        &self.dataset.meta.spaces[self.space_idx].name
    }

    pub fn n_units(&self) -> usize {
        self.dataset.meta.n_points as usize
    }

    /// Interleaved x,y; length is `2 * n_units()`.
    pub fn coords(&self) -> anyhow::Result<&[f32]> {
        self.dataset.space_f32_2d(self.space_idx)
    }

    pub fn vocabulary(&self) -> &[String] {
        self.dataset.var_names()
    }

    /// Exact-name lookup; `Ok(None)` when the gene is not in this layout.
    pub fn expression(&self, gene: &str) -> anyhow::Result<Option<Vec<f32>>> {
        let Some(gid) = self.dataset.find_gene(gene) else {
            return Ok(None);
        };
        self.dataset
            .gene_vector(gid)
            .map(Some)
            .with_context(|| format!("expression of {gene} in {}", self.kind.label()))
    }
}

/// All layouts, loaded once and shared read-only.
pub struct DataStore {
    physical: Layout,
    embedding: Option<Layout>,
}

impl DataStore {
    pub fn new(physical: Layout, embedding: Option<Layout>) -> Self {
        Self {
            physical,
            embedding,
        }
    }

    pub fn open(config: &DashboardConfig, project_dir: &Path) -> anyhow::Result<Self> {
        let physical_path = resolve_path(project_dir, &config.physical.path);
        let physical = Layout::open(LayoutKind::Physical, &physical_path, &config.physical.space)?;
        if physical.vocabulary().is_empty() {
            return Err(anyhow!("{} lists no genes", physical_path.display()));
        }
        let embedding = match config.embedding.as_ref() {
            Some(cfg) => {
                let path = resolve_path(project_dir, &cfg.path);
                Some(Layout::open(LayoutKind::Embedding, &path, &cfg.space)?)
            }
            None => None,
        };
        info!(
            spots = physical.n_units(),
            genes = physical.vocabulary().len(),
            embedding_cells = embedding.as_ref().map(|l| l.n_units()),
            "data store ready"
        );
        Ok(Self::new(physical, embedding))
    }

    pub fn physical(&self) -> &Layout {
        &self.physical
    }

    pub fn embedding(&self) -> Option<&Layout> {
        self.embedding.as_ref()
    }

    pub fn layout(&self, kind: LayoutKind) -> Option<&Layout> {
        match kind {
            LayoutKind::Physical => Some(&self.physical),
            LayoutKind::Embedding => self.embedding.as_ref(),
        }
    }

    /// Gene names offered by the selector.
    pub fn vocabulary(&self) -> &[String] {
        self.physical.vocabulary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{write_demo, DemoOptions, PHYSICAL_ONLY_GENE};
    use tempfile::tempdir;

    fn demo_config(dir: &Path) -> DashboardConfig {
        let paths = write_demo(dir, &DemoOptions::small()).unwrap();
        let mut config = DashboardConfig::default();
        config.physical.path = paths.physical;
        if let Some(e) = config.embedding.as_mut() {
            e.path = paths.embedding;
        }
        config
    }

    #[test]
    fn every_vocabulary_gene_matches_unit_count() {
        let dir = tempdir().unwrap();
        let store = DataStore::open(&demo_config(dir.path()), dir.path()).unwrap();
        for kind in [LayoutKind::Physical, LayoutKind::Embedding] {
            let layout = store.layout(kind).unwrap();
            assert_eq!(layout.coords().unwrap().len(), layout.n_units() * 2);
            for gene in layout.vocabulary() {
                let v = layout.expression(gene).unwrap().unwrap();
                assert_eq!(v.len(), layout.n_units(), "{gene} in {kind:?}");
            }
        }
        assert_ne!(store.physical().n_units(), store.embedding().unwrap().n_units());
    }

    #[test]
    fn layouts_keep_independent_vocabularies() {
        let dir = tempdir().unwrap();
        let store = DataStore::open(&demo_config(dir.path()), dir.path()).unwrap();
        assert!(store.physical().expression(PHYSICAL_ONLY_GENE).unwrap().is_some());
        let embedding = store.embedding().unwrap();
        assert!(!embedding.vocabulary().iter().any(|g| g == PHYSICAL_ONLY_GENE));
        assert!(embedding.expression(PHYSICAL_ONLY_GENE).unwrap().is_none());
        assert!(store.physical().expression("UNKNOWNGENE").unwrap().is_none());
    }

    #[test]
    fn single_view_variant_has_no_embedding() {
        let dir = tempdir().unwrap();
        let mut config = demo_config(dir.path());
        config.embedding = None;
        let store = DataStore::open(&config, dir.path()).unwrap();
        assert!(store.layout(LayoutKind::Embedding).is_none());
        assert_eq!(store.vocabulary(), store.physical().vocabulary());
    }

    #[test]
    fn unknown_space_name_is_reported() {
        let dir = tempdir().unwrap();
        let mut config = demo_config(dir.path());
        config.physical.space = "umap".into();
        let err = DataStore::open(&config, dir.path()).err().unwrap();
        assert!(format!("{err:#}").contains("umap"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(DataStore::open(&DashboardConfig::default(), dir.path()).is_err());
    }
}
