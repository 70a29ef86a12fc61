use crate::color::Colormap;
use anyhow::Context as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_FILE: &str = "spatial-recon.json";
const DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub title: String,
    pub default_gene: String,
    #[serde(deserialize_with = "physical_layout")]
    pub physical: LayoutConfig,
    /// `null` runs the single-view variant.
    #[serde(deserialize_with = "embedding_layout")]
    pub embedding: Option<LayoutConfig>,
    pub figure: FigureConfig,
    pub export: ExportConfig,
    /// Raster density of the on-screen plots.
    pub display_dpi: f32,
}

/// Written out in full; read through [`LayoutPatch`] so omitted keys take
/// the defaults of the layout being configured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutConfig {
    pub path: PathBuf,
    /// Case-insensitive substring of the space name inside the container.
    pub space: String,
    pub x_label: String,
    pub y_label: String,
    pub colormap: Colormap,
    /// Marker area in pt^2.
    pub marker_area: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutPatch {
    path: Option<PathBuf>,
    space: Option<String>,
    x_label: Option<String>,
    y_label: Option<String>,
    colormap: Option<Colormap>,
    marker_area: Option<f32>,
}

impl LayoutPatch {
    fn over(self, base: LayoutConfig) -> LayoutConfig {
        LayoutConfig {
            path: self.path.unwrap_or(base.path),
            space: self.space.unwrap_or(base.space),
            x_label: self.x_label.unwrap_or(base.x_label),
            y_label: self.y_label.unwrap_or(base.y_label),
            colormap: self.colormap.unwrap_or(base.colormap),
            marker_area: self.marker_area.unwrap_or(base.marker_area),
        }
    }
}

fn physical_layout<'de, D: Deserializer<'de>>(d: D) -> Result<LayoutConfig, D::Error> {
    Ok(LayoutPatch::deserialize(d)?.over(LayoutConfig::physical()))
}

fn embedding_layout<'de, D: Deserializer<'de>>(d: D) -> Result<Option<LayoutConfig>, D::Error> {
    Ok(Option::<LayoutPatch>::deserialize(d)?.map(|p| p.over(LayoutConfig::embedding())))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureConfig {
    pub inches: f32,
    pub font_scale: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub filename: String,
    pub dpi: f32,
}

impl LayoutConfig {
    pub fn physical() -> Self {
        Self {
            path: PathBuf::from(DATA_DIR).join("spatial.stviz"),
            space: "spatial".into(),
            x_label: "X (px)".into(),
            y_label: "Y (px)".into(),
            colormap: Colormap::Viridis,
            marker_area: 6.0,
        }
    }

    pub fn embedding() -> Self {
        Self {
            path: PathBuf::from(DATA_DIR).join("tsne.stviz"),
            space: "tsne".into(),
            x_label: "TSNE-1".into(),
            y_label: "TSNE-2".into(),
            colormap: Colormap::Seurat,
            marker_area: 10.0,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            title: "Spatial reconstruction".into(),
            default_gene: "GAPDH".into(),
            physical: LayoutConfig::physical(),
            embedding: Some(LayoutConfig::embedding()),
            figure: FigureConfig::default(),
            export: ExportConfig::default(),
            display_dpi: 110.0,
        }
    }
}

impl Default for FigureConfig {
    fn default() -> Self {
        Self {
            inches: 3.5,
            font_scale: 1.5,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            filename: "plot.png".into(),
            dpi: 300.0,
        }
    }
}

impl DashboardConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("parse config json")
    }

    /// Reads `spatial-recon.json` from `project_dir`, or returns the defaults.
    pub fn load(project_dir: &Path) -> anyhow::Result<Self> {
        let path = project_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read: {}", path.display()))?;
        let config = Self::from_json(&text).with_context(|| format!("config: {}", path.display()))?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn export_path(&self, project_dir: &Path) -> PathBuf {
        resolve_path(project_dir, &self.export.output_dir).join(&self.export.filename)
    }
}

pub fn resolve_path(project_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}

fn is_project_dir(dir: &Path) -> bool {
    dir.join(CONFIG_FILE).exists() || dir.join(DATA_DIR).is_dir()
}

/// Current directory if it looks like a project, else the nearest ancestor of
/// the executable that does.
pub fn resolve_project_dir() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if is_project_dir(&cwd) {
        return cwd;
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(mut dir) = exe_path.parent().map(|p| p.to_path_buf()) {
            #[cfg(target_os = "macos")]
            if let Some(contents_dir) = dir.parent() {
                let resources_dir = contents_dir.join("Resources");
                if is_project_dir(&resources_dir) {
                    return resources_dir;
                }
            }
            for _ in 0..6 {
                if is_project_dir(&dir) {
                    return dir;
                }
                let Some(parent) = dir.parent() else {
                    break;
                };
                dir = parent.to_path_buf();
            }
        }
    }
    cwd
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_two_view_defaults() {
        let dir = tempdir().unwrap();
        let config = DashboardConfig::load(dir.path()).unwrap();
        assert_eq!(config, DashboardConfig::default());
        assert_eq!(config.default_gene, "GAPDH");
        assert_eq!(config.export.dpi, 300.0);
        let embedding = config.embedding.unwrap();
        assert_eq!(embedding.x_label, "TSNE-1");
        assert_eq!(embedding.colormap, Colormap::Seurat);
    }

    #[test]
    fn null_embedding_selects_single_view_variant() {
        let config = DashboardConfig::from_json(
            r#"{ "default_gene": "ACTB", "embedding": null, "export": { "filename": "out.png" } }"#,
        )
        .unwrap();
        assert!(config.embedding.is_none());
        assert_eq!(config.default_gene, "ACTB");
        assert_eq!(config.export.filename, "out.png");
        assert_eq!(config.export.dpi, 300.0);
        assert_eq!(config.physical, LayoutConfig::physical());
    }

    #[test]
    fn layout_block_fills_optional_fields() {
        let config = DashboardConfig::from_json(
            r#"{ "physical": { "path": "/abs/puck.stviz", "space": "puck", "x_label": "x", "y_label": "y" } }"#,
        )
        .unwrap();
        assert_eq!(config.physical.colormap, Colormap::Viridis);
        assert_eq!(config.physical.marker_area, 6.0);
        let dir = Path::new("/project");
        assert_eq!(resolve_path(dir, &config.physical.path), PathBuf::from("/abs/puck.stviz"));
        assert_eq!(config.export_path(dir), PathBuf::from("/project/./plot.png"));
    }

    #[test]
    fn partial_layout_blocks_keep_per_layout_defaults() {
        let config = DashboardConfig::from_json(
            r#"{ "physical": { "path": "p.stviz" }, "embedding": { "path": "e.stviz", "x_label": "tSNE 1" } }"#,
        )
        .unwrap();
        assert_eq!(config.physical.path, PathBuf::from("p.stviz"));
        assert_eq!(config.physical.space, "spatial");
        assert_eq!(config.physical.x_label, "X (px)");

        let embedding = config.embedding.unwrap();
        assert_eq!(embedding.path, PathBuf::from("e.stviz"));
        assert_eq!(embedding.x_label, "tSNE 1");
        assert_eq!(embedding.y_label, "TSNE-2");
        assert_eq!(embedding.space, "tsne");
        assert_eq!(embedding.colormap, Colormap::Seurat);
        assert_eq!(embedding.marker_area, 10.0);
    }

    #[test]
    fn empty_embedding_block_is_the_embedding_default() {
        let config = DashboardConfig::from_json(r#"{ "embedding": {} }"#).unwrap();
        assert_eq!(config.embedding, Some(LayoutConfig::embedding()));
    }

    #[test]
    fn saved_config_reads_back_unchanged() {
        let mut config = DashboardConfig::default();
        config.physical.colormap = Colormap::Magma;
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(DashboardConfig::from_json(&text).unwrap(), config);
    }

    #[test]
    fn misspelled_layout_key_is_an_error() {
        assert!(DashboardConfig::from_json(r#"{ "physical": { "colourmap": "magma" } }"#).is_err());
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();
        assert!(DashboardConfig::load(dir.path()).is_err());
    }
}
