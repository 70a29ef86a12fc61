use crate::{
    config::DashboardConfig,
    render::{encode_png, rasterize, to_svg, ScatterPlot},
};
use anyhow::Context as _;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};
use tracing::info;

pub const LINK_TEXT: &str = "Right click - open in a new tab/window";

/// A published download link for the last export.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportLink {
    pub path: PathBuf,
    /// Title of the plot the file was rendered from.
    pub title: String,
    /// `data:image/png;base64,...`
    pub href: String,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
}

impl ExportLink {
    pub fn html(&self) -> String {
        format!(r#"<a href="{}" target="_blank">{LINK_TEXT}</a>"#, self.href)
    }
}

/// Writes plots to one fixed file. Exports are serialised on an internal lock.
pub struct Exporter {
    path: PathBuf,
    dpi: f32,
    lock: Mutex<()>,
}

impl Exporter {
    pub fn new(path: PathBuf, dpi: f32) -> Self {
        Self {
            path,
            dpi,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &DashboardConfig, project_dir: &Path) -> Self {
        Self::new(config.export_path(project_dir), config.export.dpi)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render at export DPI, overwrite the file, read it back and encode it.
    pub fn export(&self, plot: &ScatterPlot) -> anyhow::Result<ExportLink> {
        let img = rasterize(&to_svg(plot), self.dpi).context("rasterize plot")?;
        let png = encode_png(&img, self.dpi)?;

        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create dir: {}", parent.display()))?;
            }
        }
        std::fs::write(&self.path, &png)
            .with_context(|| format!("write: {}", self.path.display()))?;
        let written = std::fs::read(&self.path)
            .with_context(|| format!("read back: {}", self.path.display()))?;

        let href = format!("data:image/png;base64,{}", STANDARD.encode(&written));
        info!(
            gene = %plot.title,
            width = img.width(),
            height = img.height(),
            bytes = written.len(),
            "exported {}",
            self.path.display()
        );
        Ok(ExportLink {
            path: self.path.clone(),
            title: plot.title.clone(),
            href,
            width: img.width(),
            height: img.height(),
            bytes: written.len(),
        })
    }
}

/// Idle, or one export running on a worker thread.
#[derive(Default)]
pub enum ExportState {
    #[default]
    Idle,
    Exporting {
        gene: String,
        handle: thread::JoinHandle<Result<ExportLink, String>>,
    },
}

impl ExportState {
    pub fn is_busy(&self) -> bool {
        matches!(self, ExportState::Exporting { .. })
    }

    pub fn gene(&self) -> Option<&str> {
        match self {
            ExportState::Exporting { gene, .. } => Some(gene),
            ExportState::Idle => None,
        }
    }

    /// Starts an export unless one is already running.
    pub fn start(&mut self, exporter: Arc<Exporter>, plot: ScatterPlot) -> bool {
        if self.is_busy() {
            return false;
        }
        let gene = plot.title.clone();
        let handle = thread::spawn(move || exporter.export(&plot).map_err(|e| format!("{e:#}")));
        *self = ExportState::Exporting { gene, handle };
        true
    }

    /// Returns the finished result and goes back to idle.
    pub fn poll(&mut self) -> Option<Result<ExportLink, String>> {
        let finished = match self {
            ExportState::Exporting { handle, .. } => handle.is_finished(),
            ExportState::Idle => false,
        };
        if !finished {
            return None;
        }
        match std::mem::take(self) {
            ExportState::Exporting { handle, .. } => Some(
                handle
                    .join()
                    .unwrap_or_else(|_| Err("export worker panicked".to_string())),
            ),
            ExportState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{scatter, PlotStyle};
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn plot(gene: &str) -> ScatterPlot {
        let config = DashboardConfig::default();
        let style = PlotStyle::from_config(&config.physical, &config.figure);
        scatter(gene, &[0.0, 0.0, 2.0, 1.0, 4.0, 3.0], Some(&[0.0, 1.0, 2.0]), &style).unwrap()
    }

    #[test]
    fn export_writes_decodable_png_and_matching_link() {
        let dir = tempdir().unwrap();
        let exporter = Exporter::new(dir.path().join("plot.png"), 72.0);
        let link = exporter.export(&plot("GAPDH")).unwrap();

        assert_eq!(link.title, "GAPDH");
        let bytes = std::fs::read(dir.path().join("plot.png")).unwrap();
        assert_eq!(link.bytes, bytes.len());
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (252, 252));

        let encoded = link.href.strip_prefix("data:image/png;base64,").unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), bytes);
        assert!(link.html().contains(r#"target="_blank""#));
        assert!(link.html().contains(LINK_TEXT));
    }

    #[test]
    fn second_export_overwrites_the_same_file() {
        let dir = tempdir().unwrap();
        let exporter = Exporter::new(dir.path().join("out").join("plot.png"), 36.0);
        let first = exporter.export(&plot("GAPDH")).unwrap();
        let second = exporter.export(&plot("ACTB")).unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(second.title, "ACTB");
        let on_disk = std::fs::read(&second.path).unwrap();
        assert_eq!(second.bytes, on_disk.len());
        assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 1);
    }

    #[test]
    fn unwritable_target_is_reported() {
        let dir = tempdir().unwrap();
        // a directory where the file should go
        let target = dir.path().join("plot.png");
        std::fs::create_dir(&target).unwrap();
        let err = Exporter::new(target, 36.0).export(&plot("GAPDH")).err().unwrap();
        assert!(format!("{err:#}").contains("write"));
    }

    #[test]
    fn worker_state_returns_to_idle_after_finishing() {
        let dir = tempdir().unwrap();
        let exporter = Arc::new(Exporter::new(dir.path().join("plot.png"), 36.0));
        let mut state = ExportState::Idle;
        assert!(state.start(exporter.clone(), plot("VIM")));
        assert!(!state.start(exporter, plot("ACTB")));
        assert_eq!(state.gene(), Some("VIM"));

        let deadline = Instant::now() + Duration::from_secs(30);
        let result = loop {
            if let Some(result) = state.poll() {
                break result;
            }
            assert!(Instant::now() < deadline, "export did not finish");
            std::thread::sleep(Duration::from_millis(10));
        };
        assert_eq!(result.unwrap().title, "VIM");
        assert!(!state.is_busy());
    }
}
