use crate::{
    config::DashboardConfig,
    export::{ExportLink, ExportState, Exporter},
    render::{render_layout, PlotStyle, ScatterPlot},
    selection::{GeneSelector, SelectError},
    store::{DataStore, LayoutKind},
    view::{DisplaySlot, ViewController},
};
use std::{path::Path, sync::Arc};
use tracing::info;

/// Selector, display slots and exporter bound to one loaded data store.
pub struct Dashboard {
    store: Arc<DataStore>,
    selector: GeneSelector,
    views: ViewController,
    exporter: Arc<Exporter>,
    primary_style: PlotStyle,
    export_state: ExportState,
    link: Option<ExportLink>,
}

impl Dashboard {
    /// Subscribes one slot per loaded layout and draws the default gene.
    pub fn new(
        store: Arc<DataStore>,
        config: &DashboardConfig,
        project_dir: &Path,
    ) -> anyhow::Result<Self> {
        let selector = GeneSelector::new(store.vocabulary().to_vec(), &config.default_gene)?;
        let primary_style = PlotStyle::from_config(&config.physical, &config.figure);

        let mut views = ViewController::new();
        views.subscribe(DisplaySlot::new(LayoutKind::Physical, primary_style.clone()));
        if let (Some(cfg), Some(_)) = (config.embedding.as_ref(), store.embedding()) {
            views.subscribe(DisplaySlot::new(
                LayoutKind::Embedding,
                PlotStyle::from_config(cfg, &config.figure),
            ));
        }
        views.publish(selector.current(), &store);

        Ok(Self {
            store,
            selector,
            views,
            exporter: Arc::new(Exporter::from_config(config, project_dir)),
            primary_style,
            export_state: ExportState::Idle,
            link: None,
        })
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn selector(&self) -> &GeneSelector {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut GeneSelector {
        &mut self.selector
    }

    /// Returns whether the displayed gene changed.
    pub fn select_gene(&mut self, name: &str) -> Result<bool, SelectError> {
        let Some(change) = self.selector.select(name)? else {
            return Ok(false);
        };
        info!(from = %change.previous, to = %change.current, "selection changed");
        self.views.publish(&change.current, &self.store);
        Ok(true)
    }

    pub fn slots(&self) -> &[DisplaySlot] {
        self.views.slots()
    }

    /// Fresh plot of the physical layout for the current gene.
    pub fn render_primary(&self) -> anyhow::Result<ScatterPlot> {
        render_layout(self.selector.current(), self.store.physical(), &self.primary_style)
    }

    pub fn exporter(&self) -> &Arc<Exporter> {
        &self.exporter
    }

    /// Starts exporting the primary plot on a worker thread. `Ok(false)`
    /// while a previous export is still running.
    pub fn start_save(&mut self) -> anyhow::Result<bool> {
        if self.export_state.is_busy() {
            return Ok(false);
        }
        let plot = self.render_primary()?;
        Ok(self.export_state.start(self.exporter.clone(), plot))
    }

    pub fn is_saving(&self) -> bool {
        self.export_state.is_busy()
    }

    /// Gene of the export in flight.
    pub fn saving_gene(&self) -> Option<&str> {
        self.export_state.gene()
    }

    /// Collects a finished export. On success the link replaces the previous
    /// one; on failure the previous link stays.
    pub fn poll_save(&mut self) -> Option<Result<&ExportLink, String>> {
        match self.export_state.poll()? {
            Ok(link) => Some(Ok(self.publish_link(link))),
            Err(msg) => Some(Err(msg)),
        }
    }

    /// Replaces the previous link. A link for a gene that is no longer
    /// selected is still published; it names the gene it was rendered from.
    fn publish_link(&mut self, link: ExportLink) -> &ExportLink {
        self.link.insert(link)
    }

    pub fn link(&self) -> Option<&ExportLink> {
        self.link.as_ref()
    }
}

/// Load data and build the dashboard in one step.
pub fn open(config: &DashboardConfig, project_dir: &Path) -> anyhow::Result<Dashboard> {
    let store = DataStore::open(config, project_dir)?;
    Dashboard::new(Arc::new(store), config, project_dir)
}
