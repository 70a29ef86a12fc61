use crate::{
    render::{render_layout, PlotStyle, ScatterPlot},
    store::{DataStore, LayoutKind},
};
use std::sync::Arc;
use tracing::warn;

/// Something that reacts to a new gene selection.
pub trait SelectionSubscriber {
    fn on_gene_changed(&mut self, gene: &str, store: &DataStore);
}

/// Holds the artifact currently shown for one layout.
pub struct DisplaySlot {
    kind: LayoutKind,
    style: PlotStyle,
    artifact: Option<Arc<ScatterPlot>>,
    revision: u64,
    note: Option<String>,
}

impl DisplaySlot {
    pub fn new(kind: LayoutKind, style: PlotStyle) -> Self {
        Self {
            kind,
            style,
            artifact: None,
            revision: 0,
            note: None,
        }
    }

    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    pub fn artifact(&self) -> Option<&Arc<ScatterPlot>> {
        self.artifact.as_ref()
    }

    /// Bumped on every replacement, for change detection by the UI.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Missing-gene or render-error text for this slot.
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}

impl SelectionSubscriber for DisplaySlot {
    fn on_gene_changed(&mut self, gene: &str, store: &DataStore) {
        self.revision = self.revision.wrapping_add(1);
        let Some(layout) = store.layout(self.kind) else {
            self.artifact = None;
            self.note = Some(format!("no {} layout loaded", self.kind.label()));
            return;
        };
        match render_layout(gene, layout, &self.style) {
            Ok(plot) => {
                self.note = if plot.is_degenerate() {
                    warn!(gene, layout = self.kind.label(), "gene not found, plotting without colour");
                    Some(format!("{gene} not found in {} data", self.kind.label()))
                } else {
                    None
                };
                self.artifact = Some(Arc::new(plot));
            }
            Err(e) => {
                warn!(gene, layout = self.kind.label(), "render failed: {e:#}");
                self.artifact = None;
                self.note = Some(format!("{e:#}"));
            }
        }
    }
}

/// Notifies subscribers synchronously, in registration order.
pub struct ViewController<S = DisplaySlot> {
    subscribers: Vec<S>,
}

impl<S: SelectionSubscriber> ViewController<S> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, subscriber: S) {
        self.subscribers.push(subscriber);
    }

    pub fn publish(&mut self, gene: &str, store: &DataStore) {
        for s in &mut self.subscribers {
            s.on_gene_changed(gene, store);
        }
    }

    pub fn slots(&self) -> &[S] {
        &self.subscribers
    }
}

impl<S: SelectionSubscriber> Default for ViewController<S> {
    fn default() -> Self {
        Self::new()
    }
}
