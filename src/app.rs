use crate::{
    config::{resolve_path, DashboardConfig},
    dashboard::{self, Dashboard},
    export::LINK_TEXT,
    mock::{write_demo, DemoOptions},
    render::{rasterize, to_svg},
    view::DisplaySlot,
};
use eframe::egui;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{error, info, warn};

const GENE_LIST_LIMIT: usize = 120;

struct SlotTexture {
    revision: u64,
    texture: Option<egui::TextureHandle>,
}

pub struct ReconApp {
    project_dir: PathBuf,
    config: DashboardConfig,
    dashboard: Option<Dashboard>,

    textures: HashMap<usize, SlotTexture>,

    open_path: String,
    status: Option<String>,
    last_error: Option<String>,
}

impl ReconApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, config: DashboardConfig, project_dir: PathBuf) -> Self {
        let open_path = resolve_path(&project_dir, &config.physical.path)
            .display()
            .to_string();
        let mut app = Self {
            project_dir,
            config,
            dashboard: None,
            textures: HashMap::new(),
            open_path,
            status: None,
            last_error: None,
        };
        if let Err(e) = app.load() {
            warn!("no data loaded at startup: {e:#}");
            app.last_error = Some(format!("Load failed: {e:#}"));
        }
        app
    }

    fn load(&mut self) -> anyhow::Result<()> {
        let dash = dashboard::open(&self.config, &self.project_dir)?;
        info!(gene = dash.selector().current(), "dashboard ready");
        self.dashboard = Some(dash);
        self.textures.clear();
        self.last_error = None;
        Ok(())
    }

    fn load_physical(&mut self, path: &Path) -> anyhow::Result<()> {
        self.config.physical.path = path.to_path_buf();
        if let Some(e) = self.config.embedding.as_ref() {
            let embedding = resolve_path(&self.project_dir, &e.path);
            if !embedding.exists() {
                warn!("{} not found, showing the physical layout only", embedding.display());
                self.config.embedding = None;
            }
        }
        self.load()
    }

    fn open_dataset_dialog(&mut self) -> anyhow::Result<()> {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("stviz", &["stviz"])
            .set_title("Open .stviz")
            .set_directory(self.project_dir.clone())
            .pick_file()
        else {
            return Ok(());
        };
        self.open_path = path.display().to_string();
        self.load_physical(&path)
    }

    fn generate_demo(&mut self) -> anyhow::Result<()> {
        let dir = self.project_dir.join("data");
        std::fs::create_dir_all(&dir)?;
        let paths = write_demo(&dir, &DemoOptions::default())?;
        self.config.physical.path = paths.physical;
        match self.config.embedding.as_mut() {
            Some(e) => e.path = paths.embedding,
            None => {
                let mut e = crate::config::LayoutConfig::embedding();
                e.path = paths.embedding;
                self.config.embedding = Some(e);
            }
        }
        self.load()?;
        self.status = Some(format!("Demo dataset written to {}", dir.display()));
        Ok(())
    }

    fn poll_export(&mut self) {
        let Some(dash) = self.dashboard.as_mut() else {
            return;
        };
        match dash.poll_save() {
            None => {}
            Some(Ok(link)) => {
                self.status = Some(format!(
                    "Saved {} ({}x{}, {} bytes)",
                    link.path.display(),
                    link.width,
                    link.height,
                    link.bytes
                ));
            }
            Some(Err(msg)) => {
                error!("export failed: {msg}");
                self.last_error = Some(format!("Save failed: {msg}"));
            }
        }
    }

    fn start_export(&mut self) {
        let Some(dash) = self.dashboard.as_mut() else {
            return;
        };
        match dash.start_save() {
            Ok(true) => {
                self.status = None;
                self.last_error = None;
            }
            Ok(false) => {}
            Err(e) => self.last_error = Some(format!("Save failed: {e:#}")),
        }
    }

    fn ui_setup(&mut self, ui: &mut egui::Ui) {
        ui.heading(&self.config.title);
        ui.separator();
        ui.label("No dataset loaded.");

        if ui
            .button("Open .stviz")
            .on_hover_text("Open the physical layout dataset.")
            .clicked()
        {
            if let Err(e) = self.open_dataset_dialog() {
                self.last_error = Some(format!("Open failed: {e:#}"));
            }
        }
        ui.horizontal(|ui| {
            let edit = egui::TextEdit::singleline(&mut self.open_path)
                .desired_width(320.0)
                .hint_text("Path to .stviz");
            ui.add(edit);
            if ui.button("Load path").clicked() {
                if self.open_path.trim().is_empty() {
                    self.last_error = Some("Path is empty.".to_string());
                } else {
                    let path = PathBuf::from(self.open_path.trim());
                    if let Err(e) = self.load_physical(&path) {
                        self.last_error = Some(format!("Load failed: {e:#}"));
                    }
                }
            }
        });
        if ui
            .button("Generate demo dataset")
            .on_hover_text("Write synthetic spatial and t-SNE data into ./data and load it.")
            .clicked()
        {
            if let Err(e) = self.generate_demo() {
                self.last_error = Some(format!("Demo failed: {e:#}"));
            }
        }
    }

    fn ui_gene_panel(&mut self, ui: &mut egui::Ui) {
        let Some(dash) = self.dashboard.as_mut() else {
            return;
        };
        ui.heading(&self.config.title);
        ui.separator();

        let mut apply: Option<String> = None;
        ui.horizontal(|ui| {
            ui.label("Gene");
            let resp = ui.text_edit_singleline(&mut dash.selector_mut().query);
            if resp.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                let query = dash.selector().query.clone();
                match dash.selector().resolve(&query) {
                    Some(name) => apply = Some(name.to_string()),
                    None => self.last_error = Some(format!("unknown gene: {}", query.trim())),
                }
            }
        });
        ui.label(format!(
            "Selected: {} ({} genes)",
            dash.selector().current(),
            dash.selector().vocabulary().len()
        ));

        let selector = dash.selector();
        let matches = selector.matches(&selector.query, GENE_LIST_LIMIT);
        let row_height = ui.spacing().interact_size.y.max(20.0);
        egui::ScrollArea::vertical()
            .max_height(row_height * 14.0 + 8.0)
            .show(ui, |ui| {
                for &name in &matches.names {
                    if ui
                        .selectable_label(name == selector.current(), name)
                        .clicked()
                    {
                        apply = Some(name.to_string());
                    }
                }
            });
        if matches.total == 0 {
            ui.label("No matches.");
        } else if matches.total > matches.names.len() {
            ui.label(format!(
                "Showing {} of {} matches.",
                matches.names.len(),
                matches.total
            ));
        }

        if let Some(gene) = apply {
            match dash.select_gene(&gene) {
                Ok(_) => self.last_error = None,
                Err(e) => self.last_error = Some(e.to_string()),
            }
        }

        ui.separator();
        let save = ui
            .add_enabled(!dash.is_saving(), egui::Button::new("Save"))
            .on_hover_text(format!(
                "Render the spatial plot at export resolution and write {}",
                dash.exporter().path().display()
            ));
        if let Some(gene) = dash.saving_gene() {
            ui.colored_label(
                egui::Color32::from_rgb(240, 200, 90),
                format!("Saving {gene}..."),
            );
        }
        if let Some(link) = dash.link() {
            ui.add(egui::Hyperlink::from_label_and_url(LINK_TEXT, &link.href).open_in_new_tab(true));
            ui.label(format!("{} ({})", link.path.display(), link.title));
            if ui.button("Copy HTML").clicked() {
                ui.ctx().copy_text(link.html());
            }
        }
        if let Some(status) = self.status.as_ref() {
            ui.label(status);
        }

        ui.separator();
        ui.label("Loaded data");
        let store = dash.store();
        for layout in std::iter::once(store.physical()).chain(store.embedding()) {
            ui.label(format!(
                "{}: {} points, {} genes",
                layout.kind().label(),
                layout.n_units(),
                layout.vocabulary().len()
            ))
            .on_hover_text(format!(
                "{} (space {})",
                layout.source().display(),
                layout.space_name()
            ));
        }

        if save.clicked() {
            self.start_export();
        }
    }

    fn slot_texture(&mut self, ctx: &egui::Context, idx: usize, slot: &DisplaySlot) -> Option<egui::TextureHandle> {
        if let Some(cached) = self.textures.get(&idx) {
            if cached.revision == slot.revision() {
                return cached.texture.clone();
            }
        }
        let texture = slot.artifact().and_then(|plot| {
            match rasterize(&to_svg(plot), self.config.display_dpi) {
                Ok(img) => {
                    let size = [img.width() as usize, img.height() as usize];
                    let image = egui::ColorImage::from_rgba_unmultiplied(size, img.as_raw());
                    Some(ctx.load_texture(
                        format!("slot-{idx}"),
                        image,
                        egui::TextureOptions::LINEAR,
                    ))
                }
                Err(e) => {
                    error!("display raster failed: {e:#}");
                    None
                }
            }
        });
        self.textures.insert(
            idx,
            SlotTexture {
                revision: slot.revision(),
                texture: texture.clone(),
            },
        );
        texture
    }

    fn ui_plots(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let Some(dash) = self.dashboard.take() else {
            return;
        };
        ui.horizontal_top(|ui| {
            for (idx, slot) in dash.slots().iter().enumerate() {
                ui.vertical(|ui| {
                    match self.slot_texture(ctx, idx, slot) {
                        Some(tex) => {
                            let size = tex.size_vec2();
                            let avail = ui.available_width().max(64.0);
                            let per_slot = avail / (dash.slots().len() - idx) as f32;
                            let scale = (per_slot / size.x).min(1.0);
                            ui.image((tex.id(), size * scale));
                        }
                        None => {
                            ui.label(format!("No {} plot.", slot.kind().label()));
                        }
                    }
                    if let Some(note) = slot.note() {
                        ui.colored_label(egui::Color32::from_rgb(240, 200, 90), note);
                    }
                });
            }
        });
        self.dashboard = Some(dash);
    }
}

impl eframe::App for ReconApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_export();

        egui::SidePanel::left("left_panel")
            .resizable(true)
            .default_width(300.0)
            .max_width(480.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().auto_shrink([false; 2]).show(ui, |ui| {
                    if self.dashboard.is_some() {
                        self.ui_gene_panel(ui);
                    } else {
                        self.ui_setup(ui);
                    }
                    if let Some(msg) = self.last_error.as_ref() {
                        ui.colored_label(egui::Color32::RED, msg);
                    }
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.dashboard.is_some() {
                self.ui_plots(ui, ctx);
            } else {
                ui.centered_and_justified(|ui| {
                    ui.label("Open a .stviz dataset or generate the demo data.");
                });
            }
        });

        if self.dashboard.as_ref().is_some_and(Dashboard::is_saving) {
            ctx.request_repaint_after(Duration::from_millis(50));
        }
    }
}
