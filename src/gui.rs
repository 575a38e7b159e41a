use crate::app::{Orchestrator, RunOptions};
use crate::config::{Config, LayoutDensity};
use crate::control;
use crate::overlay::{Anchor, DrawCommand, Frame, Geometry, Point};
use crate::settings::{SettingsDialog, MAX_REFRESH_MS, MIN_REFRESH_MS, THEME_NAMES};
use crate::theme::{Rgb, Theme};
use crate::updater::{self, UpdateDescriptor};
use anyhow::Result;
use eframe::egui;
use parking_lot::Mutex;
use poll_promise::Promise;
use std::sync::Arc;
use std::time::Instant;

fn color(c: Rgb) -> egui::Color32 {
    egui::Color32::from_rgb(c.0, c.1, c.2)
}

fn color_alpha(c: Rgb, opacity: f32) -> egui::Color32 {
    egui::Color32::from_rgba_unmultiplied(c.0, c.1, c.2, (opacity.clamp(0.0, 1.0) * 255.0) as u8)
}

#[derive(Debug, Clone, PartialEq)]
enum InstallStage {
    Downloading,
    Verifying,
    Launching,
    Done,
    Failed(String),
}

#[derive(Debug, Clone)]
struct InstallProgress {
    percent: f32,
    stage: InstallStage,
}

struct UpdatePrompt {
    update: UpdateDescriptor,
    progress: Arc<Mutex<InstallProgress>>,
    install: Option<Promise<bool>>,
}

impl UpdatePrompt {
    fn new(update: UpdateDescriptor) -> Self {
        Self {
            update,
            progress: Arc::new(Mutex::new(InstallProgress {
                percent: 0.0,
                stage: InstallStage::Downloading,
            })),
            install: None,
        }
    }

    fn is_installing(&self) -> bool {
        self.install
            .as_ref()
            .is_some_and(|promise| promise.ready().is_none())
    }
}

enum SettingsAction {
    Save,
    Cancel,
}

pub struct OverlayApp {
    orchestrator: Orchestrator,
    update_prompt: Option<UpdatePrompt>,
    window_size: (f32, f32),
    window_visible: bool,
    closing: bool,
}

impl OverlayApp {
    fn new(orchestrator: Orchestrator) -> Self {
        let window_size = orchestrator.surface().window_size();
        Self {
            orchestrator,
            update_prompt: None,
            window_size,
            window_visible: true,
            closing: false,
        }
    }

    fn sync_window(&mut self, ctx: &egui::Context) {
        let surface = self.orchestrator.surface();

        let visible = surface.is_visible();
        if visible != self.window_visible {
            ctx.send_viewport_cmd(egui::ViewportCommand::Visible(visible));
            self.window_visible = visible;
        }

        let size = surface.window_size();
        if size != self.window_size {
            ctx.send_viewport_cmd(egui::ViewportCommand::InnerSize(egui::vec2(size.0, size.1)));
            self.window_size = size;
        }
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let (minimize, lock, close) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::M),
                i.key_pressed(egui::Key::L),
                i.key_pressed(egui::Key::Escape),
            )
        });
        let surface = self.orchestrator.surface_mut();
        if minimize {
            surface.toggle_minimized();
        }
        if lock {
            surface.toggle_locked();
        }
        if close {
            surface.close();
        }
    }

    fn draw_overlay(&mut self, ctx: &egui::Context) {
        let theme = self.orchestrator.surface().theme().clone();
        let geometry = *self.orchestrator.surface().geometry();

        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(color_alpha(theme.bg, theme.opacity)))
            .show(ctx, |ui| {
                let window = ui.max_rect();
                let drag =
                    ui.interact(window, egui::Id::new("overlay_drag"), egui::Sense::drag());
                self.handle_drag(ctx, &drag);

                let title = egui::Rect::from_min_size(
                    window.min,
                    egui::vec2(window.width(), geometry.title_height),
                );
                self.title_bar(ui, title, &theme);

                if let Some(frame) = self.orchestrator.surface().redraw() {
                    paint_frame(ui.painter(), window.min.to_vec2(), &frame, &theme);
                }
            });
    }

    fn handle_drag(&mut self, ctx: &egui::Context, drag: &egui::Response) {
        let surface = self.orchestrator.surface_mut();
        let Some(pointer) = drag.interact_pointer_pos() else {
            if drag.drag_stopped() {
                surface.end_drag();
            }
            return;
        };

        if drag.drag_started() {
            surface.begin_drag(Point::new(pointer.x, pointer.y));
        }
        if drag.dragged() {
            if let Some(outer) = ctx.input(|i| i.viewport().outer_rect) {
                let on_screen = outer.min + pointer.to_vec2();
                if let Some(pos) = surface.drag_to(Point::new(on_screen.x, on_screen.y)) {
                    ctx.send_viewport_cmd(egui::ViewportCommand::OuterPosition(egui::pos2(
                        pos.x, pos.y,
                    )));
                }
            }
        }
        if drag.drag_stopped() {
            surface.end_drag();
        }
    }

    fn title_bar(&mut self, ui: &mut egui::Ui, rect: egui::Rect, theme: &Theme) {
        let surface = self.orchestrator.surface_mut();
        let bar = egui::UiBuilder::new().max_rect(rect.shrink2(egui::vec2(8.0, 4.0)));
        ui.allocate_new_ui(bar, |ui| {
            ui.horizontal_centered(|ui| {
                ui.label(
                    egui::RichText::new("OSD Overlay")
                        .color(color(theme.text))
                        .size(12.0)
                        .strong(),
                );
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let button = |text: &str, fill: Rgb| {
                        egui::Button::new(egui::RichText::new(text).color(color(theme.text)))
                            .fill(color(fill))
                            .min_size(egui::vec2(22.0, 20.0))
                    };

                    let close = ui.add(button("✕", theme.close)).on_hover_text("Close (Esc)");
                    if close.clicked() {
                        surface.close();
                    }

                    let lock_icon = if surface.is_locked() { "🔒" } else { "🔓" };
                    let lock = ui
                        .add(button(lock_icon, theme.accent))
                        .on_hover_text("Lock position (L)");
                    if lock.clicked() {
                        surface.toggle_locked();
                    }

                    let size_icon = if surface.is_minimized() { "+" } else { "−" };
                    let minimize = ui
                        .add(button(size_icon, theme.accent))
                        .on_hover_text("Minimize (M)");
                    if minimize.clicked() {
                        surface.toggle_minimized();
                    }
                });
            });
        });
    }

    fn show_settings(&mut self, ctx: &egui::Context) {
        let theme = self.orchestrator.surface().theme().clone();
        let dialog = self.orchestrator.settings_mut();
        if !dialog.is_open() {
            return;
        }
        let focus = dialog.take_focus_request();
        let mut action = None;

        ctx.show_viewport_immediate(
            egui::ViewportId::from_hash_of("osd_settings"),
            egui::ViewportBuilder::default()
                .with_title("OSD Overlay Settings")
                .with_inner_size([400.0, 500.0])
                .with_window_level(egui::WindowLevel::AlwaysOnTop),
            |ctx, _class| {
                if focus {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Focus);
                }
                egui::CentralPanel::default().show(ctx, |ui| {
                    action = settings_form(ui, dialog, &theme);
                });
                if ctx.input(|i| i.viewport().close_requested()) {
                    action = Some(SettingsAction::Cancel);
                }
            },
        );

        match action {
            Some(SettingsAction::Save) => {
                if let Err(e) = dialog.save() {
                    tracing::warn!("Settings not saved: {}", e);
                }
            }
            Some(SettingsAction::Cancel) => dialog.cancel(),
            None => {}
        }
    }

    fn show_update_prompt(&mut self, ctx: &egui::Context) {
        let Some(prompt) = &mut self.update_prompt else {
            return;
        };
        let mut start = false;
        let mut dismiss = false;
        let progress = prompt.progress.lock().clone();
        let installing = prompt.is_installing();
        let started = prompt.install.is_some();

        ctx.show_viewport_immediate(
            egui::ViewportId::from_hash_of("osd_update"),
            egui::ViewportBuilder::default()
                .with_title("OSD Overlay Update")
                .with_inner_size([440.0, 340.0])
                .with_window_level(egui::WindowLevel::AlwaysOnTop),
            |ctx, _class| {
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.heading(format!("Version {} is available", prompt.update.version));
                    ui.label(format!("You are running {}", updater::CURRENT_VERSION));
                    if let Some(published) = &prompt.update.published_at {
                        ui.small(format!("Published {}", published));
                    }
                    ui.separator();

                    egui::ScrollArea::vertical().max_height(160.0).show(ui, |ui| {
                        if prompt.update.notes.trim().is_empty() {
                            ui.weak("No release notes.");
                        } else {
                            ui.label(prompt.update.notes.as_str());
                        }
                    });
                    ui.separator();

                    if started {
                        ui.add(
                            egui::ProgressBar::new(progress.percent / 100.0).show_percentage(),
                        );
                        match &progress.stage {
                            InstallStage::Downloading => ui.label("Downloading..."),
                            InstallStage::Verifying => ui.label("Verifying..."),
                            InstallStage::Launching => ui.label("Starting installer..."),
                            InstallStage::Done => ui.label("Installer started."),
                            InstallStage::Failed(reason) => ui.colored_label(
                                egui::Color32::from_rgb(0xe5, 0x3e, 0x3e),
                                reason.as_str(),
                            ),
                        };
                    }

                    ui.horizontal(|ui| {
                        if ui.add_enabled(!started, egui::Button::new("Update")).clicked() {
                            start = true;
                        }
                        if ui.add_enabled(!installing, egui::Button::new("Later")).clicked() {
                            dismiss = true;
                        }
                    });
                });
                if ctx.input(|i| i.viewport().close_requested()) && !installing {
                    dismiss = true;
                }
            },
        );

        if start {
            let checker = self.orchestrator.update_checker();
            let runtime = self.orchestrator.runtime().clone();
            prompt.install = Some(start_install(ctx, checker, runtime, prompt));
        }

        let launched = prompt
            .install
            .as_ref()
            .and_then(|promise| promise.ready().copied())
            .unwrap_or(false);
        if launched {
            tracing::info!("Installer launched, closing overlay");
            self.update_prompt = None;
            self.orchestrator.request_stop();
        } else if dismiss {
            self.update_prompt = None;
        }
    }
}

/// Download, verify and launch off the UI thread.
fn start_install(
    ctx: &egui::Context,
    checker: Option<Arc<updater::UpdateChecker>>,
    runtime: tokio::runtime::Handle,
    prompt: &UpdatePrompt,
) -> Promise<bool> {
    let ctx = ctx.clone();
    let progress = Arc::clone(&prompt.progress);
    let url = prompt.update.download_url.clone();

    Promise::spawn_thread("update_install", move || {
        let fail = |reason: &str| {
            progress.lock().stage = InstallStage::Failed(reason.to_string());
            ctx.request_repaint();
            false
        };
        let Some(checker) = checker else {
            return fail("Update checks are disabled");
        };

        let downloaded = runtime.block_on(checker.download(&url, |percent| {
            progress.lock().percent = percent;
            ctx.request_repaint();
        }));
        let Some(path) = downloaded else {
            return fail("Download failed");
        };

        progress.lock().stage = InstallStage::Verifying;
        if !updater::verify(&path) {
            return fail("Downloaded installer looks incomplete");
        }

        progress.lock().stage = InstallStage::Launching;
        if !updater::install(&path) {
            return fail("Could not start the installer");
        }

        let mut state = progress.lock();
        state.percent = 100.0;
        state.stage = InstallStage::Done;
        ctx.request_repaint();
        true
    })
}

fn settings_form(
    ui: &mut egui::Ui,
    dialog: &mut SettingsDialog,
    theme: &Theme,
) -> Option<SettingsAction> {
    let error = dialog.error().map(str::to_string);
    let form = dialog.form_mut()?;
    let mut action = None;

    egui::Grid::new("settings_grid")
        .num_columns(2)
        .spacing([12.0, 6.0])
        .show(ui, |ui| {
            ui.label("Refresh (ms)");
            ui.text_edit_singleline(&mut form.refresh_ms)
                .on_hover_text(format!("{} - {}", MIN_REFRESH_MS, MAX_REFRESH_MS));
            ui.end_row();

            ui.label("Adaptive refresh");
            ui.checkbox(&mut form.adaptive_refresh, "Slow down under load");
            ui.end_row();

            ui.label("Frame-rate capture");
            ui.checkbox(&mut form.present_mon_enabled, "Enabled");
            ui.end_row();

            ui.label("Target process");
            ui.text_edit_singleline(&mut form.process_name);
            ui.end_row();

            ui.label("PresentMon executable");
            ui.text_edit_singleline(&mut form.present_mon_executable);
            ui.end_row();

            ui.label("Update check");
            ui.checkbox(&mut form.update_check, "Check for updates");
            ui.end_row();

            ui.label("Release URL");
            ui.text_edit_singleline(&mut form.update_url)
                .on_hover_text("Empty uses the built-in endpoint");
            ui.end_row();

            ui.label("Check every (hours)");
            ui.text_edit_singleline(&mut form.update_interval_hours);
            ui.end_row();

            ui.label("Theme");
            ui.horizontal(|ui| {
                for name in THEME_NAMES {
                    ui.radio_value(&mut form.theme_name, name.to_string(), name);
                }
            });
            ui.end_row();

            ui.label("Layout");
            ui.horizontal(|ui| {
                ui.radio_value(&mut form.layout, LayoutDensity::Standard, "Standard");
                ui.radio_value(&mut form.layout, LayoutDensity::Compact, "Compact");
            });
            ui.end_row();
        });

    ui.separator();
    ui.label("Metric colors (#rrggbb, empty keeps the theme color)");
    egui::Grid::new("settings_colors")
        .num_columns(2)
        .spacing([12.0, 4.0])
        .show(ui, |ui| {
            for (key, value) in form.colors.iter_mut() {
                ui.label(key.to_uppercase());
                let hint = theme.color(key).map(|c| c.to_string()).unwrap_or_default();
                ui.add(egui::TextEdit::singleline(value).hint_text(hint));
                ui.end_row();
            }
        });

    ui.separator();
    if let Some(error) = error {
        ui.colored_label(egui::Color32::from_rgb(0xe5, 0x3e, 0x3e), error);
    }
    ui.small("Changes apply the next time the overlay starts.");
    ui.horizontal(|ui| {
        if ui.button("Save").clicked() {
            action = Some(SettingsAction::Save);
        }
        if ui.button("Cancel").clicked() {
            action = Some(SettingsAction::Cancel);
        }
    });

    action
}

fn paint_frame(painter: &egui::Painter, origin: egui::Vec2, frame: &Frame, theme: &Theme) {
    let pos = |p: Point| egui::pos2(p.x, p.y) + origin;
    let rect = |r: crate::overlay::Rect| {
        egui::Rect::from_min_size(egui::pos2(r.x, r.y) + origin, egui::vec2(r.w, r.h))
    };

    for command in &frame.commands {
        match command {
            DrawCommand::Panel { rect: r, fill, stroke } => {
                painter.rect(
                    rect(*r),
                    egui::Rounding::same(6.0),
                    color(*fill),
                    egui::Stroke::new(1.0, color(*stroke)),
                );
            }
            DrawCommand::Text {
                pos: p,
                text,
                color: c,
                size,
                anchor,
            } => {
                let align = match anchor {
                    Anchor::Left => egui::Align2::LEFT_TOP,
                    Anchor::Center => egui::Align2::CENTER_CENTER,
                };
                painter.text(pos(*p), align, text, egui::FontId::proportional(*size), color(*c));
            }
            DrawCommand::Bar {
                rect: r,
                ratio,
                color: c,
                label,
                percent,
            } => {
                let outer = rect(*r);
                painter.rect_filled(outer, egui::Rounding::same(3.0), color(theme.accent));
                let filled = egui::Rect::from_min_size(
                    outer.min,
                    egui::vec2(outer.width() * ratio, outer.height()),
                );
                painter.rect_filled(filled, egui::Rounding::same(3.0), color(*c));

                let font = egui::FontId::proportional((outer.height() * 0.5).max(9.0));
                painter.text(
                    egui::pos2(outer.left() + 6.0, outer.center().y),
                    egui::Align2::LEFT_CENTER,
                    label,
                    font.clone(),
                    color(theme.text),
                );
                painter.text(
                    egui::pos2(outer.right() - 6.0, outer.center().y),
                    egui::Align2::RIGHT_CENTER,
                    percent,
                    font,
                    color(theme.text),
                );
            }
            DrawCommand::Sparkline {
                rect: r,
                points,
                color: c,
            } => {
                painter.rect_stroke(
                    rect(*r),
                    egui::Rounding::same(2.0),
                    egui::Stroke::new(1.0, color(theme.border)),
                );
                let line: Vec<egui::Pos2> = points.iter().map(|p| pos(*p)).collect();
                painter.add(egui::Shape::line(line, egui::Stroke::new(1.5, color(*c))));
            }
        }
    }
}

impl eframe::App for OverlayApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.orchestrator.apply_controls();

        if ctx.input(|i| i.viewport().close_requested()) {
            self.orchestrator.request_stop();
            self.closing = true;
        }

        if !self.closing && self.orchestrator.is_due(Instant::now()) {
            self.orchestrator.step();
        }

        if let Some(update) = self.orchestrator.take_update_prompt() {
            self.update_prompt = Some(UpdatePrompt::new(update));
        }

        self.handle_keys(ctx);
        self.sync_window(ctx);
        self.draw_overlay(ctx);
        self.show_settings(ctx);
        self.show_update_prompt(ctx);

        if self.orchestrator.should_stop() {
            if !self.closing {
                self.closing = true;
                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            }
            return;
        }

        ctx.request_repaint_after(self.orchestrator.until_next_tick(Instant::now()));
    }

    fn clear_color(&self, _visuals: &egui::Visuals) -> [f32; 4] {
        [0.0, 0.0, 0.0, 0.0]
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.orchestrator.shutdown();
    }
}

/// Opens the undecorated always-on-top overlay window and runs the poll loop
/// inside the GUI event loop until the window closes.
pub fn run_gui(config: Config, options: RunOptions) -> Result<()> {
    let geometry = Geometry::for_density(config.layout);
    let runtime = tokio::runtime::Handle::current();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("OSD Overlay")
            .with_inner_size([geometry.width, geometry.height])
            .with_resizable(false)
            .with_decorations(false)
            .with_transparent(true)
            .with_taskbar(false)
            .with_window_level(egui::WindowLevel::AlwaysOnTop),
        ..Default::default()
    };

    eframe::run_native(
        "OSD Overlay",
        native_options,
        Box::new(move |cc| {
            let ctx = cc.egui_ctx.clone();
            let (handle, inbox) = control::channel();
            let handle = handle.with_waker(move || ctx.request_repaint());
            let orchestrator = Orchestrator::start(config, options, runtime, (handle, inbox));
            Ok(Box::new(OverlayApp::new(orchestrator)))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run overlay window: {}", e))
}
