//! Render surface: window state machine plus the display list drawn each
//! tick. The GUI layer only translates `DrawCommand`s into paint calls.

use crate::config::LayoutDensity;
use crate::crashlog::panic_message;
use crate::history::RollingHistory;
use crate::metrics::Snapshot;
use crate::theme::{Rgb, Theme};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    Left,
    Center,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Panel {
        rect: Rect,
        fill: Rgb,
        stroke: Rgb,
    },
    Text {
        pos: Point,
        text: String,
        color: Rgb,
        size: f32,
        anchor: Anchor,
    },
    Bar {
        rect: Rect,
        /// Always within [0, 1]
        ratio: f32,
        color: Rgb,
        label: String,
        percent: String,
    },
    Sparkline {
        rect: Rect,
        points: Vec<Point>,
        color: Rgb,
    },
}

impl fmt::Display for DrawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawCommand::Panel { .. } => Ok(()),
            DrawCommand::Text { text, .. } => write!(f, "{}", text),
            DrawCommand::Bar {
                ratio,
                label,
                percent,
                ..
            } => {
                const CELLS: usize = 20;
                let filled = (ratio * CELLS as f32).round() as usize;
                write!(
                    f,
                    "{:<36} [{}{}] {:>4}",
                    label,
                    "#".repeat(filled),
                    "-".repeat(CELLS - filled),
                    percent
                )
            }
            DrawCommand::Sparkline { points, .. } => {
                write!(f, "trend: {} samples", points.len())
            }
        }
    }
}

/// Display list for one redraw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub commands: Vec<DrawCommand>,
}

impl Frame {
    #[cfg(test)]
    pub fn bars(&self) -> impl Iterator<Item = (&str, f32)> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Bar { label, ratio, .. } => Some((label.as_str(), *ratio)),
            _ => None,
        })
    }

    #[cfg(test)]
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    #[cfg(test)]
    pub fn sparkline(&self) -> Option<&[Point]> {
        self.commands.iter().find_map(|c| match c {
            DrawCommand::Sparkline { points, .. } => Some(points.as_slice()),
            _ => None,
        })
    }

    /// Plain-text rendering used by headless mode.
    pub fn to_text_lines(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|c| c.to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

/// Pixel geometry for one layout density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub width: f32,
    pub height: f32,
    pub minimized_height: f32,
    pub title_height: f32,
    panel_margin: f32,
    content_inset: f32,
    bar_height: f32,
    bar_spacing: f32,
    banner_spacing: f32,
    chart_w: f32,
    chart_h: f32,
}

impl Geometry {
    pub fn for_density(density: LayoutDensity) -> Self {
        match density {
            LayoutDensity::Standard => Self {
                width: 420.0,
                height: 180.0,
                minimized_height: 40.0,
                title_height: 30.0,
                panel_margin: 8.0,
                content_inset: 15.0,
                bar_height: 20.0,
                bar_spacing: 30.0,
                banner_spacing: 20.0,
                chart_w: 60.0,
                chart_h: 25.0,
            },
            LayoutDensity::Compact => Self {
                width: 300.0,
                height: 130.0,
                minimized_height: 40.0,
                title_height: 30.0,
                panel_margin: 6.0,
                content_inset: 10.0,
                bar_height: 14.0,
                bar_spacing: 20.0,
                banner_spacing: 16.0,
                chart_w: 48.0,
                chart_h: 18.0,
            },
        }
    }

    fn panel(&self) -> Rect {
        let y = self.title_height + 5.0;
        Rect::new(
            self.panel_margin,
            y,
            self.width - self.panel_margin * 2.0,
            self.height - y - self.panel_margin,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeState {
    Normal,
    Minimized,
}

pub type CloseCallback = Box<dyn FnOnce()>;

struct TransientNote {
    text: String,
    until: Instant,
}

pub struct RenderSurface {
    theme: Theme,
    geometry: Geometry,
    size: SizeState,
    locked: bool,
    visible: bool,
    closed: bool,
    snapshot: Option<Snapshot>,
    update_notice: Option<String>,
    note: Option<TransientNote>,
    cpu_history: RollingHistory,
    gpu_history: RollingHistory,
    ram_history: RollingHistory,
    drag_offset: Option<Point>,
    on_close: Option<CloseCallback>,
}

impl RenderSurface {
    pub fn new(theme: Theme, density: LayoutDensity) -> Self {
        Self {
            theme,
            geometry: Geometry::for_density(density),
            size: SizeState::Normal,
            locked: false,
            visible: true,
            closed: false,
            snapshot: None,
            update_notice: None,
            note: None,
            cpu_history: RollingHistory::new(),
            gpu_history: RollingHistory::new(),
            ram_history: RollingHistory::new(),
            drag_offset: None,
            on_close: None,
        }
    }

    pub fn set_on_close(&mut self, callback: CloseCallback) {
        self.on_close = Some(callback);
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[cfg(test)]
    pub fn cpu_history(&self) -> &RollingHistory {
        &self.cpu_history
    }

    /// Stores the snapshot and appends the derived percentages to history.
    pub fn update(&mut self, snapshot: Snapshot) {
        if self.closed {
            return;
        }
        self.cpu_history.push(snapshot.cpu_percent.unwrap_or(0.0));
        self.gpu_history
            .push(snapshot.gpu.gpu_util_percent.unwrap_or(0.0));
        self.ram_history.push(snapshot.ram_percent());
        self.snapshot = Some(snapshot);
    }

    pub fn set_update_notice(&mut self, notice: Option<String>) {
        self.update_notice = notice;
    }

    pub fn show_note(&mut self, text: impl Into<String>, duration: Duration) {
        self.note = Some(TransientNote {
            text: text.into(),
            until: Instant::now() + duration,
        });
    }

    /// Live transient note if any, otherwise the update notice.
    pub fn banner_at(&self, now: Instant) -> Option<&str> {
        self.note
            .as_ref()
            .filter(|note| now < note.until)
            .map(|note| note.text.as_str())
            .or(self.update_notice.as_deref())
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner_at(Instant::now())
    }

    pub fn is_minimized(&self) -> bool {
        self.size == SizeState::Minimized
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn toggle_minimized(&mut self) -> SizeState {
        self.size = match self.size {
            SizeState::Normal => SizeState::Minimized,
            SizeState::Minimized => SizeState::Normal,
        };
        self.size
    }

    pub fn toggle_locked(&mut self) -> bool {
        self.locked = !self.locked;
        if self.locked {
            self.drag_offset = None;
        }
        self.locked
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Current window size; minimizing keeps the width.
    pub fn window_size(&self) -> (f32, f32) {
        match self.size {
            SizeState::Normal => (self.geometry.width, self.geometry.height),
            SizeState::Minimized => (self.geometry.width, self.geometry.minimized_height),
        }
    }

    /// Records the pointer offset inside the window. No-op while locked.
    pub fn begin_drag(&mut self, pointer_in_window: Point) {
        if self.locked {
            return;
        }
        self.drag_offset = Some(pointer_in_window);
    }

    /// New window position for a pointer at `pointer_on_screen`, or `None`
    /// while locked or when no drag is in progress.
    pub fn drag_to(&self, pointer_on_screen: Point) -> Option<Point> {
        if self.locked {
            return None;
        }
        let offset = self.drag_offset?;
        Some(Point::new(
            pointer_on_screen.x - offset.x,
            pointer_on_screen.y - offset.y,
        ))
    }

    pub fn end_drag(&mut self) {
        self.drag_offset = None;
    }

    /// Builds the display list for the current state. Returns `None` while
    /// minimized or closed: nothing below the title bar is computed.
    pub fn redraw(&self) -> Option<Frame> {
        if self.closed || self.is_minimized() {
            return None;
        }

        let g = &self.geometry;
        let t = &self.theme;
        let panel = g.panel();
        let mut commands = vec![DrawCommand::Panel {
            rect: panel,
            fill: t.panel,
            stroke: t.border,
        }];

        let Some(m) = &self.snapshot else {
            commands.push(DrawCommand::Text {
                pos: Point::new(g.width / 2.0, g.height / 2.0),
                text: "Loading...".to_string(),
                color: t.text,
                size: 12.0,
                anchor: Anchor::Center,
            });
            return Some(Frame { commands });
        };

        let x = panel.x + 10.0;
        let bar_w = panel.w - 20.0;
        let mut y = panel.y + g.content_inset;

        if let Some(banner) = self.banner() {
            commands.push(DrawCommand::Text {
                pos: Point::new(x, y),
                text: banner.to_string(),
                color: t.fps,
                size: 9.0,
                anchor: Anchor::Left,
            });
            y += g.banner_spacing;
        }

        let cpu_label = match m.cpu_percent {
            Some(cpu) => format!("CPU {:.0}%", cpu),
            None => "CPU n/a".to_string(),
        };
        commands.push(bar(
            Rect::new(x, y, bar_w, g.bar_height),
            m.cpu_percent.unwrap_or(0.0) / 100.0,
            t.cpu,
            cpu_label,
        ));
        y += g.bar_spacing;

        let ram_used = m.ram_used_gb.unwrap_or(0.0);
        let ram_total = m.ram_total_gb.unwrap_or(0.0);
        commands.push(bar(
            Rect::new(x, y, bar_w, g.bar_height),
            (ram_used / ram_total.max(0.1)) as f32,
            t.ram,
            format!("RAM {:.1}/{:.1} GB", ram_used, ram_total),
        ));
        y += g.bar_spacing;

        if let Some(gpu_util) = m.gpu.gpu_util_percent {
            let mut label = format!("GPU {:.0}%", gpu_util);
            if let Some(temp) = m.gpu.gpu_temp_c {
                label.push_str(&format!(" | {:.0}°C", temp));
            }
            if let (Some(used), Some(total)) = (m.gpu.gpu_mem_used_gb, m.gpu.gpu_mem_total_gb) {
                if total > 0.0 {
                    label.push_str(&format!(" | {:.1}/{:.1} GB", used, total));
                }
            }
            commands.push(bar(
                Rect::new(x, y, bar_w, g.bar_height),
                gpu_util / 100.0,
                t.gpu,
                label,
            ));
            y += g.bar_spacing;
        }

        if let Some(fps) = m.fps {
            commands.push(DrawCommand::Text {
                pos: Point::new(x, y),
                text: format!("FPS {:.0}", fps),
                color: t.fps,
                size: 11.0,
                anchor: Anchor::Left,
            });
        }

        if self.cpu_history.len() >= 2 {
            let chart = Rect::new(
                panel.x + panel.w - g.chart_w - 20.0,
                panel.y + panel.h - g.chart_h - 15.0,
                g.chart_w,
                g.chart_h,
            );
            commands.push(DrawCommand::Sparkline {
                rect: chart,
                points: sparkline_points(&self.cpu_history, chart),
                color: t.cpu,
            });
        }

        Some(Frame { commands })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Runs the close callback, then releases window state even if the
    /// callback panics. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Some(callback) = self.on_close.take() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                tracing::error!("Close callback panicked: {}", panic_message(&*payload));
            }
        }
        self.release();
    }

    fn release(&mut self) {
        self.closed = true;
        self.visible = false;
        self.snapshot = None;
        self.note = None;
        self.drag_offset = None;
        self.cpu_history.clear();
        self.gpu_history.clear();
        self.ram_history.clear();
    }
}

fn bar(rect: Rect, raw_ratio: f32, color: Rgb, label: String) -> DrawCommand {
    let ratio = clamp_ratio(raw_ratio);
    DrawCommand::Bar {
        rect,
        ratio,
        color,
        label,
        percent: format!("{:.0}%", ratio * 100.0),
    }
}

/// Clamps into [0, 1]; NaN counts as empty.
pub fn clamp_ratio(ratio: f32) -> f32 {
    if ratio.is_nan() {
        0.0
    } else {
        ratio.clamp(0.0, 1.0)
    }
}

fn sparkline_points(history: &RollingHistory, rect: Rect) -> Vec<Point> {
    let max = history.iter().fold(0.0_f32, f32::max);
    let max = if max > 0.0 { max } else { 1.0 };
    let last = (history.len() - 1).max(1) as f32;

    history
        .iter()
        .enumerate()
        .map(|(i, value)| {
            Point::new(
                rect.x + (i as f32 / last) * rect.w,
                rect.y + rect.h - (value.max(0.0) / max) * rect.h,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuReadings;
    use std::cell::Cell;
    use std::rc::Rc;

    fn surface() -> RenderSurface {
        RenderSurface::new(Theme::dark(), LayoutDensity::Standard)
    }

    fn snapshot(cpu: f32, used: f64, total: f64) -> Snapshot {
        let mut s = Snapshot::empty();
        s.cpu_percent = Some(cpu);
        s.ram_used_gb = Some(used);
        s.ram_total_gb = Some(total);
        s
    }

    #[test]
    fn loading_text_before_first_snapshot() {
        let frame = surface().redraw().unwrap();
        assert_eq!(frame.texts().collect::<Vec<_>>(), vec!["Loading..."]);
        assert_eq!(frame.bars().count(), 0);
    }

    #[test]
    fn ratios_are_clamped() {
        let mut s = surface();
        s.update(snapshot(130.0, 16.2, 16.0));
        let frame = s.redraw().unwrap();
        let bars: Vec<_> = frame.bars().collect();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].1, 1.0);
        assert_eq!(bars[1].1, 1.0);
        for cmd in &frame.commands {
            if let DrawCommand::Bar { percent, .. } = cmd {
                assert_eq!(percent, "100%");
            }
        }
    }

    #[test]
    fn zero_ram_total_uses_floor() {
        let mut s = surface();
        s.update(snapshot(10.0, 5.0, 0.0));
        let frame = s.redraw().unwrap();
        let (label, ratio) = frame.bars().nth(1).unwrap();
        assert_eq!(label, "RAM 5.0/0.0 GB");
        assert_eq!(ratio, 1.0);
    }

    #[test]
    fn gpu_bar_only_when_utilization_present() {
        let mut s = surface();
        s.update(snapshot(10.0, 4.0, 16.0));
        assert_eq!(s.redraw().unwrap().bars().count(), 2);

        let mut with_gpu = snapshot(10.0, 4.0, 16.0);
        with_gpu.gpu = GpuReadings {
            gpu_util_percent: Some(45.0),
            gpu_temp_c: Some(62.0),
            gpu_mem_used_gb: Some(3.1),
            gpu_mem_total_gb: Some(8.0),
            ..GpuReadings::default()
        };
        s.update(with_gpu);
        let frame = s.redraw().unwrap();
        let (label, ratio) = frame.bars().nth(2).unwrap();
        assert_eq!(label, "GPU 45% | 62°C | 3.1/8.0 GB");
        assert!((ratio - 0.45).abs() < 1e-6);

        let mut partial = snapshot(10.0, 4.0, 16.0);
        partial.gpu.gpu_util_percent = Some(5.0);
        partial.gpu.gpu_mem_used_gb = Some(1.0);
        s.update(partial);
        let frame = s.redraw().unwrap();
        assert_eq!(frame.bars().nth(2).unwrap().0, "GPU 5%");
    }

    #[test]
    fn fps_line_only_when_present() {
        let mut s = surface();
        s.update(snapshot(10.0, 4.0, 16.0));
        assert!(!s.redraw().unwrap().texts().any(|t| t.starts_with("FPS")));

        s.update(snapshot(10.0, 4.0, 16.0).with_fps(Some(59.6)));
        assert!(s.redraw().unwrap().texts().any(|t| t == "FPS 60"));
    }

    #[test]
    fn missing_cpu_reading_draws_empty_bar() {
        let mut s = surface();
        let mut snap = snapshot(0.0, 4.0, 16.0);
        snap.cpu_percent = None;
        s.update(snap);
        let frame = s.redraw().unwrap();
        assert_eq!(frame.bars().next().unwrap(), ("CPU n/a", 0.0));
    }

    #[test]
    fn sparkline_needs_two_points() {
        let mut s = surface();
        s.update(snapshot(10.0, 4.0, 16.0));
        assert!(s.redraw().unwrap().sparkline().is_none());

        s.update(snapshot(20.0, 4.0, 16.0));
        let frame = s.redraw().unwrap();
        let points = frame.sparkline().unwrap();
        assert_eq!(points.len(), 2);
        // highest value touches the top of the chart region
        let DrawCommand::Sparkline { rect, .. } = frame
            .commands
            .iter()
            .find(|c| matches!(c, DrawCommand::Sparkline { .. }))
            .unwrap()
        else {
            unreachable!()
        };
        assert_eq!(points[1].y, rect.y);
        assert_eq!(points[1].x, rect.x + rect.w);
    }

    #[test]
    fn history_tracks_derived_percentages() {
        let mut s = surface();
        for i in 0..25 {
            s.update(snapshot(i as f32, 8.0, 16.0));
        }
        assert_eq!(s.cpu_history().len(), 20);
        assert_eq!(s.cpu_history().iter().next(), Some(5.0));
        assert_eq!(s.gpu_history.iter().last(), Some(0.0));
        assert_eq!(s.ram_history.iter().last(), Some(50.0));
    }

    #[test]
    fn banner_prefers_live_note() {
        let mut s = surface();
        s.set_update_notice(Some("Update available: v2.1.0".to_string()));
        assert_eq!(s.banner(), Some("Update available: v2.1.0"));

        s.show_note("High CPU load", Duration::from_secs(5));
        assert_eq!(s.banner(), Some("High CPU load"));
        let later = Instant::now() + Duration::from_secs(6);
        assert_eq!(s.banner_at(later), Some("Update available: v2.1.0"));

        s.update(snapshot(10.0, 4.0, 16.0));
        assert_eq!(s.redraw().unwrap().texts().next(), Some("High CPU load"));
    }

    #[test]
    fn minimized_skips_redraw_and_keeps_width() {
        let mut s = surface();
        s.update(snapshot(10.0, 4.0, 16.0));
        assert_eq!(s.toggle_minimized(), SizeState::Minimized);
        assert!(s.redraw().is_none());
        assert_eq!(s.window_size(), (420.0, 40.0));

        s.toggle_minimized();
        assert_eq!(s.window_size(), (420.0, 180.0));
        assert!(s.redraw().is_some());
    }

    #[test]
    fn compact_layout_is_smaller() {
        let s = RenderSurface::new(Theme::dark(), LayoutDensity::Compact);
        assert_eq!(s.window_size(), (300.0, 130.0));
    }

    #[test]
    fn drag_moves_by_offset_unless_locked() {
        let mut s = surface();
        s.begin_drag(Point::new(10.0, 5.0));
        assert_eq!(s.drag_to(Point::new(110.0, 205.0)), Some(Point::new(100.0, 200.0)));

        s.toggle_locked();
        assert_eq!(s.drag_to(Point::new(110.0, 205.0)), None);
        s.begin_drag(Point::new(1.0, 1.0));
        s.toggle_locked();
        // the press while locked was ignored and locking dropped the old one
        assert_eq!(s.drag_to(Point::new(110.0, 205.0)), None);

        // lock applies in minimized state as well
        s.toggle_minimized();
        s.toggle_locked();
        s.begin_drag(Point::new(1.0, 1.0));
        assert_eq!(s.drag_to(Point::new(5.0, 5.0)), None);
    }

    #[test]
    fn close_runs_callback_once_and_releases() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let mut s = surface();
        s.update(snapshot(10.0, 4.0, 16.0));
        s.set_on_close(Box::new(move || counter.set(counter.get() + 1)));

        s.close();
        s.close();
        assert_eq!(calls.get(), 1);
        assert!(s.is_closed());
        assert!(s.redraw().is_none());
        assert!(s.snapshot.is_none());
    }

    #[test]
    fn close_releases_even_when_callback_panics() {
        let mut s = surface();
        s.set_on_close(Box::new(|| panic!("callback failure")));
        s.close();
        assert!(s.is_closed());
        assert!(!s.is_visible());
        assert!(s.cpu_history().is_empty());
    }

    #[test]
    fn text_rendering_for_headless_mode() {
        let mut s = surface();
        s.update(snapshot(50.0, 8.0, 16.0));
        let lines = s.redraw().unwrap().to_text_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("CPU 50%"));
        assert!(lines[0].ends_with(" 50%"));
        assert!(lines[1].contains("##########----------"));
    }

    #[test]
    fn nan_ratio_is_empty() {
        assert_eq!(clamp_ratio(f32::NAN), 0.0);
        assert_eq!(clamp_ratio(-0.5), 0.0);
        assert_eq!(clamp_ratio(0.25), 0.25);
    }
}
