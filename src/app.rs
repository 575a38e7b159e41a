//! Wires the sources, the render surface and the optional capabilities
//! together and drives one poll tick at a time.

use crate::capability::Capability;
use crate::config::Config;
use crate::control::{Control, ControlHandle, ControlInbox};
use crate::crashlog::CrashLog;
use crate::framerate::FrameRateReader;
use crate::metrics::MetricsSource;
use crate::overlay::{Frame, RenderSurface};
use crate::pacing::{slowdown_note, PaceChange, PerfGovernor, NOTE_DURATION};
use crate::settings::{OpenOutcome, SettingsDialog};
use crate::tasks::BackgroundTasks;
use crate::theme::Theme;
use crate::tray::{TrayCallbacks, TrayController};
use crate::updater::{UpdateChecker, UpdateDescriptor};
use colored::*;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

pub const UPDATE_TASK_ID: &str = "update-check";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: PathBuf,
    pub crash_log_path: PathBuf,
    pub tray: bool,
}

pub struct Orchestrator {
    config: Config,
    metrics: MetricsSource,
    frame_reader: Capability<FrameRateReader>,
    tray: Capability<TrayController>,
    updater: Capability<Arc<UpdateChecker>>,
    tasks: BackgroundTasks,
    surface: RenderSurface,
    governor: PerfGovernor,
    settings: SettingsDialog,
    crash_log: CrashLog,
    inbox: ControlInbox,
    runtime: Handle,
    pending_update: Option<UpdateDescriptor>,
    prompted_version: Option<String>,
    next_tick: Instant,
    stopping: bool,
    shut_down: bool,
}

impl Orchestrator {
    /// Builds every component and resolves the optional capabilities once.
    pub fn start(
        config: Config,
        options: RunOptions,
        runtime: Handle,
        control: (ControlHandle, ControlInbox),
    ) -> Self {
        Self::with_metrics(MetricsSource::new(), config, options, runtime, control)
    }

    fn with_metrics(
        metrics: MetricsSource,
        config: Config,
        options: RunOptions,
        runtime: Handle,
        control: (ControlHandle, ControlInbox),
    ) -> Self {
        let (handle, inbox) = control;
        tracing::info!(
            "Starting overlay (refresh {} ms, layout {:?})",
            config.refresh_ms,
            config.layout
        );

        let frame_reader = start_frame_reader(&config);
        let theme = Theme::from_config(&config.theme);

        let tray = if options.tray {
            TrayController::start(TrayCallbacks::from_control(handle.clone()), &theme)
        } else {
            Capability::absent("disabled on the command line")
        };

        let updater = if config.update.check {
            Capability::resolve(
                "Update checker",
                UpdateChecker::new(&config.update).map(Arc::new),
            )
        } else {
            Capability::absent("update checks disabled")
        };

        let mut tasks = BackgroundTasks::new(runtime.clone());
        if let Capability::Present(checker) = &updater {
            let every = Duration::from_secs(config.update.interval_hours.max(1) * 3600);
            let checker = checker.clone();
            tasks.add_task(UPDATE_TASK_ID, every, move || {
                let checker = checker.clone();
                let control = handle.clone();
                async move {
                    if let Some(update) = checker.check().await {
                        tracing::info!("Update available: v{}", update.version);
                        control.send(Control::UpdateAvailable(update));
                    }
                    Ok(())
                }
            });
        }

        let mut surface = RenderSurface::new(theme, config.layout);
        surface.set_on_close(Box::new(|| tracing::info!("Overlay window closed")));

        let orchestrator = Self {
            governor: PerfGovernor::new(&config),
            settings: SettingsDialog::new(options.config_path),
            crash_log: CrashLog::new(options.crash_log_path),
            config,
            metrics,
            frame_reader,
            tray,
            updater,
            tasks,
            surface,
            inbox,
            runtime,
            pending_update: None,
            prompted_version: None,
            next_tick: Instant::now(),
            stopping: false,
            shut_down: false,
        };
        orchestrator.log_capabilities();
        orchestrator
    }

    fn log_capabilities(&self) {
        if !self.metrics.gpu_available() {
            tracing::info!("No GPU telemetry, GPU bar hidden");
        }
        let optional = [
            ("Frame-rate capture", self.frame_reader.absence_reason()),
            ("Tray icon", self.tray.absence_reason()),
            ("Update checks", self.updater.absence_reason()),
        ];
        for (name, reason) in optional {
            match reason {
                Some(reason) => tracing::debug!("{} off: {}", name, reason),
                None => tracing::debug!("{} on", name),
            }
        }
        if self.governor.is_adaptive() {
            tracing::debug!("Adaptive refresh on, starting at {:?}", self.governor.interval());
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut RenderSurface {
        &mut self.surface
    }

    pub fn settings_mut(&mut self) -> &mut SettingsDialog {
        &mut self.settings
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn update_checker(&self) -> Option<Arc<UpdateChecker>> {
        self.updater.as_ref().cloned()
    }

    pub fn has_tray(&self) -> bool {
        self.tray.is_present()
    }

    /// Applies every queued control message. The loop is the only writer of
    /// window visibility.
    pub fn apply_controls(&mut self) {
        for control in self.inbox.drain() {
            match control {
                Control::Show => self.surface.set_visible(true),
                Control::Hide => self.surface.set_visible(false),
                Control::Quit => self.request_stop(),
                Control::OpenSettings => {
                    if self.settings.open() == OpenOutcome::Refocused {
                        tracing::debug!("Settings dialog already open");
                    }
                }
                Control::UpdateAvailable(update) => {
                    self.surface
                        .set_update_notice(Some(format!("Update available: v{}", update.version)));
                    if self.prompted_version.as_deref() != Some(update.version.as_str()) {
                        self.pending_update = Some(update);
                    }
                }
            }
        }
    }

    /// The update window opens at most once per version.
    pub fn take_update_prompt(&mut self) -> Option<UpdateDescriptor> {
        let update = self.pending_update.take()?;
        self.prompted_version = Some(update.version.clone());
        Some(update)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_tick
    }

    pub fn until_next_tick(&self, now: Instant) -> Duration {
        self.next_tick.saturating_duration_since(now)
    }

    pub fn interval(&self) -> Duration {
        self.governor.interval()
    }

    /// One poll tick: sample, push to the surface, redraw.
    pub fn tick(&mut self) -> Option<Frame> {
        let started = Instant::now();

        let fps = self.frame_reader.as_mut().and_then(|reader| reader.sample());
        let snapshot = self.metrics.sample().with_fps(fps);
        let cpu = snapshot.cpu_percent;
        self.surface.update(snapshot);
        let frame = self.surface.redraw();

        if let PaceChange::Slowed(interval) = self.governor.record_tick(started.elapsed(), cpu) {
            self.surface.show_note(slowdown_note(interval), NOTE_DURATION);
        }
        frame
    }

    /// Runs a tick and schedules the next one. A panic escaping the tick is
    /// written to the crash log and stops the loop.
    pub fn step(&mut self) -> Option<Frame> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.tick()));
        self.next_tick = Instant::now() + self.governor.interval();
        match outcome {
            Ok(frame) => frame,
            Err(payload) => {
                self.crash_log.record_panic(&*payload);
                self.request_stop();
                None
            }
        }
    }

    pub fn request_stop(&mut self) {
        if !self.stopping {
            tracing::info!("Stopping overlay");
        }
        self.stopping = true;
    }

    pub fn should_stop(&self) -> bool {
        self.stopping || self.surface.is_closed()
    }

    /// Releases everything in a fixed order: frame reader, tray, background
    /// tasks, metrics source, window. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.stopping = true;
        tracing::debug!("Pacing: {:?}", self.governor.report());

        if let Some(reader) = self.frame_reader.as_mut() {
            reader.stop();
        }
        if let Some(tray) = self.tray.as_mut() {
            tray.stop();
        }
        self.tasks.stop();
        self.metrics.shutdown();
        self.surface.close();
        tracing::info!("Overlay shut down");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn start_frame_reader(config: &Config) -> Capability<FrameRateReader> {
    let Some(target) = config.frame_rate_target() else {
        return Capability::absent("frame-rate capture disabled");
    };
    let mut reader = FrameRateReader::new(&config.present_mon.executable, Some(target.to_string()));
    let started = reader.start();
    Capability::resolve("Frame-rate capture", started.map(|()| reader))
}

/// Same poll loop without a window: each redraw is printed as text until
/// Ctrl-C or a quit request.
pub async fn run_headless(mut orchestrator: Orchestrator) -> anyhow::Result<()> {
    println!(
        "{} (refresh {} ms, Ctrl-C to stop)",
        "OSD overlay running headless".cyan().bold(),
        orchestrator.config().refresh_ms
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while !orchestrator.should_stop() {
        orchestrator.apply_controls();
        if orchestrator.settings_mut().is_open() {
            tracing::warn!("Settings dialog needs the GUI; ignoring request");
            orchestrator.settings_mut().cancel();
        }
        if let Some(update) = orchestrator.take_update_prompt() {
            println!(
                "{} v{} (run `osd check-update --install`)",
                "Update available:".yellow().bold(),
                update.version
            );
        }

        if let Some(frame) = orchestrator.step() {
            if orchestrator.surface().is_visible() {
                println!(
                    "{}",
                    format!("[{}]", chrono::Local::now().format("%H:%M:%S")).dimmed()
                );
                for line in frame.to_text_lines() {
                    println!("  {}", line);
                }
            }
        }

        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
            _ = tokio::time::sleep(orchestrator.interval()) => {}
        }
    }

    orchestrator.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control;
    use crate::gpu::MockGpuTelemetry;
    use crate::overlay::DrawCommand;

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.update.check = false;
        config
    }

    fn orchestrator(dir: &tempfile::TempDir, config: Config) -> (Orchestrator, ControlHandle) {
        let (handle, inbox) = control::channel();
        let options = RunOptions {
            config_path: dir.path().join("config.json"),
            crash_log_path: dir.path().join("logs").join("error.log"),
            tray: false,
        };
        let orch = Orchestrator::start(config, options, Handle::current(), (handle.clone(), inbox));
        (orch, handle)
    }

    fn sample_update(version: &str) -> UpdateDescriptor {
        UpdateDescriptor {
            version: version.to_string(),
            tag_name: format!("v{}", version),
            notes: "notes".to_string(),
            published_at: None,
            download_url: "http://installer".to_string(),
        }
    }

    #[tokio::test]
    async fn optional_capabilities_resolve_absent() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _) = orchestrator(&dir, quiet_config());
        assert!(!orch.has_tray());
        assert!(orch.update_checker().is_none());
        assert!(!orch.frame_reader.is_present());
    }

    #[tokio::test]
    async fn tick_produces_cpu_and_ram_bars() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, quiet_config());

        let frame = orch.step().unwrap();
        let labels: Vec<&str> = frame.bars().map(|(label, _)| label).collect();
        assert!(labels[0].starts_with("CPU"));
        assert!(labels[1].starts_with("RAM"));
        assert!(!orch.is_due(Instant::now()));
        assert_eq!(orch.surface().cpu_history().len(), 1);
    }

    #[tokio::test]
    async fn controls_toggle_visibility_and_quit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, handle) = orchestrator(&dir, quiet_config());

        handle.hide();
        orch.apply_controls();
        assert!(!orch.surface().is_visible());

        handle.show();
        handle.open_settings();
        orch.apply_controls();
        assert!(orch.surface().is_visible());
        assert!(orch.settings_mut().is_open());

        handle.quit();
        orch.apply_controls();
        assert!(orch.should_stop());
    }

    #[tokio::test]
    async fn update_prompt_once_per_version() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, handle) = orchestrator(&dir, quiet_config());

        handle.send(Control::UpdateAvailable(sample_update("9.0.0")));
        orch.apply_controls();
        assert_eq!(orch.surface().banner(), Some("Update available: v9.0.0"));
        assert_eq!(orch.take_update_prompt().unwrap().version, "9.0.0");

        handle.send(Control::UpdateAvailable(sample_update("9.0.0")));
        orch.apply_controls();
        assert!(orch.take_update_prompt().is_none());

        handle.send(Control::UpdateAvailable(sample_update("9.1.0")));
        orch.apply_controls();
        assert_eq!(orch.take_update_prompt().unwrap().version, "9.1.0");

        let frame = orch.step().unwrap();
        assert!(frame.commands.iter().any(|c| matches!(
            c,
            DrawCommand::Text { text, .. } if text == "Update available: v9.1.0"
        )));
    }

    #[tokio::test]
    async fn panic_in_tick_is_logged_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut gpu = MockGpuTelemetry::new();
        gpu.expect_name().return_const(None::<String>);
        gpu.expect_read().returning(|| panic!("sensor driver crashed"));
        gpu.expect_shutdown().times(1).return_const(());

        let (handle, inbox) = control::channel();
        let options = RunOptions {
            config_path: dir.path().join("config.json"),
            crash_log_path: dir.path().join("logs").join("error.log"),
            tray: false,
        };
        let mut orch = Orchestrator::with_metrics(
            MetricsSource::with_gpu(Capability::Present(Box::new(gpu))),
            quiet_config(),
            options,
            Handle::current(),
            (handle, inbox),
        );

        assert!(orch.step().is_none());
        assert!(orch.should_stop());

        orch.shutdown();
        assert!(orch.surface().is_closed());
        let log = std::fs::read_to_string(dir.path().join("logs").join("error.log")).unwrap();
        assert!(log.starts_with('\n'));
        assert!(log.contains("sensor driver crashed"));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (mut orch, _) = orchestrator(&dir, quiet_config());
        orch.shutdown();
        orch.shutdown();
        assert!(orch.should_stop());
        assert!(orch.step().is_none());
    }
}
