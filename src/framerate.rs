//! Frame-rate capture through an external PresentMon process.

use crate::error::{OverlayError, Result};
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::thread;
use tokio::sync::watch;

fn fps_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)fps\s+([0-9]+\.?[0-9]*)").expect("static fps pattern is valid")
    })
}

/// Extracts the number following an `fps` token anywhere in the line,
/// e.g. `"pid 1234, fps 60.1"` -> `Some(60.1)`.
pub fn parse_fps_line(line: &str) -> Option<f32> {
    fps_pattern()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
}

enum ReaderState {
    /// No target process configured, or launch failed. Never retried.
    Inert,
    Running {
        child: Child,
        /// Newest line from the capture tool; older lines are overwritten.
        latest: watch::Receiver<Option<String>>,
    },
    Stopped,
}

pub struct FrameRateReader {
    executable: String,
    process_name: Option<String>,
    state: ReaderState,
}

impl FrameRateReader {
    pub fn new(executable: impl Into<String>, process_name: Option<String>) -> Self {
        Self {
            executable: executable.into(),
            process_name: process_name.filter(|name| !name.trim().is_empty()),
            state: ReaderState::Inert,
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        matches!(self.state, ReaderState::Running { .. })
    }

    /// Launches the capture utility. A failed launch leaves the reader inert
    /// for the rest of the run.
    pub fn start(&mut self) -> Result<()> {
        let Some(process_name) = self.process_name.clone() else {
            return Ok(());
        };
        if !matches!(self.state, ReaderState::Inert) {
            return Ok(());
        }

        let mut child = Command::new(&self.executable)
            .args([
                "-process_name",
                &process_name,
                "-output_stdout",
                "-no_csv",
                "-simple",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| OverlayError::LaunchFailed {
                program: self.executable.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OverlayError::Unavailable("capture stdout not piped".to_string()))?;

        let (tx, rx) = watch::channel(None);
        thread::Builder::new()
            .name("presentmon-reader".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.is_closed() {
                        break;
                    }
                    tx.send_replace(Some(line));
                }
            })?;

        tracing::info!(
            "Frame-rate capture started for {} (pid {})",
            process_name,
            child.id()
        );
        self.state = ReaderState::Running { child, latest: rx };
        Ok(())
    }

    /// Reads the newest line written since the previous call. Returns `None`
    /// when no new line arrived or the line carries no fps token.
    pub fn sample(&mut self) -> Option<f32> {
        let ReaderState::Running { latest, .. } = &mut self.state else {
            return None;
        };

        match latest.has_changed() {
            Ok(true) => latest
                .borrow_and_update()
                .as_deref()
                .and_then(|line| parse_fps_line(line.trim())),
            Ok(false) => None,
            Err(_) => {
                tracing::warn!("Frame-rate capture output closed");
                self.stop();
                None
            }
        }
    }

    /// Terminates the capture process if running. Idempotent.
    pub fn stop(&mut self) {
        if let ReaderState::Running { mut child, .. } =
            std::mem::replace(&mut self.state, ReaderState::Stopped)
        {
            if let Err(e) = child.kill() {
                tracing::debug!("Capture process already exited: {}", e);
            }
            let _ = child.wait();
        }
    }
}

impl Drop for FrameRateReader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fps_token() {
        assert_eq!(parse_fps_line("pid 1234, fps 60.1"), Some(60.1));
        assert_eq!(parse_fps_line("FPS 144"), Some(144.0));
        assert_eq!(parse_fps_line("game.exe  Fps   59."), Some(59.0));
    }

    #[test]
    fn rejects_lines_without_token() {
        assert_eq!(parse_fps_line("no data"), None);
        assert_eq!(parse_fps_line("fps"), None);
        assert_eq!(parse_fps_line("fps: 60"), None);
    }

    #[test]
    fn reader_without_target_is_inert() {
        let mut reader = FrameRateReader::new("presentmon", None);
        reader.start().unwrap();
        assert!(!reader.is_running());
        assert_eq!(reader.sample(), None);
        reader.stop();
        reader.stop();
    }

    #[test]
    fn blank_target_counts_as_missing() {
        let reader = FrameRateReader::new("presentmon", Some("  ".to_string()));
        assert_eq!(reader.process_name, None);
    }

    #[test]
    fn launch_failure_reports_error_and_stays_inert() {
        let mut reader = FrameRateReader::new(
            "definitely-not-a-real-capture-tool",
            Some("game.exe".to_string()),
        );
        let err = reader.start().unwrap_err();
        assert!(matches!(err, OverlayError::LaunchFailed { .. }));
        assert!(!reader.is_running());
        assert_eq!(reader.sample(), None);
    }

    #[cfg(target_os = "linux")]
    fn fake_capture_tool(dir: &tempfile::TempDir) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.path().join("fake-presentmon");
        std::fs::write(&script, "#!/bin/sh\nexec yes 'pid 1, fps 60.0'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn fast_capture_output_yields_current_value_and_stop_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = FrameRateReader::new(fake_capture_tool(&dir), Some("game.exe".to_string()));

        // A freshly written script can briefly fail with "text file busy".
        let mut attempts = 0;
        while let Err(e) = reader.start() {
            attempts += 1;
            assert!(attempts < 10, "capture tool never started: {}", e);
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(reader.is_running());
        let pid = match &reader.state {
            ReaderState::Running { child, .. } => child.id(),
            _ => unreachable!(),
        };

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut fps = None;
        while fps.is_none() && std::time::Instant::now() < deadline {
            fps = reader.sample();
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(fps, Some(60.0));

        // The tool writes far faster than the reader samples; only the newest
        // line is kept.
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert_eq!(reader.sample(), Some(60.0));

        reader.stop();
        assert!(!reader.is_running());
        assert!(!std::path::Path::new(&format!("/proc/{}", pid)).exists());
        reader.stop();
    }
}
