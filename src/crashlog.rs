use crate::error::Result;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic;
use std::path::PathBuf;
use std::sync::Once;

thread_local! {
    /// Location and backtrace of the most recent panic on this thread,
    /// captured before unwinding.
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Chains a hook in front of the current one that records where each panic
/// happened. Installed once per process.
pub fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let trace = format!("{}\n{}", info, Backtrace::force_capture());
            PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

fn take_panic_trace() -> Option<String> {
    PANIC_TRACE.with(|slot| slot.borrow_mut().take())
}

/// Append-only plain-text log for failures that end the poll loop.
#[derive(Debug, Clone)]
pub struct CrashLog {
    path: PathBuf,
}

impl CrashLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        install_panic_hook();
        Self { path: path.into() }
    }

    /// Appends `trace` preceded by a blank line, creating the file and its
    /// directory on first use.
    pub fn append(&self, trace: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file)?;
        writeln!(file, "{}", trace)?;
        Ok(())
    }

    /// Appends a caught panic with a timestamp and the backtrace taken at the
    /// panic site. Must run on the thread that panicked.
    pub fn record_panic(&self, payload: &(dyn Any + Send)) {
        let site = take_panic_trace().unwrap_or_else(|| {
            format!("no panic site recorded\n{}", Backtrace::force_capture())
        });
        let trace = format!(
            "[{}] poll loop failed: {}\n{}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            panic_message(payload),
            site
        );
        tracing::error!("Poll loop failed, details in {}", self.path.display());
        if let Err(e) = self.append(&trace) {
            tracing::error!("Could not write crash log: {}", e);
        }
    }
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_creates_directory_and_prefixes_blank_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = CrashLog::new(dir.path().join("logs").join("error.log"));

        log.append("first failure").unwrap();
        log.append("second failure").unwrap();

        let contents = std::fs::read_to_string(&log.path).unwrap();
        assert_eq!(contents, "\nfirst failure\n\nsecond failure\n");
    }

    #[test]
    fn record_panic_writes_message() {
        let dir = tempfile::tempdir().unwrap();
        let log = CrashLog::new(dir.path().join("error.log"));

        let payload = std::panic::catch_unwind(|| panic!("sensor exploded")).unwrap_err();
        log.record_panic(&*payload);

        let contents = std::fs::read_to_string(&log.path).unwrap();
        assert!(contents.starts_with('\n'));
        assert!(contents.contains("poll loop failed: sensor exploded"));
    }

    #[test]
    fn panic_message_handles_owned_strings() {
        let payload = std::panic::catch_unwind(|| panic!("{} sensors", 3)).unwrap_err();
        assert_eq!(panic_message(&*payload), "3 sensors");
    }

    #[inline(never)]
    fn read_sensor_registers() -> f32 {
        panic!("register read failed")
    }

    #[test]
    fn record_panic_uses_backtrace_from_panic_site() {
        let dir = tempfile::tempdir().unwrap();
        let log = CrashLog::new(dir.path().join("error.log"));

        let payload = std::panic::catch_unwind(read_sensor_registers).unwrap_err();
        log.record_panic(&*payload);

        let contents = std::fs::read_to_string(&log.path).unwrap();
        assert!(contents.contains("poll loop failed: register read failed"));
        assert!(contents.contains("crashlog.rs"));
        assert!(contents.contains("read_sensor_registers"));
        assert!(!contents.contains("no panic site recorded"));
    }

    #[test]
    fn panic_site_is_consumed_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = CrashLog::new(dir.path().join("error.log"));

        let payload = std::panic::catch_unwind(|| panic!("first")).unwrap_err();
        log.record_panic(&*payload);
        log.record_panic(&"second");

        let contents = std::fs::read_to_string(&log.path).unwrap();
        let second = contents.split("poll loop failed: second").nth(1).unwrap();
        assert!(second.contains("no panic site recorded"));
    }
}
