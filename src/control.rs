//! Messages from tray callbacks and background tasks to the poll loop.
//! Only the loop applies them, so it stays the single writer of window
//! visibility.

use crate::updater::UpdateDescriptor;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Show,
    Hide,
    Quit,
    OpenSettings,
    UpdateAvailable(UpdateDescriptor),
}

type Waker = Arc<dyn Fn() + Send + Sync>;

/// Cloneable sender side, safe to use from any thread.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<Control>,
    waker: Option<Waker>,
}

impl ControlHandle {
    /// Attaches a wake-up hook (the GUI's repaint request) run after each send.
    pub fn with_waker(mut self, waker: impl Fn() + Send + Sync + 'static) -> Self {
        self.waker = Some(Arc::new(waker));
        self
    }

    pub fn send(&self, control: Control) {
        if self.tx.send(control).is_err() {
            tracing::debug!("Control message dropped, poll loop has exited");
            return;
        }
        if let Some(wake) = &self.waker {
            wake();
        }
    }

    pub fn show(&self) {
        self.send(Control::Show);
    }

    pub fn hide(&self) {
        self.send(Control::Hide);
    }

    pub fn quit(&self) {
        self.send(Control::Quit);
    }

    pub fn open_settings(&self) {
        self.send(Control::OpenSettings);
    }
}

pub struct ControlInbox {
    rx: mpsc::UnboundedReceiver<Control>,
}

impl ControlInbox {
    /// Everything queued since the last drain, in send order.
    pub fn drain(&mut self) -> Vec<Control> {
        let mut out = Vec::new();
        while let Ok(control) = self.rx.try_recv() {
            out.push(control);
        }
        out
    }
}

pub fn channel() -> (ControlHandle, ControlInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlHandle { tx, waker: None }, ControlInbox { rx })
}
