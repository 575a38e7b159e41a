use crate::capability::Capability;
use crate::control::ControlHandle;
use crate::theme::{Rgb, Theme};
use std::sync::Arc;

pub const ICON_SIZE: u32 = 32;
const TOOLTIP: &str = "OSD Overlay";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayAction {
    Show,
    Hide,
    Settings,
    Quit,
}

impl TrayAction {
    pub const ALL: [TrayAction; 4] = [
        TrayAction::Show,
        TrayAction::Hide,
        TrayAction::Settings,
        TrayAction::Quit,
    ];

    pub fn menu_id(self) -> &'static str {
        match self {
            TrayAction::Show => "show",
            TrayAction::Hide => "hide",
            TrayAction::Settings => "settings",
            TrayAction::Quit => "quit",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TrayAction::Show => "Show",
            TrayAction::Hide => "Hide",
            TrayAction::Settings => "Settings",
            TrayAction::Quit => "Quit",
        }
    }

    pub fn from_menu_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.menu_id() == id)
    }
}

type Callback = Box<dyn Fn() + Send + Sync>;

/// Menu handlers. They run on the tray worker, never on the poll loop.
pub struct TrayCallbacks {
    on_show: Callback,
    on_hide: Callback,
    on_settings: Callback,
    on_quit: Callback,
}

impl TrayCallbacks {
    pub fn new(
        on_show: impl Fn() + Send + Sync + 'static,
        on_hide: impl Fn() + Send + Sync + 'static,
        on_settings: impl Fn() + Send + Sync + 'static,
        on_quit: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_show: Box::new(on_show),
            on_hide: Box::new(on_hide),
            on_settings: Box::new(on_settings),
            on_quit: Box::new(on_quit),
        }
    }

    /// Every action becomes a control message for the poll loop.
    pub fn from_control(handle: ControlHandle) -> Self {
        let show = handle.clone();
        let hide = handle.clone();
        let settings = handle.clone();
        Self::new(
            move || show.show(),
            move || hide.hide(),
            move || settings.open_settings(),
            move || handle.quit(),
        )
    }

    pub fn dispatch(&self, action: TrayAction) {
        tracing::debug!("Tray action: {:?}", action);
        match action {
            TrayAction::Show => (self.on_show)(),
            TrayAction::Hide => (self.on_hide)(),
            TrayAction::Settings => (self.on_settings)(),
            TrayAction::Quit => (self.on_quit)(),
        }
    }
}

pub struct TrayController {
    callbacks: Arc<TrayCallbacks>,
    #[cfg(feature = "tray")]
    native: Option<native::NativeTray>,
}

impl TrayController {
    /// Creates the icon and its menu. Absent when the platform tray cannot
    /// be reached or the binary was built without tray support.
    pub fn start(callbacks: TrayCallbacks, theme: &Theme) -> Capability<Self> {
        let callbacks = Arc::new(callbacks);

        #[cfg(feature = "tray")]
        {
            let native = native::NativeTray::spawn(callbacks.clone(), icon_rgba(theme));
            Capability::resolve("System tray", native).map(|native| Self {
                callbacks,
                native: Some(native),
            })
        }

        #[cfg(not(feature = "tray"))]
        {
            let _ = (callbacks, theme);
            Capability::absent("built without tray support")
        }
    }

    /// Removes the icon and ends the tray worker. Idempotent.
    pub fn stop(&mut self) {
        #[cfg(feature = "tray")]
        if let Some(mut native) = self.native.take() {
            native.stop();
            tracing::debug!("Tray icon removed");
        }
    }
}

impl Drop for TrayController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Procedural RGBA icon: the panel color with CPU, GPU and RAM bars.
pub fn icon_rgba(theme: &Theme) -> Vec<u8> {
    let size = ICON_SIZE as usize;
    let bars: [(Rgb, usize); 3] = [(theme.cpu, 22), (theme.gpu, 14), (theme.ram, 18)];
    let bar_width = 6;
    let gap = 3;
    let left = (size - (bars.len() * bar_width + (bars.len() - 1) * gap)) / 2;
    let bottom = size - 5;

    let mut pixels = Vec::with_capacity(size * size * 4);
    for y in 0..size {
        for x in 0..size {
            let mut color = theme.panel;
            for (i, (bar_color, height)) in bars.iter().enumerate() {
                let x0 = left + i * (bar_width + gap);
                if (x0..x0 + bar_width).contains(&x) && y < bottom && y >= bottom - height {
                    color = *bar_color;
                }
            }
            pixels.extend_from_slice(&[color.0, color.1, color.2, 0xff]);
        }
    }
    pixels
}

#[cfg(feature = "tray")]
mod native {
    use super::{TrayAction, TrayCallbacks, ICON_SIZE, TOOLTIP};
    use crate::error::{OverlayError, Result};
    use std::sync::Arc;
    use tray_icon::menu::{Menu, MenuEvent, MenuItem, PredefinedMenuItem};
    use tray_icon::{Icon, TrayIcon, TrayIconBuilder};

    fn unavailable(e: impl std::fmt::Display) -> OverlayError {
        OverlayError::Unavailable(e.to_string())
    }

    fn build_tray(rgba: Vec<u8>) -> Result<TrayIcon> {
        let item =
            |action: TrayAction| MenuItem::with_id(action.menu_id(), action.label(), true, None);
        let show = item(TrayAction::Show);
        let hide = item(TrayAction::Hide);
        let settings = item(TrayAction::Settings);
        let quit = item(TrayAction::Quit);

        let menu = Menu::new();
        menu.append_items(&[
            &show,
            &hide,
            &PredefinedMenuItem::separator(),
            &settings,
            &PredefinedMenuItem::separator(),
            &quit,
        ])
        .map_err(unavailable)?;

        let icon = Icon::from_rgba(rgba, ICON_SIZE, ICON_SIZE).map_err(unavailable)?;

        TrayIconBuilder::new()
            .with_menu(Box::new(menu))
            .with_tooltip(TOOLTIP)
            .with_icon(icon)
            .build()
            .map_err(unavailable)
    }

    fn install_menu_handler(callbacks: Arc<TrayCallbacks>) {
        MenuEvent::set_event_handler(Some(move |event: MenuEvent| {
            match TrayAction::from_menu_id(&event.id.0) {
                Some(action) => callbacks.dispatch(action),
                None => tracing::debug!("Ignoring tray menu id {:?}", event.id.0),
            }
        }));
    }

    /// On Linux the icon lives on its own thread running the GTK main loop.
    #[cfg(target_os = "linux")]
    pub struct NativeTray {
        worker: Option<std::thread::JoinHandle<()>>,
    }

    #[cfg(target_os = "linux")]
    impl NativeTray {
        pub fn spawn(callbacks: Arc<TrayCallbacks>, rgba: Vec<u8>) -> Result<Self> {
            install_menu_handler(callbacks);

            let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
            let worker = std::thread::Builder::new()
                .name("tray".to_string())
                .spawn(move || {
                    if let Err(e) = gtk::init() {
                        let _ = ready_tx.send(Err(unavailable(e)));
                        return;
                    }
                    match build_tray(rgba) {
                        Ok(tray) => {
                            let _ = ready_tx.send(Ok(()));
                            gtk::main();
                            drop(tray);
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                })?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self {
                    worker: Some(worker),
                }),
                Ok(Err(e)) => {
                    let _ = worker.join();
                    Err(e)
                }
                Err(_) => Err(unavailable("tray worker exited during startup")),
            }
        }

        pub fn stop(&mut self) {
            MenuEvent::set_event_handler(None::<fn(MenuEvent)>);
            if let Some(worker) = self.worker.take() {
                gtk::glib::idle_add_once(gtk::main_quit);
                if worker.join().is_err() {
                    tracing::warn!("Tray worker panicked during shutdown");
                }
            }
        }
    }

    /// Elsewhere the icon is serviced by the GUI thread's event loop.
    #[cfg(not(target_os = "linux"))]
    pub struct NativeTray {
        icon: Option<TrayIcon>,
    }

    #[cfg(not(target_os = "linux"))]
    impl NativeTray {
        pub fn spawn(callbacks: Arc<TrayCallbacks>, rgba: Vec<u8>) -> Result<Self> {
            install_menu_handler(callbacks);
            let icon = build_tray(rgba)?;
            Ok(Self { icon: Some(icon) })
        }

        pub fn stop(&mut self) {
            MenuEvent::set_event_handler(None::<fn(MenuEvent)>);
            self.icon.take();
        }
    }
}
