//! Optional third-party capabilities (GPU telemetry, frame-rate capture,
//! tray icon, updater) resolved once at startup.

use std::fmt;

/// Either a live handle to an optional capability or the reason it is
/// missing on this run.
pub enum Capability<T> {
    Present(T),
    Absent { reason: String },
}

impl<T> Capability<T> {
    pub fn absent(reason: impl Into<String>) -> Self {
        Capability::Absent {
            reason: reason.into(),
        }
    }

    /// Resolves a fallible constructor, logging why the capability is absent.
    pub fn resolve<E: fmt::Display>(name: &str, result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(value) => {
                tracing::debug!("{} available", name);
                Capability::Present(value)
            }
            Err(e) => {
                tracing::info!("{} unavailable: {}", name, e);
                Capability::absent(e.to_string())
            }
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Capability::Present(_))
    }

    pub fn as_ref(&self) -> Option<&T> {
        match self {
            Capability::Present(value) => Some(value),
            Capability::Absent { .. } => None,
        }
    }

    pub fn as_mut(&mut self) -> Option<&mut T> {
        match self {
            Capability::Present(value) => Some(value),
            Capability::Absent { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Capability<U> {
        match self {
            Capability::Present(value) => Capability::Present(f(value)),
            Capability::Absent { reason } => Capability::Absent { reason },
        }
    }

    pub fn absence_reason(&self) -> Option<&str> {
        match self {
            Capability::Present(_) => None,
            Capability::Absent { reason } => Some(reason),
        }
    }
}

impl<T> fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Present(_) => f.write_str("Present"),
            Capability::Absent { reason } => write!(f, "Absent({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_keeps_error_text_as_reason() {
        let cap: Capability<u32> = Capability::resolve("probe", Err::<u32, _>("driver missing"));
        assert!(!cap.is_present());
        assert_eq!(cap.absence_reason(), Some("driver missing"));
    }

    #[test]
    fn present_exposes_handle() {
        let mut cap: Capability<u32> = Capability::resolve("probe", Ok::<_, String>(7));
        assert_eq!(cap.as_ref(), Some(&7));
        if let Some(v) = cap.as_mut() {
            *v = 8;
        }
        assert_eq!(cap.as_ref(), Some(&8));
        assert_eq!(cap.absence_reason(), None);
    }

    #[test]
    fn map_preserves_absence() {
        let cap: Capability<u32> = Capability::absent("no driver");
        let mapped = cap.map(|v| v.to_string());
        assert_eq!(mapped.absence_reason(), Some("no driver"));

        let cap: Capability<u32> = Capability::Present(3);
        assert_eq!(cap.map(|v| v * 2).as_ref(), Some(&6));
    }
}
