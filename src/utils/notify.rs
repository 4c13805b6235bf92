//! Optional user-facing notification callbacks
//!
//! The surrounding application decides how messages are shown (toasts,
//! inline text). Every callback is optional and a missing one is a no-op.

use std::fmt;
use std::sync::Arc;

/// Callback receiving a human-readable message
pub type NotifyFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Notification sink with four optional channels
#[derive(Clone, Default)]
pub struct Notifier {
    on_success: Option<NotifyFn>,
    on_error: Option<NotifyFn>,
    on_warning: Option<NotifyFn>,
    on_info: Option<NotifyFn>,
}

impl Notifier {
    /// A notifier with no callbacks installed
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_success(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn with_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn with_warning(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_warning = Some(Arc::new(f));
        self
    }

    pub fn with_info(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_info = Some(Arc::new(f));
        self
    }

    pub fn success(&self, message: &str) {
        if let Some(f) = &self.on_success {
            f(message);
        }
    }

    pub fn error(&self, message: &str) {
        if let Some(f) = &self.on_error {
            f(message);
        }
    }

    pub fn warning(&self, message: &str) {
        if let Some(f) = &self.on_warning {
            f(message);
        }
    }

    pub fn info(&self, message: &str) {
        if let Some(f) = &self.on_info {
            f(message);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_warning", &self.on_warning.is_some())
            .field("on_info", &self.on_info.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_missing_callbacks_are_noops() {
        let notifier = Notifier::new();
        notifier.success("ok");
        notifier.error("bad");
        notifier.warning("hmm");
        notifier.info("fyi");
    }

    #[test]
    fn test_installed_callbacks_receive_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = seen.clone();
        let infos = seen.clone();
        let notifier = Notifier::new()
            .with_error(move |m| errors.lock().push(format!("error:{m}")))
            .with_info(move |m| infos.lock().push(format!("info:{m}")));

        notifier.error("camera busy");
        notifier.success("ignored");
        notifier.info("retrying");

        assert_eq!(*seen.lock(), vec!["error:camera busy", "info:retrying"]);
    }
}
