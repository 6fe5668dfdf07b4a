//! Host interruption signals (tab hidden, page unload) and their handlers.

use std::sync::{Mutex, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterruptSignal {
    /// The page lost visibility; it may never come back.
    Hidden,
    /// The page is being torn down.
    Unload,
}

impl InterruptSignal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::Unload => "unload",
        }
    }
}

#[async_trait]
pub trait InterruptHandler: Send + Sync {
    async fn on_interrupt(&self, signal: InterruptSignal);
}

/// Registry the host raises interruption signals on.
///
/// Handlers are held weakly: dropping the owner unregisters it. `raise` runs
/// live handlers in registration order and awaits each one.
#[derive(Default)]
pub struct InterruptHub {
    handlers: Mutex<Vec<Weak<dyn InterruptHandler>>>,
}

impl InterruptHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Weak<dyn InterruptHandler>) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push(handler);
        }
    }

    /// Number of handlers still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .map(|h| h.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every live handler and return how many ran.
    pub async fn raise(&self, signal: InterruptSignal) -> usize {
        let live: Vec<_> = match self.handlers.lock() {
            Ok(mut handlers) => {
                handlers.retain(|w| w.strong_count() > 0);
                handlers.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => Vec::new(),
        };

        debug!(signal = signal.as_str(), handlers = live.len(), "raising interrupt");
        for handler in &live {
            handler.on_interrupt(signal).await;
        }
        live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, InterruptSignal)>>>,
    }

    #[async_trait]
    impl InterruptHandler for Recorder {
        async fn on_interrupt(&self, signal: InterruptSignal) {
            self.log.lock().unwrap().push((self.name, signal));
        }
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first: Arc<dyn InterruptHandler> = Arc::new(Recorder { name: "first", log: log.clone() });
        let second: Arc<dyn InterruptHandler> = Arc::new(Recorder { name: "second", log: log.clone() });

        let hub = InterruptHub::new();
        hub.register(Arc::downgrade(&first));
        hub.register(Arc::downgrade(&second));

        assert_eq!(hub.raise(InterruptSignal::Hidden).await, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![("first", InterruptSignal::Hidden), ("second", InterruptSignal::Hidden)]
        );
    }

    #[tokio::test]
    async fn dropped_handlers_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let kept: Arc<dyn InterruptHandler> = Arc::new(Recorder { name: "kept", log: log.clone() });
        let dropped: Arc<dyn InterruptHandler> = Arc::new(Recorder { name: "dropped", log: log.clone() });

        let hub = InterruptHub::new();
        hub.register(Arc::downgrade(&dropped));
        hub.register(Arc::downgrade(&kept));
        drop(dropped);

        assert_eq!(hub.len(), 1);
        assert_eq!(hub.raise(InterruptSignal::Unload).await, 1);
        assert_eq!(*log.lock().unwrap(), vec![("kept", InterruptSignal::Unload)]);
    }
}
