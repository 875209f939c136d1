use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;

/// Installs the Ctrl-C handler and a logging panic hook, returning the guard
/// the main loop polls or awaits. Call once, early, inside the runtime.
pub async fn install_shutdown_handler() -> ShutdownGuard {
    let guard = ShutdownGuard {
        requested: Arc::new(AtomicBool::new(false)),
        notify: Arc::new(Notify::new()),
    };

    let requested = Arc::clone(&guard.requested);
    let notify = Arc::clone(&guard.notify);
    tokio::spawn(async move {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
        tracing::info!("Shutdown requested via Ctrl-C");
        requested.store(true, Ordering::SeqCst);
        notify.notify_waiters();
    });

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!("PANIC: {}", panic_info);
        original_hook(panic_info);
    }));

    guard
}

#[derive(Clone)]
pub struct ShutdownGuard {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownGuard {
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Programmatic shutdown, equivalent to a Ctrl-C.
    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
