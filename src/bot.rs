use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures::future::join_all;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dispatch::{Consumer, Dispatcher, DispatcherBuilder};
use crate::message::{Message, Platform};
use crate::platform::{self, Listener, ListenerError};

/// How long a single listener gets to wind down before its task is aborted
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

type ListenerExit = (Platform, Result<(), ListenerError>);

/// Consumer registrations are open until the first start, then frozen.
enum Registry {
    Open(DispatcherBuilder),
    Frozen(Arc<Dispatcher>),
}

/// Owns the dispatcher and one listener per enabled platform.
pub struct Bot {
    config: Arc<Config>,
    registry: Registry,
    listeners: Vec<Arc<dyn Listener>>,
    tasks: JoinSet<ListenerExit>,
    running: bool,
}

impl Bot {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            registry: Registry::Open(Dispatcher::builder()),
            listeners: Vec::new(),
            tasks: JoinSet::new(),
            running: false,
        }
    }

    pub fn register_global(&mut self, consumer: impl Consumer + 'static) -> Result<()> {
        match &mut self.registry {
            Registry::Open(builder) => {
                builder.register_global(consumer);
                Ok(())
            }
            Registry::Frozen(_) => bail!("consumers must be registered before the bot starts"),
        }
    }

    pub fn register_platform(
        &mut self,
        platform: Platform,
        consumer: impl Consumer + 'static,
    ) -> Result<()> {
        match &mut self.registry {
            Registry::Open(builder) => {
                builder.register_platform(platform, consumer);
                Ok(())
            }
            Registry::Frozen(_) => bail!("consumers must be registered before the bot starts"),
        }
    }

    pub fn consumer_count(&self) -> usize {
        match &self.registry {
            Registry::Open(builder) => builder.consumer_count(),
            Registry::Frozen(dispatcher) => dispatcher.consumer_count(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn active_platforms(&self) -> Vec<Platform> {
        self.listeners.iter().map(|l| l.platform()).collect()
    }

    /// Build a listener for every enabled platform and start them all.
    ///
    /// Unknown platform names and misconfigured platforms are logged and
    /// skipped; the remaining listeners still start.
    pub fn start(&mut self) {
        if self.running {
            warn!("Bot is already running");
            return;
        }

        info!("Starting bot...");
        let (platforms, unknown) = self.config.enabled_platforms();
        for name in unknown {
            warn!(platform = %name, "Unknown platform in enabled_platforms, skipping");
        }

        let mut listeners = Vec::new();
        for platform in platforms {
            match platform::build_listener(platform, &self.config) {
                Ok(listener) => {
                    info!(platform = %platform, "Listener set up");
                    listeners.push(listener);
                }
                Err(e) => error!(
                    platform = %platform,
                    kind = e.kind(),
                    error = %e,
                    "Failed to set up listener"
                ),
            }
        }

        self.launch(listeners);
    }

    /// Wire every listener to the dispatcher, then start each on its own task.
    pub(crate) fn launch(&mut self, listeners: Vec<Arc<dyn Listener>>) {
        let dispatcher = self.freeze();

        for listener in &listeners {
            let dispatcher = Arc::clone(&dispatcher);
            listener.register_callback(Arc::new(move |message: &Message| {
                dispatcher.handle_message(message)
            }));
        }

        for listener in listeners {
            let platform = listener.platform();
            let task_listener = Arc::clone(&listener);
            self.tasks.spawn(async move {
                info!(platform = %platform, "Starting listener");
                (platform, task_listener.start().await)
            });
            self.listeners.push(listener);
        }

        if self.listeners.is_empty() {
            warn!("No listeners are active");
        }
        self.running = true;
        info!(
            listeners = self.listeners.len(),
            consumers = dispatcher.consumer_count(),
            "Bot started"
        );
    }

    fn freeze(&mut self) -> Arc<Dispatcher> {
        let registry = std::mem::replace(&mut self.registry, Registry::Open(Dispatcher::builder()));
        let dispatcher = match registry {
            Registry::Open(builder) => Arc::new(builder.build()),
            Registry::Frozen(dispatcher) => dispatcher,
        };
        self.registry = Registry::Frozen(Arc::clone(&dispatcher));
        dispatcher
    }

    /// Watch the listener tasks until `shutdown` resolves, then stop.
    ///
    /// A listener that exits on its own is logged; the others keep running.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                Some(exit) = self.tasks.join_next(), if !self.tasks.is_empty() => log_exit(exit),
            }
        }
        self.stop().await;
    }

    /// Stop every listener concurrently, then abort whatever is left.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }

        info!("Stopping bot...");
        let stops = self.listeners.iter().map(|listener| {
            let listener = Arc::clone(listener);
            async move {
                let platform = listener.platform();
                match tokio::time::timeout(STOP_TIMEOUT, listener.stop()).await {
                    Ok(Ok(())) => info!(platform = %platform, "Listener stopped"),
                    Ok(Err(e)) => error!(
                        platform = %platform,
                        kind = e.kind(),
                        error = %e,
                        "Error stopping listener"
                    ),
                    Err(_) => warn!(platform = %platform, "Listener did not stop in time"),
                }
            }
        });
        join_all(stops).await;

        self.tasks.abort_all();
        while let Some(exit) = self.tasks.join_next().await {
            log_exit(exit);
        }

        self.listeners.clear();
        self.running = false;
        info!("Bot stopped");
    }
}

fn log_exit(exit: Result<ListenerExit, JoinError>) {
    match exit {
        Ok((platform, Ok(()))) => info!(platform = %platform, "Listener exited"),
        Ok((platform, Err(e))) => error!(
            platform = %platform,
            kind = e.kind(),
            error = %e,
            "Listener failed, continuing without it"
        ),
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!(error = %e, "Listener task panicked"),
    }
}
