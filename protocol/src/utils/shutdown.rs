use anyhow::anyhow;
use log::{debug, error, info};
use std::sync::Arc;
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Process-wide stop switch. Once triggered it stays triggered.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal(self.tx.subscribe())
    }
}

/// Receiving side of [`Shutdown`]; never misses a trigger that happened
/// before [`ShutdownSignal::wait`] was called.
#[derive(Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    pub async fn wait(&mut self) {
        // a dropped sender also means nobody can keep us running
        let _ = self.0.wait_for(|stopped| *stopped).await;
    }
}

#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Runs until `shutdown` fires.
    async fn run(&self, shutdown: ShutdownSignal) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

pub struct GracefulShutdown {
    shutdown: Shutdown,
    drivers: Vec<Arc<dyn Driver>>,
}

impl GracefulShutdown {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            drivers: vec![],
        }
    }

    pub fn add_driver(&mut self, driver: impl Driver + 'static) {
        self.drivers.push(Arc::new(driver));
    }

    /// Runs every driver until ctrl+c, or until one of them fails; either
    /// way the others are asked to stop and awaited.
    pub async fn watch(mut self) -> anyhow::Result<()> {
        let mut join_set = JoinSet::new();
        for driver in self.drivers.drain(..) {
            let signal = self.shutdown.subscribe();
            let shutdown = self.shutdown.clone();
            join_set.spawn(async move {
                let name = driver.name();
                let result = driver.run(signal).await;
                match &result {
                    Ok(()) => debug!("driver {} stopped", name),
                    Err(err) => {
                        error!("driver {} failed: {:#}", name, err);
                        shutdown.trigger();
                    }
                }
                result
            });
        }

        let ctrl_c = tokio::spawn({
            let shutdown = self.shutdown.clone();
            let mut signal = self.shutdown.subscribe();
            async move {
                select! {
                    result = tokio::signal::ctrl_c() => {
                        match result {
                            Ok(()) => info!("ctrl+c received, shutting down"),
                            Err(err) => error!("graceful shutdown can't install ctrl+c signal handler: {}", err),
                        }
                        shutdown.trigger();
                    }
                    _ = signal.wait() => {}
                }
            }
        });

        debug!("graceful shutdown start watching");
        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            let result = joined.map_err(|err| anyhow!("driver task panicked: {}", err));
            if let Err(err) = result.and_then(|r| r) {
                first_error.get_or_insert(err);
            }
        }

        self.shutdown.trigger();
        let _ = ctrl_c.await;
        first_error.map_or(Ok(()), Err)
    }
}
