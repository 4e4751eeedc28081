use crate::application::pipeline::symbol_pipeline::SymbolPipeline;
use crate::application::pipeline::worker::{PipelineCommand, PipelineWorker, WorkerStatus};
use crate::config::Config;
use crate::domain::errors::PipelineError;
use crate::domain::market::candle::HistoricalBar;
use crate::domain::market::tick::Tick;
use crate::domain::repositories::EntityStore;
use crate::infrastructure::event_bus::EventEmitter;
use crate::infrastructure::observability::Metrics;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct WorkerHandle {
    cmd_tx: mpsc::Sender<PipelineCommand>,
    status: Arc<RwLock<WorkerStatus>>,
    join: JoinHandle<()>,
}

/// Routes ticks and bars to one worker task per symbol.
///
/// Workers are spawned lazily on the first input of a symbol. Each has a
/// bounded queue, so a slow symbol applies backpressure to its producer
/// without blocking the others.
#[derive(Clone)]
pub struct DetectionEngine {
    config: Arc<Config>,
    store: Arc<dyn EntityStore>,
    emitter: EventEmitter,
    metrics: Metrics,
    workers: Arc<Mutex<HashMap<String, WorkerHandle>>>,
}

impl DetectionEngine {
    pub fn new(
        config: Config,
        store: Arc<dyn EntityStore>,
        emitter: EventEmitter,
        metrics: Metrics,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            emitter,
            metrics,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn sender_for(&self, symbol: &str) -> Result<mpsc::Sender<PipelineCommand>, PipelineError> {
        let mut workers = self.workers.lock().await;

        if let Some(handle) = workers.get(symbol) {
            if handle.status.read().await.is_running() {
                return Ok(handle.cmd_tx.clone());
            }
            return Err(PipelineError::Stopped {
                symbol: symbol.to_string(),
            });
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.pipeline.queue_capacity);
        let status = Arc::new(RwLock::new(WorkerStatus::Starting));
        let pipeline = SymbolPipeline::new(
            symbol,
            &self.config,
            self.store.clone(),
            self.emitter.clone(),
            self.metrics.clone(),
        );
        let worker = PipelineWorker::new(pipeline, cmd_rx, status.clone(), self.metrics.clone());
        let join = tokio::spawn(worker.run());

        info!("DetectionEngine: spawned pipeline for {}", symbol);
        workers.insert(
            symbol.to_string(),
            WorkerHandle {
                cmd_tx: cmd_tx.clone(),
                status,
                join,
            },
        );
        Ok(cmd_tx)
    }

    async fn send(&self, symbol: &str, cmd: PipelineCommand) -> Result<(), PipelineError> {
        let tx = self.sender_for(symbol).await?;
        tx.send(cmd).await.map_err(|_| PipelineError::Stopped {
            symbol: symbol.to_string(),
        })
    }

    /// Queues a tick; waits while the symbol's queue is full.
    pub async fn submit_tick(&self, tick: Tick) -> Result<(), PipelineError> {
        let symbol = tick.symbol.clone();
        self.send(&symbol, PipelineCommand::Tick(tick)).await
    }

    /// Queues historical bars, grouped per symbol, preserving their order.
    pub async fn submit_bars(&self, bars: Vec<HistoricalBar>) -> Result<(), PipelineError> {
        let mut grouped: Vec<(String, Vec<HistoricalBar>)> = Vec::new();
        for bar in bars {
            match grouped.iter_mut().find(|(s, _)| *s == bar.symbol) {
                Some((_, group)) => group.push(bar),
                None => grouped.push((bar.symbol.clone(), vec![bar])),
            }
        }
        for (symbol, group) in grouped {
            self.send(&symbol, PipelineCommand::Bars(group)).await?;
        }
        Ok(())
    }

    /// Waits until everything queued for `symbol` is processed and forming
    /// candles are closed.
    pub async fn flush_symbol(&self, symbol: &str) -> Result<(), PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(symbol, PipelineCommand::Flush(reply_tx)).await?;
        reply_rx.await.map_err(|_| PipelineError::Stopped {
            symbol: symbol.to_string(),
        })
    }

    pub async fn status(&self, symbol: &str) -> Option<WorkerStatus> {
        let workers = self.workers.lock().await;
        let handle = workers.get(symbol)?;
        let status = handle.status.read().await.clone();
        Some(status)
    }

    pub async fn statuses(&self) -> HashMap<String, WorkerStatus> {
        let workers = self.workers.lock().await;
        let mut out = HashMap::with_capacity(workers.len());
        for (symbol, handle) in workers.iter() {
            out.insert(symbol.clone(), handle.status.read().await.clone());
        }
        out
    }

    pub async fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Stops the symbol's worker after flushing it. Returns its final status.
    pub async fn remove_symbol(&self, symbol: &str) -> Option<WorkerStatus> {
        let handle = self.workers.lock().await.remove(symbol)?;
        Some(Self::stop_worker(symbol, handle).await)
    }

    /// Stops every worker; each flushes and persists before exiting.
    pub async fn shutdown(&self) -> HashMap<String, WorkerStatus> {
        let handles: Vec<(String, WorkerHandle)> =
            self.workers.lock().await.drain().collect();
        info!("DetectionEngine: shutting down {} pipelines", handles.len());

        let stops = handles.into_iter().map(|(symbol, handle)| async move {
            let status = Self::stop_worker(&symbol, handle).await;
            (symbol, status)
        });
        join_all(stops).await.into_iter().collect()
    }

    async fn stop_worker(symbol: &str, handle: WorkerHandle) -> WorkerStatus {
        let (reply_tx, reply_rx) = oneshot::channel();
        if handle
            .cmd_tx
            .send(PipelineCommand::Shutdown(reply_tx))
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        drop(handle.cmd_tx);
        if let Err(e) = handle.join.await {
            warn!("DetectionEngine: {} worker panicked: {}", symbol, e);
            return WorkerStatus::Failed(e.to_string());
        }
        handle.status.read().await.clone()
    }
}
