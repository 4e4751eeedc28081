use crate::application::pipeline::symbol_pipeline::SymbolPipeline;
use crate::domain::errors::PipelineError;
use crate::domain::market::candle::HistoricalBar;
use crate::domain::market::tick::Tick;
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum PipelineCommand {
    Tick(Tick),
    Bars(Vec<HistoricalBar>),
    /// Close forming candles and persist watermarks, then answer
    Flush(oneshot::Sender<()>),
    /// Flush, persist and exit
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopped,
    Failed(String),
}

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, WorkerStatus::Starting | WorkerStatus::Running)
    }
}

/// Single owner of one symbol's pipeline, fed through a bounded queue.
pub struct PipelineWorker {
    pipeline: SymbolPipeline,
    cmd_rx: Receiver<PipelineCommand>,
    status: Arc<RwLock<WorkerStatus>>,
    metrics: Metrics,
}

impl PipelineWorker {
    pub fn new(
        pipeline: SymbolPipeline,
        cmd_rx: Receiver<PipelineCommand>,
        status: Arc<RwLock<WorkerStatus>>,
        metrics: Metrics,
    ) -> Self {
        Self {
            pipeline,
            cmd_rx,
            status,
            metrics,
        }
    }

    pub async fn run(mut self) {
        let symbol = self.pipeline.symbol().to_string();
        self.metrics.pipeline_started();

        if let Err(e) = self.pipeline.warm_up().await {
            self.fail(&symbol, e).await;
            return;
        }
        *self.status.write().await = WorkerStatus::Running;
        info!("PipelineWorker: {} running", symbol);

        while let Some(cmd) = self.cmd_rx.recv().await {
            let result = match cmd {
                PipelineCommand::Tick(tick) => self.pipeline.on_tick(&tick).await,
                PipelineCommand::Bars(bars) => {
                    let count = bars.len();
                    self.pipeline.on_bars(bars).await.map(|accepted| {
                        debug!(
                            "PipelineWorker: {} accepted {}/{} bars",
                            symbol, accepted, count
                        );
                    })
                }
                PipelineCommand::Flush(reply) => {
                    let result = self.flush_and_persist().await;
                    // A failed flush drops the reply; the caller sees a stopped pipeline
                    if result.is_ok() {
                        let _ = reply.send(());
                    }
                    result
                }
                PipelineCommand::Shutdown(reply) => {
                    let result = self.flush_and_persist().await;
                    match result {
                        Ok(()) => self.stop(&symbol).await,
                        Err(e) => self.fail(&symbol, e).await,
                    }
                    let _ = reply.send(());
                    return;
                }
            };

            let result = match result {
                Ok(()) => self.pipeline.persist_watermarks().await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                if e.is_fatal() {
                    self.fail(&symbol, e).await;
                    return;
                }
                warn!("PipelineWorker: {} input skipped: {}", symbol, e);
            }
        }

        // Every sender dropped: treat as a graceful shutdown
        match self.flush_and_persist().await {
            Ok(()) => self.stop(&symbol).await,
            Err(e) => self.fail(&symbol, e).await,
        }
    }

    async fn flush_and_persist(&mut self) -> Result<(), PipelineError> {
        self.pipeline.flush().await?;
        self.pipeline.persist_watermarks().await
    }

    async fn stop(&self, symbol: &str) {
        info!("PipelineWorker: {} stopped", symbol);
        *self.status.write().await = WorkerStatus::Stopped;
        self.metrics.pipeline_ended(false);
    }

    async fn fail(&mut self, symbol: &str, e: PipelineError) {
        error!("PipelineWorker: {} failed: {}", symbol, e);
        *self.status.write().await = WorkerStatus::Failed(e.to_string());
        self.metrics.pipeline_ended(true);
        // Queued commands are dropped; pending replies see a closed channel
        self.cmd_rx.close();
    }
}
