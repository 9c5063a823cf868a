// THEORY:
// The `ComputeWorker` is the background computation thread of the engine. The UI side
// never runs a redraw itself: it queues a `RedrawTask` and either awaits the reply or
// simply watches the shared frame slot.
//
// Key architectural principles:
// 1.  **Single Dispatcher**: one tokio task drains an unbounded queue. Redraws are
//     processed strictly one at a time, so reduction and generation of one epoch never
//     interleave with another epoch's.
// 2.  **Latest Wins**: when several tasks are waiting, only the newest is computed.
//     Older ones are answered with `Cancelled` without doing any work; their views are
//     outdated anyway.
// 3.  **Dedicated Pool**: the passes run inside `spawn_blocking` on a rayon pool owned by
//     the worker, so heavy data-parallel work never stalls the async runtime.
// 4.  **Publish Only Current Frames**: a finished frame is published through
//     `Shared<Frame>` only if its epoch is still current. A stale frame is dropped.

use crate::config::EngineConfig;
use crate::core_modules::collection::HistogramCollection;
use crate::core_modules::shared::Shared;
use crate::core_modules::viewport::{Generation, ViewportCtx};
use crate::errors::{Cancelled, RedrawError};
use crate::pipeline::{Frame, RedrawPipeline, RedrawRequest};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub type FrameResult = Result<Arc<Frame>, RedrawError>;

pub struct RedrawTask {
    pub request: RedrawRequest,
    pub result_sender: oneshot::Sender<FrameResult>,
}

pub struct ComputeWorker {
    task_sender: mpsc::UnboundedSender<RedrawTask>,
    worker: tokio::task::JoinHandle<()>,
    pipeline: RedrawPipeline,
    frames: Shared<Frame>,
}

impl ComputeWorker {
    /// Spawns the dispatcher. Must be called from within a tokio runtime.
    pub fn new(config: EngineConfig, generation: Arc<Generation>) -> Result<Self, rayon::ThreadPoolBuildError> {
        let threads = config.resolved_threads();
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("distview-compute-{i}"))
                .build()?,
        );
        let pipeline = RedrawPipeline::new(config, generation);
        let frames = Shared::new(Frame::empty());
        let (task_sender, task_receiver) = mpsc::unbounded_channel::<RedrawTask>();

        let worker = tokio::spawn(Self::run(task_receiver, pipeline.clone(), pool, frames.clone()));
        info!("compute worker started with {threads} threads");

        Ok(Self { task_sender, worker, pipeline, frames })
    }

    async fn run(
        mut task_receiver: mpsc::UnboundedReceiver<RedrawTask>,
        pipeline: RedrawPipeline,
        pool: Arc<rayon::ThreadPool>,
        frames: Shared<Frame>,
    ) {
        while let Some(mut task) = task_receiver.recv().await {
            while let Ok(newer) = task_receiver.try_recv() {
                let _ = task.result_sender.send(Err(RedrawError::Cancelled(Cancelled)));
                task = newer;
            }

            let RedrawTask { request, result_sender } = task;
            let job_pipeline = pipeline.clone();
            let job_pool = Arc::clone(&pool);
            let outcome =
                tokio::task::spawn_blocking(move || job_pool.install(|| job_pipeline.redraw(&request))).await;

            let result = match outcome {
                Ok(Ok(frame)) if !frame.epoch.is_current() => Err(RedrawError::Cancelled(Cancelled)),
                Ok(Ok(frame)) => {
                    let frame = Arc::new(frame);
                    let version = frames.publish_arc(Arc::clone(&frame));
                    info!("published frame {version}: {} polylines", frame.bins);
                    Ok(frame)
                }
                Ok(Err(err)) => Err(err),
                Err(join_err) => {
                    error!("redraw job failed: {join_err}");
                    Err(RedrawError::WorkerGone)
                }
            };
            match &result {
                Err(err) if err.is_cancelled() => debug!("dropped stale redraw"),
                Err(err) => warn!("redraw failed: {err}"),
                Ok(_) => {}
            }
            let _ = result_sender.send(result);
        }
        debug!("compute worker queue closed");
    }

    pub fn pipeline(&self) -> &RedrawPipeline {
        &self.pipeline
    }

    /// A request bound to the current epoch, with the configured defaults.
    pub fn request(&self, ctx: Arc<ViewportCtx>, sets: Arc<HistogramCollection>) -> RedrawRequest {
        self.pipeline.request(ctx, sets)
    }

    /// Queues a redraw without waiting for it.
    pub fn submit(&self, request: RedrawRequest) -> Result<oneshot::Receiver<FrameResult>, RedrawError> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(RedrawTask { request, result_sender })
            .map_err(|_| RedrawError::WorkerGone)?;
        Ok(result_receiver)
    }

    /// Queues a redraw and waits for its frame.
    pub async fn redraw(&self, request: RedrawRequest) -> FrameResult {
        let receiver = self.submit(request)?;
        receiver.await.map_err(|_| RedrawError::WorkerGone)?
    }

    /// The slot completed frames are published to.
    pub fn frames(&self) -> Shared<Frame> {
        self.frames.clone()
    }

    /// Closes the queue and waits for the in-flight redraw to finish.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        if let Err(err) = self.worker.await {
            error!("compute worker panicked: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::collection::palette;
    use crate::core_modules::discretizer::DiscreteKey;

    fn inputs() -> (Arc<ViewportCtx>, Arc<HistogramCollection>) {
        let ctx = Arc::new(ViewportCtx::for_range(2, 0.0, 7.0, 8).unwrap());
        let coll = HistogramCollection::new(2, &palette(1), 2);
        for i in 0..8u8 {
            coll[0].add(DiscreteKey::new(vec![i, 7 - i]), &[i as f32, (7 - i) as f32]);
        }
        (ctx, Arc::new(coll))
    }

    #[tokio::test]
    async fn redraw_publishes_frame() {
        let worker = ComputeWorker::new(EngineConfig::default().worker_threads(2), Generation::new()).unwrap();
        let frames = worker.frames();
        let (ctx, sets) = inputs();
        let frame = worker.redraw(worker.request(ctx, sets)).await.unwrap();
        assert_eq!(frame.bins, 8);
        assert_eq!(frame.vertices.len(), 16);
        assert_eq!(frames.version(), 1);
        assert_eq!(frames.current().bins, 8);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn queued_requests_collapse_to_the_newest() {
        let worker = ComputeWorker::new(EngineConfig::default().worker_threads(1), Generation::new()).unwrap();
        let (ctx, sets) = inputs();
        let first = worker.submit(worker.request(Arc::clone(&ctx), Arc::clone(&sets))).unwrap();
        let second = worker.submit(worker.request(Arc::clone(&ctx), Arc::clone(&sets))).unwrap();
        let last = worker.submit(worker.request(ctx, sets)).unwrap();

        assert!(first.await.unwrap().unwrap_err().is_cancelled());
        assert!(second.await.unwrap().unwrap_err().is_cancelled());
        assert_eq!(last.await.unwrap().unwrap().bins, 8);
        assert_eq!(worker.frames().version(), 1);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn stale_requests_publish_nothing() {
        let generation = Generation::new();
        let worker = ComputeWorker::new(EngineConfig::default().worker_threads(1), Arc::clone(&generation)).unwrap();
        let (ctx, sets) = inputs();
        let request = worker.request(ctx, sets);
        generation.bump_reset();
        let result = worker.redraw(request).await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(worker.frames().version(), 0);
        worker.shutdown().await;
    }
}
