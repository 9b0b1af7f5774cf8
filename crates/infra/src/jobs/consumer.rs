//! Queue consumer: dequeues pipeline jobs, evaluates them on a bounded worker
//! pool, records results, and acks or dead-letters each message.
//!
//! Retries are driven by the queue. A transient failure leaves the message
//! un-acked so it is redelivered after the visibility timeout; there is no
//! local retry loop.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use evalhub_catalog::{AppendOutcome, EvalResult};

use super::dead_letter::{DeadLetterReason, DeadLetterRecord, DeadLetterSink};
use super::types::{PipelineJob, ValidatedJob};
use crate::pipeline::{EvaluationPipeline, EvaluationRequest, PipelineError};
use crate::queue::{JobQueue, QueueMessage};
use crate::store::{ExperimentStore, StoreError};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum jobs processed at once.
    pub concurrency: usize,
    /// Deliveries after which a transiently failing job is dead-lettered.
    pub max_deliveries: u32,
    /// Sleep between polls when the queue is empty.
    pub pause_when_empty: Duration,
    pub pipeline_timeout: Duration,
    /// How long in-flight jobs may run after shutdown is requested.
    pub shutdown_grace: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_deliveries: 5,
            pause_when_empty: Duration::from_millis(500),
            pipeline_timeout: Duration::from_secs(240),
            shutdown_grace: Duration::from_secs(30),
            name: "evaluation-consumer".to_string(),
        }
    }
}

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Result recorded (or already present) and message acked.
    Completed(AppendOutcome),
    /// Left un-acked for redelivery.
    Retrying,
    DeadLettered,
    /// Dead-letter write failed; message left un-acked.
    Abandoned,
}

/// Consumer runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConsumerStats {
    pub messages_received: u64,
    pub completed: u64,
    pub duplicates: u64,
    pub retrying: u64,
    pub dead_lettered: u64,
    pub abandoned: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed(AppendOutcome::Appended) => self.completed += 1,
            Outcome::Completed(AppendOutcome::Duplicate) => {
                self.completed += 1;
                self.duplicates += 1;
            }
            Outcome::Retrying => self.retrying += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
            Outcome::Abandoned => self.abandoned += 1,
        }
    }
}

/// Handle to control a running consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl ConsumerHandle {
    /// Stop dequeuing and wait for in-flight jobs (bounded by the grace period).
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "consumer task failed");
            }
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

enum Failure {
    Transient(String),
    Permanent(String),
}

impl From<PipelineError> for Failure {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Transient(m) => Failure::Transient(m),
            PipelineError::Permanent(m) => Failure::Permanent(m),
        }
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            Failure::Transient(err.to_string())
        } else {
            Failure::Permanent(err.to_string())
        }
    }
}

pub struct QueueConsumer {
    queue: Arc<dyn JobQueue>,
    dead_letters: Arc<dyn DeadLetterSink>,
    pipeline: Arc<dyn EvaluationPipeline>,
    store: Arc<dyn ExperimentStore>,
    config: ConsumerConfig,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        dead_letters: Arc<dyn DeadLetterSink>,
        pipeline: Arc<dyn EvaluationPipeline>,
        store: Arc<dyn ExperimentStore>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            dead_letters,
            pipeline,
            store,
            config,
        }
    }

    /// Spawn the consumer loop on the current tokio runtime.
    pub fn spawn(self) -> ConsumerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ConsumerStats::default()));
        let join = tokio::spawn(consumer_loop(Arc::new(self), shutdown_rx, stats.clone()));

        ConsumerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    /// Run one delivered message through its whole lifecycle.
    #[instrument(
        skip(self, message),
        fields(message_id = %message.id, delivery_count = message.delivery_count)
    )]
    pub async fn process(&self, message: QueueMessage) -> Outcome {
        let max = self.config.max_deliveries;
        if message.delivery_count > max {
            let reason = DeadLetterReason::DeliveriesExhausted {
                deliveries: message.delivery_count,
                last_error: None,
            };
            return self.dead_letter(&message, reason).await;
        }

        let job = match serde_json::from_str::<PipelineJob>(&message.body)
            .map_err(|e| e.to_string())
            .and_then(|job| job.validate().map_err(|e| e.to_string()))
        {
            Ok(job) => job,
            Err(detail) => {
                return self
                    .dead_letter(&message, DeadLetterReason::MalformedMessage { detail })
                    .await;
            }
        };

        match self.execute(&job).await {
            Ok(appended) => {
                if let Err(e) = self.queue.ack(&message).await {
                    // The result is stored; a redelivery will be deduplicated.
                    warn!(job_ref = %job.job.reference, error = %e, "failed to ack completed job");
                }
                debug!(job_ref = %job.job.reference, outcome = ?appended, "job completed");
                Outcome::Completed(appended)
            }
            Err(Failure::Transient(detail)) if message.delivery_count >= max => {
                let reason = DeadLetterReason::DeliveriesExhausted {
                    deliveries: message.delivery_count,
                    last_error: Some(detail),
                };
                self.dead_letter(&message, reason).await
            }
            Err(Failure::Transient(detail)) => {
                warn!(job_ref = %job.job.reference, error = %detail, "job failed, leaving for redelivery");
                Outcome::Retrying
            }
            Err(Failure::Permanent(detail)) => {
                self.dead_letter(&message, DeadLetterReason::PermanentFailure { detail })
                    .await
            }
        }
    }

    async fn execute(&self, job: &ValidatedJob) -> Result<AppendOutcome, Failure> {
        let raw = &job.job;
        let request = EvaluationRequest {
            ground_truth_uri: raw.ground_truth_uri.clone(),
            inference_uri: raw.inference_uri.clone(),
            evaluation_uri: raw.evaluation_uri.clone(),
        };

        let evaluation = tokio::time::timeout(self.config.pipeline_timeout, self.pipeline.evaluate(&request))
            .await
            .map_err(|_| {
                Failure::Transient(format!(
                    "pipeline timed out after {}s",
                    self.config.pipeline_timeout.as_secs_f64()
                ))
            })??;

        let mut result = EvalResult::for_job(job.set.clone(), raw.reference.clone(), evaluation.score)
            .with_metrics(evaluation.metrics);
        result.run_id = raw.run_id;
        result.inference_uri = Some(raw.inference_uri.clone());
        result.evaluation_uri = Some(raw.evaluation_uri.clone());
        result.is_baseline = raw.is_baseline;

        let appended = self
            .store
            .append_result(&job.project, &job.experiment, result)
            .await?;
        if raw.is_baseline {
            self.store.set_baseline(&job.project, &job.experiment).await?;
        }
        Ok(appended)
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: DeadLetterReason) -> Outcome {
        let label = reason.label();
        match self
            .dead_letters
            .dead_letter(DeadLetterRecord::new(reason, message))
            .await
        {
            Ok(()) => {
                if let Err(e) = self.queue.ack(message).await {
                    warn!(reason = label, error = %e, "dead-lettered message could not be acked");
                }
                warn!(reason = label, "message dead-lettered");
                Outcome::DeadLettered
            }
            Err(e) => {
                error!(reason = label, error = %e, "dead-letter write failed, message stays queued");
                Outcome::Abandoned
            }
        }
    }
}

async fn consumer_loop(
    consumer: Arc<QueueConsumer>,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<ConsumerStats>>,
) {
    let name = consumer.config.name.clone();
    info!(consumer = %name, concurrency = consumer.config.concurrency, "consumer started");
    let started = Instant::now();
    let permits = Arc::new(Semaphore::new(consumer.config.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!(consumer = %name, error = %e, "job task failed");
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let idle = match consumer.queue.dequeue().await {
            Ok(Some(message)) => {
                let consumer = consumer.clone();
                let stats = stats.clone();
                {
                    let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
                    s.messages_received += 1;
                    s.current_running += 1;
                }
                tasks.spawn(async move {
                    let outcome = consumer.process(message).await;
                    let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
                    s.current_running = s.current_running.saturating_sub(1);
                    s.record(outcome);
                    drop(permit);
                });
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!(consumer = %name, error = %e, "failed to dequeue");
                true
            }
        };

        stats.lock().unwrap_or_else(PoisonError::into_inner).uptime_secs = started.elapsed().as_secs();

        if idle {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(consumer.config.pause_when_empty) => {}
            }
        }
    }

    info!(consumer = %name, in_flight = tasks.len(), "consumer draining");
    let grace = tokio::time::sleep(consumer.config.shutdown_grace);
    tokio::pin!(grace);
    loop {
        tokio::select! {
            _ = &mut grace => {
                // Aborted messages are never acked, so the queue redelivers them.
                warn!(consumer = %name, abandoned = tasks.len(), "drain deadline reached, aborting in-flight jobs");
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                break;
            }
            joined = tasks.join_next() => match joined {
                Some(Err(e)) if !e.is_cancelled() => error!(consumer = %name, error = %e, "job task failed"),
                Some(_) => {}
                None => break,
            },
        }
    }
    info!(consumer = %name, "consumer stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::jobs::dead_letter::InMemoryDeadLetterStore;
    use crate::pipeline::Evaluation;
    use crate::queue::{InMemoryQueue, QueueError};
    use crate::store::InMemoryExperimentStore;
    use evalhub_catalog::{Experiment, NewExperiment};
    use evalhub_core::{ExperimentName, ProjectName};

    const VISIBILITY: Duration = Duration::from_secs(10);

    /// Replays scripted results, then succeeds with score 1.0.
    #[derive(Default)]
    struct ScriptedPipeline {
        script: Mutex<VecDeque<Result<Evaluation, PipelineError>>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedPipeline {
        fn with(script: Vec<Result<Evaluation, PipelineError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EvaluationPipeline for ScriptedPipeline {
        async fn evaluate(&self, _request: &EvaluationRequest) -> Result<Evaluation, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(Ok(Evaluation {
                score: Some(1.0),
                ..Default::default()
            }))
        }
    }

    struct BrokenDeadLetters;

    #[async_trait]
    impl DeadLetterSink for BrokenDeadLetters {
        async fn dead_letter(&self, _record: DeadLetterRecord) -> Result<(), QueueError> {
            Err(QueueError::Unavailable("dlq down".into()))
        }

        async fn list(&self, _limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
            Ok(vec![])
        }
    }

    struct DownStore;

    #[async_trait]
    impl ExperimentStore for DownStore {
        async fn list_experiments(&self, _: &ProjectName) -> Result<Vec<Experiment>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn add_experiment(&self, _: &ProjectName, _: NewExperiment) -> Result<Experiment, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn set_baseline(&self, _: &ProjectName, _: &ExperimentName) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn append_result(
            &self,
            _: &ProjectName,
            _: &ExperimentName,
            _: EvalResult,
        ) -> Result<AppendOutcome, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn get_baseline(&self, _: &ProjectName) -> Result<Option<Experiment>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn get_experiment(
            &self,
            _: &ProjectName,
            _: &ExperimentName,
        ) -> Result<Option<Experiment>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
    }

    struct Fixture {
        queue: Arc<InMemoryQueue>,
        dlq: Arc<InMemoryDeadLetterStore>,
        pipeline: Arc<ScriptedPipeline>,
        store: Arc<InMemoryExperimentStore>,
    }

    impl Fixture {
        fn new(pipeline: ScriptedPipeline) -> Self {
            Self {
                queue: Arc::new(InMemoryQueue::new(VISIBILITY)),
                dlq: Arc::new(InMemoryDeadLetterStore::new()),
                pipeline: Arc::new(pipeline),
                store: Arc::new(InMemoryExperimentStore::new()),
            }
        }

        fn consumer(&self, config: ConsumerConfig) -> QueueConsumer {
            QueueConsumer::new(
                self.queue.clone(),
                self.dlq.clone(),
                self.pipeline.clone(),
                self.store.clone(),
                config,
            )
        }

        async fn next(&self) -> QueueMessage {
            self.queue.dequeue().await.unwrap().expect("a visible message")
        }
    }

    fn body(reference: &str, is_baseline: bool) -> String {
        serde_json::to_string(&PipelineJob {
            ground_truth_uri: format!("gt/{reference}.json"),
            inference_uri: format!("inference/run/{reference}.json"),
            evaluation_uri: format!("evaluation/run/{reference}.json"),
            project: "search".into(),
            experiment: "bm25-tuned".into(),
            reference: reference.into(),
            set: "nightly".into(),
            is_baseline,
            run_id: None,
        })
        .unwrap()
    }

    fn config(max_deliveries: u32) -> ConsumerConfig {
        ConsumerConfig {
            max_deliveries,
            pause_when_empty: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn project() -> ProjectName {
        ProjectName::new("search").unwrap()
    }

    fn experiment() -> ExperimentName {
        ExperimentName::new("bm25-tuned").unwrap()
    }

    #[tokio::test]
    async fn success_records_result_sets_baseline_and_acks() {
        let fx = Fixture::new(ScriptedPipeline::default());
        fx.queue.enqueue(body("q-1", true)).await.unwrap();

        let outcome = fx.consumer(config(5)).process(fx.next().await).await;
        assert_eq!(outcome, Outcome::Completed(AppendOutcome::Appended));
        assert!(fx.queue.is_empty());

        let baseline = fx.store.get_baseline(&project()).await.unwrap().unwrap();
        assert_eq!(baseline.name, experiment());
        assert_eq!(baseline.results.len(), 1);
        assert_eq!(baseline.results[0].score, Some(1.0));
        assert_eq!(baseline.results[0].reference.as_deref(), Some("q-1"));
    }

    #[tokio::test]
    async fn malformed_message_is_dead_lettered_after_one_attempt() {
        let fx = Fixture::new(ScriptedPipeline::default());
        fx.queue.enqueue("{\"set\": 42".into()).await.unwrap();

        let outcome = fx.consumer(config(5)).process(fx.next().await).await;
        assert_eq!(outcome, Outcome::DeadLettered);
        assert_eq!(fx.pipeline.calls(), 0);
        assert!(fx.queue.is_empty());

        let dead = fx.dlq.list(10).await.unwrap();
        assert_eq!(dead[0].body, "{\"set\": 42");
        assert!(matches!(dead[0].reason, DeadLetterReason::MalformedMessage { .. }));
    }

    #[tokio::test]
    async fn invalid_names_are_malformed() {
        let fx = Fixture::new(ScriptedPipeline::default());
        let bad = body("q-1", false).replace("bm25-tuned", "no");
        fx.queue.enqueue(bad).await.unwrap();

        let outcome = fx.consumer(config(5)).process(fx.next().await).await;
        assert_eq!(outcome, Outcome::DeadLettered);
        assert_eq!(fx.pipeline.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_attempted_max_deliveries_times() {
        let max = 3;
        let fx = Fixture::new(ScriptedPipeline::with(
            (0..max)
                .map(|_| Err(PipelineError::Transient("503".into())))
                .collect(),
        ));
        fx.queue.enqueue(body("q-1", false)).await.unwrap();
        let consumer = fx.consumer(config(max));

        for attempt in 1..max {
            let msg = fx.next().await;
            assert_eq!(msg.delivery_count, attempt);
            assert_eq!(consumer.process(msg).await, Outcome::Retrying);
            assert!(fx.queue.dequeue().await.unwrap().is_none());
            tokio::time::advance(VISIBILITY + Duration::from_secs(1)).await;
        }

        assert_eq!(consumer.process(fx.next().await).await, Outcome::DeadLettered);
        assert_eq!(fx.pipeline.calls(), max as usize);
        assert!(fx.queue.is_empty());

        let dead = fx.dlq.list(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(
            dead[0].reason,
            DeadLetterReason::DeliveriesExhausted {
                deliveries: max,
                last_error: Some("503".into()),
            }
        );
    }

    #[tokio::test]
    async fn permanent_failure_is_dead_lettered_immediately() {
        let fx = Fixture::new(ScriptedPipeline::with(vec![Err(PipelineError::Permanent(
            "404 ground truth missing".into(),
        ))]));
        fx.queue.enqueue(body("q-1", false)).await.unwrap();

        let outcome = fx.consumer(config(5)).process(fx.next().await).await;
        assert_eq!(outcome, Outcome::DeadLettered);
        assert_eq!(fx.pipeline.calls(), 1);
        assert!(fx.store.list_experiments(&project()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn over_delivered_message_skips_processing() {
        let fx = Fixture::new(ScriptedPipeline::default());
        let msg = QueueMessage {
            id: crate::queue::MessageId("m-9".into()),
            receipt: "9".into(),
            body: body("q-1", false),
            delivery_count: 6,
        };

        let outcome = fx.consumer(config(5)).process(msg).await;
        assert_eq!(outcome, Outcome::DeadLettered);
        assert_eq!(fx.pipeline.calls(), 0);
    }

    #[tokio::test]
    async fn dead_letter_write_failure_keeps_message_queued() {
        let fx = Fixture::new(ScriptedPipeline::default());
        fx.queue.enqueue("garbage".into()).await.unwrap();
        let consumer = QueueConsumer::new(
            fx.queue.clone(),
            Arc::new(BrokenDeadLetters),
            fx.pipeline.clone(),
            fx.store.clone(),
            config(5),
        );

        assert_eq!(consumer.process(fx.next().await).await, Outcome::Abandoned);
        assert_eq!(fx.queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_timeout_is_transient() {
        let fx = Fixture::new(ScriptedPipeline {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        fx.queue.enqueue(body("q-1", false)).await.unwrap();
        let consumer = fx.consumer(ConsumerConfig {
            pipeline_timeout: Duration::from_secs(1),
            ..config(5)
        });

        assert_eq!(consumer.process(fx.next().await).await, Outcome::Retrying);
        assert_eq!(fx.queue.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_is_transient() {
        let fx = Fixture::new(ScriptedPipeline::default());
        fx.queue.enqueue(body("q-1", false)).await.unwrap();
        let consumer = QueueConsumer::new(
            fx.queue.clone(),
            fx.dlq.clone(),
            fx.pipeline.clone(),
            Arc::new(DownStore),
            config(5),
        );

        assert_eq!(consumer.process(fx.next().await).await, Outcome::Retrying);
        assert_eq!(fx.queue.len(), 1);
        assert!(fx.dlq.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn redelivered_job_is_not_recorded_twice() {
        let fx = Fixture::new(ScriptedPipeline::default());
        fx.queue.enqueue(body("q-1", false)).await.unwrap();
        let consumer = fx.consumer(config(5));

        // First delivery is processed but its lease expires before the ack.
        let first = fx.next().await;
        tokio::time::advance(VISIBILITY + Duration::from_secs(1)).await;
        let second = fx.next().await;

        assert_eq!(consumer.process(first).await, Outcome::Completed(AppendOutcome::Appended));
        assert_eq!(consumer.process(second).await, Outcome::Completed(AppendOutcome::Duplicate));

        let e = fx.store.get_experiment(&project(), &experiment()).await.unwrap().unwrap();
        assert_eq!(e.results.len(), 1);
        assert!(fx.queue.is_empty());
    }

    #[tokio::test]
    async fn spawned_consumer_drains_queue_and_shuts_down() {
        let fx = Fixture::new(ScriptedPipeline::default());
        for i in 0..6 {
            fx.queue.enqueue(body(&format!("q-{i}"), false)).await.unwrap();
        }

        let handle = fx
            .consumer(ConsumerConfig {
                concurrency: 2,
                ..config(5)
            })
            .spawn();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !fx.queue.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = handle.stats();
        handle.shutdown().await;

        assert!(fx.queue.is_empty());
        assert_eq!(stats.messages_received, 6);
        let e = fx.store.get_experiment(&project(), &experiment()).await.unwrap().unwrap();
        assert_eq!(e.results.len(), 6);
    }
    #[tokio::test(start_paused = true)]
    async fn job_outliving_shutdown_grace_is_aborted_and_redelivered() {
        let fx = Fixture::new(ScriptedPipeline {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        fx.queue.enqueue(body("q-1", false)).await.unwrap();

        let handle = fx
            .consumer(ConsumerConfig {
                shutdown_grace: Duration::from_secs(1),
                ..config(5)
            })
            .spawn();

        while fx.pipeline.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let asked = Instant::now();
        handle.shutdown().await;

        assert!(asked.elapsed() < Duration::from_secs(60));
        assert_eq!(fx.queue.len(), 1);
        assert!(fx.store.list_experiments(&project()).await.unwrap().is_empty());
        assert!(fx.dlq.is_empty());

        tokio::time::advance(VISIBILITY + Duration::from_secs(1)).await;
        let again = fx.next().await;
        assert_eq!(again.delivery_count, 2);
        assert_eq!(again.body, body("q-1", false));
    }
}
