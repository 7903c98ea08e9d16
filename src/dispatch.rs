//! Per-file pipeline and the worker pool that runs it.
//!
//! Each submission runs extract → score → arbitrate → persist on a rayon
//! worker and reports over a channel: a `Scored` event once the numeric
//! score exists, then exactly one terminal event (`Finished` or `Failed`).

use crate::analyzer::{self, ExtractError, FeatureStatus, FeatureVector};
use crate::arbiter::ArbitrationGate;
use crate::config::{AppConfig, AudioConfig, Weights};
use crate::db::models::NewVerdict;
use crate::db::{Database, DbError};
use crate::scoring::{self, ScoreResult};
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use thiserror::Error;

pub type SubmissionId = u64;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Features and score are ready; arbitration may still be pending.
#[derive(Debug, Clone)]
pub struct EarlyResult {
    pub submission: SubmissionId,
    pub path: PathBuf,
    pub features: Arc<FeatureVector>,
    pub score: ScoreResult,
}

/// Everything is done and the record is persisted.
#[derive(Debug, Clone)]
pub struct FinalResult {
    pub submission: SubmissionId,
    pub path: PathBuf,
    pub features: Arc<FeatureVector>,
    /// Same suspicion score as the early event, with `arbitration_text` filled
    /// when the score fell in the ambiguous zone.
    pub score: ScoreResult,
}

#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub submission: SubmissionId,
    pub path: PathBuf,
    pub cause: String,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Scored(EarlyResult),
    Finished(FinalResult),
    Failed(TaskFailure),
}

impl PipelineEvent {
    pub fn submission(&self) -> SubmissionId {
        match self {
            Self::Scored(e) => e.submission,
            Self::Finished(f) => f.submission,
            Self::Failed(f) => f.submission,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Scored(_))
    }
}

/// Immutable per-run state shared by every worker.
pub struct Pipeline {
    audio: AudioConfig,
    weights: Weights,
    snr_min_db: f64,
    gate: ArbitrationGate,
    store: Arc<Database>,
}

impl Pipeline {
    pub fn new(config: &AppConfig, gate: ArbitrationGate, store: Arc<Database>) -> Self {
        Self {
            audio: config.audio.clone(),
            weights: config.ml_engine.initial_weights,
            snr_min_db: config.audio.analysis_params.snr_min_db,
            gate,
            store,
        }
    }

    pub fn store(&self) -> &Arc<Database> {
        &self.store
    }

    /// Extract and score. An unreadable path is the only error; bad content
    /// comes back as a defective vector with score 1.0.
    pub fn analyze(&self, path: &Path) -> Result<(Arc<FeatureVector>, ScoreResult), ExtractError> {
        let features = analyzer::extract(path, &self.audio)?;
        let score = scoring::score(&features, &self.weights, self.snr_min_db);
        log::debug!(
            "{}: suspicion={:.3} quality={:.1}",
            features.filename,
            score.suspicion_score,
            score.quality_score
        );
        Ok((Arc::new(features), score))
    }

    /// Attach the arbitration verdict, if any. The numeric score is untouched.
    pub fn arbitrate(&self, features: &FeatureVector, mut score: ScoreResult) -> ScoreResult {
        score.arbitration_text = self.gate.maybe_arbitrate(&score, features);
        score
    }

    pub fn persist(&self, features: &FeatureVector, score: &ScoreResult) -> Result<(), DbError> {
        let verdict = match &features.status {
            FeatureStatus::Defective { reason } => Some(reason.clone()),
            FeatureStatus::Ok => score.arbitration_text.clone(),
        };
        self.store.upsert_result(&NewVerdict {
            hash: features.content_hash.to_hex(),
            filename: features.filename.clone(),
            score: score.suspicion_score,
            quality_score: (!score.defective).then_some(score.quality_score),
            status: features.status.as_str().to_string(),
            verdict,
        })
    }

    /// Run one submission to completion, reporting through `emit`.
    pub fn process(&self, submission: SubmissionId, path: &Path, emit: &dyn Fn(PipelineEvent)) {
        let fail = |cause: String| {
            emit(PipelineEvent::Failed(TaskFailure {
                submission,
                path: path.to_path_buf(),
                cause,
            }))
        };

        let (features, score) = match self.analyze(path) {
            Ok(v) => v,
            Err(e) => {
                log::error!("#{submission} {}: {e}", path.display());
                fail(e.to_string());
                return;
            }
        };

        emit(PipelineEvent::Scored(EarlyResult {
            submission,
            path: path.to_path_buf(),
            features: Arc::clone(&features),
            score: score.clone(),
        }));

        let score = self.arbitrate(&features, score);

        if let Err(e) = self.persist(&features, &score) {
            log::error!("#{submission} {}: store write failed: {e}", features.filename);
            fail(format!("store: {e}"));
            return;
        }

        emit(PipelineEvent::Finished(FinalResult {
            submission,
            path: path.to_path_buf(),
            features,
            score,
        }));
    }
}

/// Fixed-size worker pool fed by [`Dispatcher::submit`].
///
/// The queue in front of the pool is unbounded. Dropping the dispatcher lets
/// queued work finish; the event channel closes after the last task reports.
pub struct Dispatcher {
    pool: rayon::ThreadPool,
    pipeline: Arc<Pipeline>,
    events: Sender<PipelineEvent>,
    next_id: AtomicU64,
    in_flight: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(
        pipeline: Pipeline,
        max_threads: usize,
    ) -> Result<(Self, Receiver<PipelineEvent>), DispatchError> {
        let workers = max_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("triage-worker-{i}"))
            .build()?;
        let (tx, rx) = mpsc::channel();
        log::debug!("Dispatcher started with {workers} workers");

        Ok((
            Self {
                pool,
                pipeline: Arc::new(pipeline),
                events: tx,
                next_id: AtomicU64::new(1),
                in_flight: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        ))
    }

    /// Queue a file. Returns immediately; results arrive on the event channel.
    pub fn submit(&self, path: impl Into<PathBuf>) -> SubmissionId {
        let path = path.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pipeline = Arc::clone(&self.pipeline);
        let tx = self.events.clone();
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::SeqCst);
        log::info!("Submitted #{id}: {}", path.display());

        self.pool.spawn(move || {
            let terminal_sent = Cell::new(false);
            let emit = |event: PipelineEvent| {
                if event.is_terminal() {
                    terminal_sent.set(true);
                }
                // Receiver gone means nobody is listening; the work still counts.
                let _ = tx.send(event);
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.process(id, &path, &emit)));
            if let Err(payload) = outcome {
                let cause = format!("worker panicked: {}", panic_message(payload.as_ref()));
                log::error!("#{id} {}: {cause}", path.display());
                if !terminal_sent.get() {
                    emit(PipelineEvent::Failed(TaskFailure {
                        submission: id,
                        path: path.clone(),
                        cause,
                    }));
                }
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
        id
    }

    /// Submissions not yet finished (queued or running).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
