use std::sync::Arc;

use chrono::Utc;
use image_hasher::ImageHash;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    error::FocusError,
    metrics::{MetricsCollector, TickMetrics, TickOutcome},
    models::{ActivityLabel, ActivityRecord, FaceBox, GazeDirection, GazeEstimate, Observation},
    settings::{AttentionThresholds, TrackingSettings},
    store::SessionStore,
    vision::{decode_frame, FrameError, FrameHasher, GazeEstimator},
};

use super::classify::{classify, direction};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Latest state of the inbound side of a stream. Only the newest frame is
/// kept; older unread frames are overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Waiting,
    Frame { seq: u64, text: String },
    Closed,
    Fault(String),
}

/// Writer half of the single-frame slot fed by the connection reader.
pub struct FrameSlot {
    tx: watch::Sender<Inbound>,
    seq: u64,
}

impl FrameSlot {
    pub fn channel() -> (Self, watch::Receiver<Inbound>) {
        let (tx, rx) = watch::channel(Inbound::Waiting);
        (Self { tx, seq: 0 }, rx)
    }

    pub fn push(&mut self, text: String) {
        self.seq += 1;
        self.tx.send_replace(Inbound::Frame {
            seq: self.seq,
            text,
        });
    }

    pub fn close(&self) {
        self.tx.send_replace(Inbound::Closed);
    }

    pub fn fail(&self, reason: String) {
        self.tx.send_replace(Inbound::Fault(reason));
    }
}

/// Outbound message, serialized as either the observation object or
/// `{"error": ...}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum TrackingMessage {
    Observation {
        gaze: Option<GazeEstimate>,
        face: Option<FaceBox>,
        activity: ActivityLabel,
        direction: Option<GazeDirection>,
    },
    Error {
        error: String,
    },
}

impl TrackingMessage {
    fn error(message: impl Into<String>) -> Self {
        TrackingMessage::Error {
            error: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The caller closed the connection; no close frame is owed.
    RemoteClosed,
    Fault(String),
    Cancelled,
}

/// Everything a stream needs besides its channels.
#[derive(Clone)]
pub struct StreamContext {
    pub session_id: String,
    pub store: SessionStore,
    pub estimator: Arc<GazeEstimator>,
    pub metrics: MetricsCollector,
    pub tracking: TrackingSettings,
    pub attention: AttentionThresholds,
}

struct LastEstimate {
    hash: ImageHash,
    observation: Observation,
    estimated_at: Instant,
}

#[derive(Default)]
struct StreamState {
    last_seq: Option<u64>,
    last_estimate: Option<LastEstimate>,
    last_measured: Option<Instant>,
}

impl StreamState {
    fn reuse_candidate(&self, cooldown: Duration) -> Option<(ImageHash, Observation)> {
        self.last_estimate
            .as_ref()
            .filter(|last| last.estimated_at.elapsed() < cooldown)
            .map(|last| (last.hash.clone(), last.observation))
    }

    /// Time to credit for the current measurement, capped so a long gap
    /// between frames is not counted as attention.
    fn credit_interval(&mut self, settings: &TrackingSettings) -> u64 {
        let cap = settings.tick_interval() + settings.frame_wait();
        let elapsed = self
            .last_measured
            .map(|at| at.elapsed())
            .unwrap_or_else(|| settings.tick_interval())
            .min(cap);
        self.last_measured = Some(Instant::now());
        elapsed.as_millis() as u64
    }
}

enum FrameWait {
    Fresh(String),
    Idle,
    Ended(StreamEnd),
}

pub async fn tracking_loop(
    ctx: StreamContext,
    mut inbound: watch::Receiver<Inbound>,
    outbound: mpsc::Sender<TrackingMessage>,
    cancel_token: CancellationToken,
) -> StreamEnd {
    let mut ticker = tokio::time::interval(ctx.tracking.tick_interval().max(MIN_TICK_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut state = StreamState::default();
    log_info!("tracking stream opened for session {}", ctx.session_id);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel_token.cancelled() => {
                log_info!("tracking stream for session {} cancelled", ctx.session_id);
                return StreamEnd::Cancelled;
            }
        }

        let tick_start = Instant::now();
        let wait = wait_for_frame(
            &mut inbound,
            &mut state.last_seq,
            ctx.tracking.frame_wait(),
            &cancel_token,
        )
        .await;

        let mut metrics = match wait {
            FrameWait::Fresh(text) => {
                tokio::select! {
                    result = run_tick(&ctx, &mut state, text, tick_start, &outbound) => match result {
                        Ok(metrics) => metrics,
                        Err(end) => return end,
                    },
                    _ = cancel_token.cancelled() => {
                        log_info!("tracking stream for session {} cancelled mid-tick", ctx.session_id);
                        return StreamEnd::Cancelled;
                    }
                }
            }
            FrameWait::Idle => {
                log_debug!("no fresh frame for session {}, idle tick", ctx.session_id);
                tick_metrics(&ctx.session_id, TickOutcome::Idle)
            }
            FrameWait::Ended(end) => {
                match &end {
                    StreamEnd::RemoteClosed => {
                        log_info!("client closed tracking stream for session {}", ctx.session_id)
                    }
                    StreamEnd::Fault(reason) => {
                        log_error!("tracking stream for session {} failed: {}", ctx.session_id, reason)
                    }
                    StreamEnd::Cancelled => {
                        log_info!("tracking stream for session {} cancelled", ctx.session_id)
                    }
                }
                return end;
            }
        };

        metrics.total_ms = tick_start.elapsed().as_millis() as u64;
        ctx.metrics.record_tick(metrics).await;
    }
}

async fn wait_for_frame(
    inbound: &mut watch::Receiver<Inbound>,
    last_seq: &mut Option<u64>,
    wait: Duration,
    cancel_token: &CancellationToken,
) -> FrameWait {
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    loop {
        let ready = match &*inbound.borrow_and_update() {
            Inbound::Frame { seq, text } if *last_seq != Some(*seq) => {
                *last_seq = Some(*seq);
                Some(FrameWait::Fresh(text.clone()))
            }
            Inbound::Closed => Some(FrameWait::Ended(StreamEnd::RemoteClosed)),
            Inbound::Fault(reason) => Some(FrameWait::Ended(StreamEnd::Fault(reason.clone()))),
            _ => None,
        };
        if let Some(ready) = ready {
            return ready;
        }

        tokio::select! {
            _ = cancel_token.cancelled() => return FrameWait::Ended(StreamEnd::Cancelled),
            _ = &mut deadline => return FrameWait::Idle,
            changed = inbound.changed() => {
                if changed.is_err() {
                    return FrameWait::Ended(StreamEnd::RemoteClosed);
                }
            }
        }
    }
}

struct Analysis {
    hash: ImageHash,
    observation: Observation,
    reused: bool,
    decode_ms: u64,
    estimate_ms: u64,
}

/// Decode, fingerprint and (unless the fingerprint matches `previous`)
/// estimate. Runs on the blocking pool.
fn analyze(
    text: &str,
    estimator: &GazeEstimator,
    previous: Option<(ImageHash, Observation)>,
    max_distance: u32,
) -> Result<Analysis, FrameError> {
    let decode_start = std::time::Instant::now();
    let frame = decode_frame(text)?;
    let hash = FrameHasher::new().fingerprint(&frame);
    let decode_ms = decode_start.elapsed().as_millis() as u64;

    if let Some((previous_hash, observation)) = previous {
        if previous_hash.dist(&hash) <= max_distance {
            return Ok(Analysis {
                hash,
                observation,
                reused: true,
                decode_ms,
                estimate_ms: 0,
            });
        }
    }

    let estimate_start = std::time::Instant::now();
    let observation = estimator.estimate(&frame);
    Ok(Analysis {
        hash,
        observation,
        reused: false,
        decode_ms,
        estimate_ms: estimate_start.elapsed().as_millis() as u64,
    })
}

async fn run_tick(
    ctx: &StreamContext,
    state: &mut StreamState,
    text: String,
    tick_start: Instant,
    outbound: &mpsc::Sender<TrackingMessage>,
) -> Result<TickMetrics, StreamEnd> {
    let mut metrics = tick_metrics(&ctx.session_id, TickOutcome::Estimated);

    let previous = state.reuse_candidate(ctx.tracking.reuse_cooldown());
    let estimator = Arc::clone(&ctx.estimator);
    let max_distance = ctx.tracking.reuse_hash_distance;
    let joined = tokio::task::spawn_blocking(move || {
        analyze(&text, &estimator, previous, max_distance)
    })
    .await;

    let analysis = match joined {
        Ok(Ok(analysis)) => analysis,
        Ok(Err(err)) => {
            log_debug!("rejected frame for session {}: {}", ctx.session_id, err);
            metrics.outcome = TickOutcome::FrameError;
            publish(outbound, TrackingMessage::error(err.to_string())).await?;
            return Ok(metrics);
        }
        Err(err) => {
            log_error!("gaze estimation worker failed for session {}: {err:?}", ctx.session_id);
            metrics.outcome = TickOutcome::EstimatorError;
            publish(outbound, TrackingMessage::error("gaze estimation failed")).await?;
            return Ok(metrics);
        }
    };

    metrics.decode_ms = analysis.decode_ms;
    metrics.estimate_ms = analysis.estimate_ms;
    let observation = analysis.observation;
    if analysis.reused {
        metrics.outcome = TickOutcome::Reused;
    } else {
        state.last_estimate = Some(LastEstimate {
            hash: analysis.hash,
            observation,
            estimated_at: Instant::now(),
        });
    }

    let activity = classify(&observation, &ctx.attention);
    let gaze_direction = observation
        .gaze
        .as_ref()
        .map(|gaze| direction(gaze, &ctx.attention));
    log_debug!(
        "session {} tick: {} in {}ms",
        ctx.session_id,
        activity.as_str(),
        tick_start.elapsed().as_millis()
    );

    publish(
        outbound,
        TrackingMessage::Observation {
            gaze: observation.gaze,
            face: observation.face,
            activity,
            direction: gaze_direction,
        },
    )
    .await?;

    let record = ActivityRecord {
        timestamp: Utc::now(),
        gaze: observation.gaze,
        face: observation.face,
        activity: Some(activity),
        direction: gaze_direction,
    };
    let elapsed_ms = state.credit_interval(&ctx.tracking);

    let store_start = Instant::now();
    if let Err(err) = persist(ctx, &record, activity, elapsed_ms).await {
        log_warn!("failed to persist activity for session {}: {}", ctx.session_id, err);
        metrics.store_failed = true;
        publish(
            outbound,
            TrackingMessage::error(format!("failed to persist activity: {err}")),
        )
        .await?;
    }
    metrics.store_ms = store_start.elapsed().as_millis() as u64;

    Ok(metrics)
}

/// Writes the snapshot and credits the session while it is still active.
async fn persist(
    ctx: &StreamContext,
    record: &ActivityRecord,
    activity: ActivityLabel,
    elapsed_ms: u64,
) -> Result<(), FocusError> {
    ctx.store
        .put_activity(&ctx.session_id, record, ctx.tracking.activity_ttl())
        .await?;

    let at = record.timestamp;
    let credited = ctx
        .store
        .update_session(&ctx.session_id, move |session| {
            if session.is_active() {
                session.credit(activity, elapsed_ms, at);
                true
            } else {
                false
            }
        })
        .await;

    match credited {
        Ok(true) => Ok(()),
        Ok(false) => {
            log_debug!("session {} is completed, counters left unchanged", ctx.session_id);
            Ok(())
        }
        Err(FocusError::NotFound(_)) => {
            log_debug!("no session record for {}, snapshot only", ctx.session_id);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn publish(
    outbound: &mpsc::Sender<TrackingMessage>,
    message: TrackingMessage,
) -> Result<(), StreamEnd> {
    outbound
        .send(message)
        .await
        .map_err(|_| StreamEnd::Fault("outbound channel closed".into()))
}

fn tick_metrics(session_id: &str, outcome: TickOutcome) -> TickMetrics {
    TickMetrics {
        timestamp: Utc::now(),
        session_id: session_id.to_string(),
        outcome,
        decode_ms: 0,
        estimate_ms: 0,
        store_ms: 0,
        store_failed: false,
        total_ms: 0,
    }
}
