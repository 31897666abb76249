//! Command task: applies external threshold updates. Updates arriving in
//! a short window coalesce into one batch; each valid value commits to
//! persistent storage before exactly one ACK publish is queued for the
//! batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::channels::send_or_drop;
use crate::models::{CloudPublishRequest, Command, CommandKind, ThresholdId};
use crate::thresholds::ThresholdStore;
use crate::timesync::TimeSync;

/// Updates received this close together are applied and acknowledged as
/// one batch.
const COALESCE_WINDOW: Duration = Duration::from_millis(50);

// Accepted value ranges, matching the store's clamp ranges. Out-of-range
// values are rejected outright rather than clamped.
const TEMP_RANGE: std::ops::RangeInclusive<f32> = -50.0..=100.0;
const MOIST_RANGE: std::ops::RangeInclusive<f32> = 0.0..=100.0;

pub struct CommandDeps {
    pub cmd_external_rx: mpsc::Receiver<Command>,
    pub ack_tx: mpsc::Sender<CloudPublishRequest>,
    pub thresholds: Arc<ThresholdStore>,
    pub timesync: TimeSync,
    /// Topic the rendered ACK publishes to.
    pub ack_topic: String,
}

/// Range check for a proposed threshold value.
pub(crate) fn validate(id: ThresholdId, value: f32) -> bool {
    if id.is_temperature() {
        TEMP_RANGE.contains(&value)
    } else {
        MOIST_RANGE.contains(&value)
    }
}

/// Fold a command into the batch; a later update to the same threshold
/// replaces the earlier value.
fn absorb(batch: &mut Vec<(ThresholdId, f32)>, command: &Command) {
    let CommandKind::UpdateThreshold { id } = command.kind else {
        warn!("non-threshold command on the external queue — dropped");
        return;
    };
    match batch.iter_mut().find(|(existing, _)| *existing == id) {
        Some(entry) => entry.1 = command.value,
        None => batch.push((id, command.value)),
    }
}

/// Validate and commit a batch. Returns the successfully persisted
/// `(threshold, stored value)` pairs; rejected or failed writes are
/// logged and excluded.
pub(crate) async fn apply_batch(
    store: &ThresholdStore,
    batch: &[(ThresholdId, f32)],
) -> Vec<(ThresholdId, f32)> {
    let mut changes = Vec::new();
    for &(id, value) in batch {
        if !validate(id, value) {
            warn!(threshold = id.name(), value, "threshold value out of range — rejected");
            continue;
        }
        match store.set(id, value).await {
            Ok(stored) => changes.push((id, stored)),
            Err(e) => error!(threshold = id.name(), "threshold persist failed: {e:#}"),
        }
    }
    changes
}

/// Render the single ACK payload for a committed batch:
/// `{"changes":{<name>:<num>,...},"ts":"<ts14>","status":"ok"}`.
pub(crate) fn render_ack(changes: &[(ThresholdId, f32)], ts14: &str) -> String {
    let mut object = serde_json::Map::new();
    for &(id, value) in changes {
        object.insert(id.name().to_string(), serde_json::json!(value));
    }
    serde_json::json!({
        "changes": object,
        "ts": ts14,
        "status": "ok",
    })
    .to_string()
}

pub async fn run(mut deps: CommandDeps) {
    info!("command task started");

    while let Some(first) = deps.cmd_external_rx.recv().await {
        // Open the coalescing window on the first command and keep
        // folding until it closes.
        tracing::debug!(ts_ms = first.ts_ms, "coalescing window opened");
        let deadline = Instant::now() + COALESCE_WINDOW;
        let mut batch = Vec::new();
        absorb(&mut batch, &first);
        while let Ok(Some(command)) =
            tokio::time::timeout_at(deadline, deps.cmd_external_rx.recv()).await
        {
            absorb(&mut batch, &command);
        }

        let changes = apply_batch(&deps.thresholds, &batch).await;
        if changes.is_empty() {
            continue; // nothing committed — no ACK
        }
        info!(count = changes.len(), "threshold batch committed");

        let payload = render_ack(&changes, &deps.timesync.ts14());
        match CloudPublishRequest::new(deps.ack_topic.clone(), payload) {
            Ok(request) => send_or_drop(&deps.ack_tx, request, "q_ack"),
            Err(e) => error!("ack render failed: {e:#}"),
        }
    }
    warn!("command queue closed");
}

// ===========================================================================
// Tests
// ===========================================================================
