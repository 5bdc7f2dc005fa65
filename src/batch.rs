//! Division-sequential, batch-parallel orchestration of the compositing
//! pipeline. All per-item failures are absorbed here; the caller always gets
//! full accounting or a single up-front rejection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::compositor;
use crate::model::{
    BatchResult, DivisionImages, NamedImage, ParticipantRecord, ProcessingOutcome, Progress,
};
use crate::payload::QrPayload;
use crate::settings::TemplateSettings;
use crate::util;

pub const MAX_DIVISIONS: usize = 10;
pub const MAX_PARTICIPANTS: usize = 1_500;
pub const BATCH_SIZE: usize = 15;
/// Concurrent compose calls within one batch. Kept small on purpose: the work
/// is CPU and memory bound, high fan-out only raises the peak footprint.
pub const BATCH_CONCURRENCY: usize = 3;
pub const ITEM_TIMEOUT: Duration = Duration::from_secs(45);
/// Breather between batches so large intermediate buffers can be reclaimed.
pub const INTER_BATCH_PAUSE: Duration = Duration::from_millis(50);
pub const MAX_TEMPLATE_BYTES: usize = 15 * 1024 * 1024;
pub const MAX_FILENAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("batch cancelled before completion")]
    Cancelled,
}

/// Cooperative cancellation flag, observed at batch boundaries. In-flight
/// items finish or time out; no new batch starts once this is set.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Run the whole pipeline for one request. Fail-fast validation happens
/// before any image work; afterwards no per-item failure escapes this
/// function.
pub async fn run(
    participants: &[ParticipantRecord],
    template_bytes: &[u8],
    settings: &TemplateSettings,
    divisions: &[String],
    progress: Option<mpsc::UnboundedSender<Progress>>,
    cancel: Option<CancelFlag>,
) -> Result<BatchResult, BatchError> {
    let _span = crate::perf_scope!("batch-run");

    validate_request(participants, template_bytes, settings, divisions)?;
    let template = Arc::new(
        compositor::validate_template(template_bytes)
            .map_err(|e| BatchError::Validation(e.to_string()))?,
    );
    let settings = Arc::new(settings.clone());
    let cancel = cancel.unwrap_or_default();

    let total: usize = divisions
        .iter()
        .map(|d| participants.iter().filter(|p| &p.division == d).count())
        .sum();

    let mut result = BatchResult::default();
    let semaphore = Arc::new(Semaphore::new(BATCH_CONCURRENCY));

    for division in divisions {
        let members: Vec<&ParticipantRecord> =
            participants.iter().filter(|p| &p.division == division).collect();
        let mut images = Vec::with_capacity(members.len());
        let mut used_names: HashSet<String> = HashSet::new();

        for chunk in members.chunks(BATCH_SIZE) {
            if cancel.is_cancelled() {
                info!(%division, "cancellation observed; stopping before next batch");
                return Err(BatchError::Cancelled);
            }

            // Filenames are reserved sequentially before spawning so the
            // uniqueness set is never touched concurrently.
            let mut tasks: JoinSet<ProcessingOutcome> = JoinSet::new();
            for p in chunk {
                let filename = match assign_filename(p, &mut used_names) {
                    Ok(name) => name,
                    Err(reason) => {
                        record_failure(&mut result, &p.id, reason);
                        continue;
                    }
                };
                let p = (*p).clone();
                let template = Arc::clone(&template);
                let settings = Arc::clone(&settings);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    // Never fails: the semaphore is never closed.
                    let _permit = semaphore.acquire_owned().await.ok();
                    process_one(template, &p, settings, filename).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(ProcessingOutcome::Success { filename, image_bytes }) => {
                        result.success_count += 1;
                        result.processed_count += 1;
                        images.push(NamedImage { filename, bytes: image_bytes, fallback: false });
                    }
                    Ok(ProcessingOutcome::Fallback { filename, image_bytes }) => {
                        result.fallback_count += 1;
                        result.processed_count += 1;
                        images.push(NamedImage { filename, bytes: image_bytes, fallback: true });
                    }
                    Ok(ProcessingOutcome::Failed { participant_id, reason }) => {
                        record_failure(&mut result, &participant_id, reason);
                    }
                    Err(e) => {
                        // A panicked task still has to be accounted for, but
                        // we no longer know which participant it carried;
                        // surface it as a batch-level error entry.
                        result.error_count += 1;
                        result.errors.push(format!("worker task failed: {e}"));
                    }
                }
            }

            if let Some(tx) = &progress {
                // Fire-and-forget: a gone consumer never stalls the batch.
                let _ = tx.send(Progress {
                    processed: result.processed_count + result.error_count,
                    total,
                    stage: "compositing".to_string(),
                    division: division.clone(),
                });
            }

            tokio::time::sleep(INTER_BATCH_PAUSE).await;
        }

        info!(%division, images = images.len(), "division complete");
        result.images_by_division.push(DivisionImages { division: division.clone(), images });
    }

    info!(
        processed = result.processed_count,
        fallback = result.fallback_count,
        failed = result.error_count,
        "batch complete"
    );
    Ok(result)
}

async fn process_one(
    template: Arc<image::RgbaImage>,
    p: &ParticipantRecord,
    settings: Arc<TemplateSettings>,
    filename: String,
) -> ProcessingOutcome {
    match compositor::compose_with_retry(template, p, settings, ITEM_TIMEOUT).await {
        Ok(image_bytes) => ProcessingOutcome::Success { filename, image_bytes },
        Err(compose_err) => {
            warn!(participant_id = %p.id, error = %compose_err, "compose failed; trying plain-QR fallback");
            let payload = QrPayload::for_participant(p);
            match compositor::fallback_png(&payload) {
                Ok(image_bytes) => ProcessingOutcome::Fallback { filename, image_bytes },
                Err(fallback_err) => ProcessingOutcome::Failed {
                    participant_id: p.id.clone(),
                    reason: format!(
                        "compose failed ({compose_err}); fallback also failed ({fallback_err})"
                    ),
                },
            }
        }
    }
}

fn record_failure(result: &mut BatchResult, participant_id: &str, reason: String) {
    warn!(participant_id, %reason, "participant skipped");
    result.error_count += 1;
    result.errors.push(format!("participant {participant_id}: {reason}"));
    result.skipped_participant_ids.push(participant_id.to_string());
}

/// `{registration_number}_{sanitized_name}_{last6}_template.png`, unique
/// within the division. The unique-id suffix makes collisions rare; a numeric
/// disambiguator covers the rest, bounded so a pathological input cannot loop
/// forever.
fn assign_filename(
    p: &ParticipantRecord,
    used: &mut HashSet<String>,
) -> Result<String, String> {
    let tail: String = {
        let chars: Vec<char> = p.id.chars().collect();
        chars[chars.len().saturating_sub(6)..].iter().collect()
    };
    let base = format!(
        "{}_{}_{}",
        util::sanitize_for_filename(&p.registration_number),
        util::sanitize_for_filename(&p.name),
        tail
    );

    let candidate = format!("{base}_template.png");
    if used.insert(candidate.clone()) {
        return Ok(candidate);
    }
    for n in 2..=MAX_FILENAME_ATTEMPTS {
        let candidate = format!("{base}_template_{n}.png");
        if used.insert(candidate.clone()) {
            return Ok(candidate);
        }
    }
    Err(format!(
        "filename generation failed after {MAX_FILENAME_ATTEMPTS} attempts for {base}"
    ))
}

fn validate_request(
    participants: &[ParticipantRecord],
    template_bytes: &[u8],
    settings: &TemplateSettings,
    divisions: &[String],
) -> Result<(), BatchError> {
    let mut errors = Vec::new();

    if divisions.is_empty() {
        errors.push("at least one division must be selected".to_string());
    }
    if divisions.len() > MAX_DIVISIONS {
        errors.push(format!(
            "at most {MAX_DIVISIONS} divisions per request, got {}",
            divisions.len()
        ));
    }
    if participants.is_empty() {
        errors.push("participant set is empty".to_string());
    }
    if participants.len() > MAX_PARTICIPANTS {
        errors.push(format!(
            "at most {MAX_PARTICIPANTS} participants per request, got {}",
            participants.len()
        ));
    }
    if template_bytes.len() > MAX_TEMPLATE_BYTES {
        errors.push(format!(
            "template exceeds {} MB",
            MAX_TEMPLATE_BYTES / (1024 * 1024)
        ));
    }
    if let Err(e) = settings.validate() {
        errors.push(e.to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(BatchError::Validation(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::test_settings;
    use image::Rgba;

    fn template_png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(200, 200, Rgba([230, 230, 230, 255]));
        util::png_encode_rgba8(&img).unwrap()
    }

    fn make_participants(n: usize, division: &str) -> Vec<ParticipantRecord> {
        (0..n)
            .map(|i| ParticipantRecord {
                id: format!("id-{division}-{i:06}"),
                name: format!("Member {i}"),
                registration_number: format!("R{i:04}"),
                division: division.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn every_participant_is_accounted_for() {
        let mut participants = make_participants(20, "Media");
        // One participant whose name sanitizes to nothing: degrades to
        // fallback when the text overlay is enabled.
        participants[7].name = "\u{0001}\u{0002}\u{0003}".to_string();

        let mut settings = test_settings();
        settings.text_overlay.enabled = true;

        let result = run(&participants, &template_png(), &settings, &["Media".to_string()], None, None)
            .await
            .unwrap();

        assert_eq!(result.processed_count + result.error_count, 20);
        assert_eq!(result.processed_count, 20);
        assert_eq!(result.fallback_count, 1);
        assert_eq!(result.success_count, 19);
        assert!(result.skipped_participant_ids.is_empty());
    }

    #[tokio::test]
    async fn filenames_are_unique_within_a_division() {
        // Same registration, name and id tail: only the disambiguator can
        // keep these apart.
        let mut participants = make_participants(3, "Ops");
        for p in &mut participants {
            p.id = "same-tail-abcdef".to_string();
            p.name = "Dup Name".to_string();
            p.registration_number = "R1".to_string();
        }

        let result = run(&participants, &template_png(), &test_settings(), &["Ops".to_string()], None, None)
            .await
            .unwrap();

        let images = &result.division("Ops").unwrap().images;
        assert_eq!(images.len(), 3);
        let names: HashSet<_> = images.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().any(|n| n.ends_with("_template.png")));
        assert!(names.iter().any(|n| n.ends_with("_template_2.png")));
    }

    #[tokio::test]
    async fn divisions_are_processed_in_filter_order_and_empty_ones_kept() {
        let participants = make_participants(2, "Beta");
        let divisions = vec!["Alpha".to_string(), "Beta".to_string()];

        let result = run(&participants, &template_png(), &test_settings(), &divisions, None, None)
            .await
            .unwrap();

        let order: Vec<_> = result.images_by_division.iter().map(|d| d.division.as_str()).collect();
        assert_eq!(order, ["Alpha", "Beta"]);
        assert!(result.division("Alpha").unwrap().images.is_empty());
        assert_eq!(result.division("Beta").unwrap().images.len(), 2);
    }

    #[tokio::test]
    async fn progress_is_reported_per_batch() {
        let participants = make_participants(17, "Media");
        let (tx, mut rx) = mpsc::unbounded_channel();

        run(
            &participants,
            &template_png(),
            &test_settings(),
            &["Media".to_string()],
            Some(tx),
            None,
        )
        .await
        .unwrap();

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        // 17 participants → two batches → at least two reports.
        assert!(events.len() >= 2);
        let last = events.last().unwrap();
        assert_eq!(last.processed, 17);
        assert_eq!(last.total, 17);
        assert_eq!(last.division, "Media");
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_batch() {
        let participants = make_participants(5, "Media");
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = run(
            &participants,
            &template_png(),
            &test_settings(),
            &["Media".to_string()],
            None,
            Some(cancel),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BatchError::Cancelled));
    }

    #[tokio::test]
    async fn invalid_requests_fail_fast_with_aggregate_messages() {
        let participants = make_participants(1, "Media");

        let too_many: Vec<String> = (0..11).map(|i| format!("D{i}")).collect();
        let err = run(&participants, &template_png(), &test_settings(), &too_many, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Validation(_)));

        let err = run(&[], &template_png(), &test_settings(), &["Media".to_string()], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Validation(_)));

        let mut bad = test_settings();
        bad.qr_position.scale = 3.0;
        let err = run(&participants, &template_png(), &bad, &["Media".to_string()], None, None)
            .await
            .unwrap_err();
        let BatchError::Validation(msg) = err else { panic!("expected validation error") };
        assert!(msg.contains("scale"));

        let err = run(&participants, b"not an image", &test_settings(), &["Media".to_string()], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Validation(_)));
    }
}
