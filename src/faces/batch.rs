//! Bulk re-detection over many photos, one photo at a time.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use super::processor::FaceProcessor;
use crate::tasks::{TaskProgress, TaskUpdate};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub faces_found: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn describe(&self) -> String {
        format!(
            "{} photos processed ({} ok, {} failed), {} faces found{}",
            self.processed,
            self.succeeded,
            self.failed,
            self.faces_found,
            if self.cancelled { ", cancelled" } else { "" }
        )
    }
}

/// Re-run detection for each photo, reporting progress on `tx`.
///
/// The cancel flag is checked before each photo, so an in-flight photo always
/// finishes and its result stays committed. A failing photo is reported and
/// the batch moves on.
pub fn redetect_photos(
    processor: &FaceProcessor,
    photo_ids: &[i64],
    tx: &Sender<TaskUpdate>,
    cancel: &AtomicBool,
) -> BatchSummary {
    let total = photo_ids.len();
    let mut summary = BatchSummary::default();
    // The receiver may have gone away; the batch still runs to completion.
    let _ = tx.send(TaskUpdate::Started { total });

    for (idx, &photo_id) in photo_ids.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            summary.cancelled = true;
            break;
        }

        let progress = TaskProgress::new(idx + 1, total).with_item(photo_id);
        let progress = match processor.detect_faces_for_photo(photo_id) {
            Ok(outcome) => {
                summary.succeeded += 1;
                summary.faces_found += outcome.faces.len();
                let tagged = outcome.faces.iter().filter(|f| f.person.is_some()).count();
                progress.with_outcome(true, format!("{} faces, {} tagged", outcome.faces.len(), tagged))
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(photo_id, error = %e, "re-detection failed");
                progress.with_outcome(false, e.to_string())
            }
        };
        summary.processed += 1;
        let _ = tx.send(TaskUpdate::Progress(progress));
    }

    let message = summary.describe();
    tracing::info!(
        processed = summary.processed,
        failed = summary.failed,
        faces = summary.faces_found,
        cancelled = summary.cancelled,
        "batch re-detection finished"
    );
    let _ = tx.send(if summary.cancelled {
        TaskUpdate::Cancelled { summary: message }
    } else {
        TaskUpdate::Completed { summary: message }
    });

    summary
}
