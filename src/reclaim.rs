//! Deregistration of unused images and deletion of their snapshots.
//!
//! Each candidate runs through the same sequence: archive-tag gate, no-op
//! branch, deregister, then a tag gate and delete per backing snapshot.
//! Failures are recorded per item and never abort sibling work.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::ec2::Ec2Api;
use crate::images::{is_archived, ImageRecord};

/// What happened to one candidate image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ImageAction {
    Deregistered,
    WouldDeregister,
    SkippedArchived,
    Failed { error: String },
}

/// What happened to one backing snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum SnapshotAction {
    Deleted,
    WouldDelete,
    SkippedArchived,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotResult {
    pub snapshot_id: String,
    #[serde(flatten)]
    pub action: SnapshotAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageResult {
    pub image_id: String,
    #[serde(flatten)]
    pub action: ImageAction,
    pub snapshots: Vec<SnapshotResult>,
}

/// Outcome of one full reclaim pass, one entry per candidate.
#[derive(Debug, Default, Serialize)]
pub struct ReclaimReport {
    pub images: Vec<ImageResult>,
}

impl ReclaimReport {
    pub fn deregistered(&self) -> usize {
        self.count(|a| matches!(a, ImageAction::Deregistered))
    }

    pub fn skipped_archived(&self) -> usize {
        self.count(|a| matches!(a, ImageAction::SkippedArchived))
    }

    pub fn failed(&self) -> usize {
        self.count(|a| matches!(a, ImageAction::Failed { .. }))
    }

    pub fn snapshots_deleted(&self) -> usize {
        self.images
            .iter()
            .flat_map(|i| &i.snapshots)
            .filter(|s| matches!(s.action, SnapshotAction::Deleted))
            .count()
    }

    fn count(&self, pred: impl Fn(&ImageAction) -> bool) -> usize {
        self.images.iter().filter(|i| pred(&i.action)).count()
    }
}

/// Process every candidate independently. With `no_op` set, no write
/// operation is issued for any candidate.
pub async fn reclaim_images(
    api: &impl Ec2Api,
    owned: &BTreeMap<String, ImageRecord>,
    candidates: &[String],
    no_op: bool,
) -> ReclaimReport {
    let mut report = ReclaimReport::default();

    for image_id in candidates {
        let Some(image) = owned.get(image_id) else {
            continue;
        };
        report.images.push(reclaim_one(api, image, no_op).await);
    }

    report
}

async fn reclaim_one(api: &impl Ec2Api, image: &ImageRecord, no_op: bool) -> ImageResult {
    let image_id = &image.image_id;

    if is_archived(&image.tags) {
        info!(image_id = %image_id, "skipping image tagged archive=true");
        return ImageResult {
            image_id: image_id.clone(),
            action: ImageAction::SkippedArchived,
            snapshots: Vec::new(),
        };
    }

    if no_op {
        info!(image_id = %image_id, name = ?image.name, "[no-op] would deregister image");
        let snapshots = image
            .snapshot_ids
            .iter()
            .map(|snapshot_id| {
                info!(snapshot_id = %snapshot_id, "[no-op] would delete snapshot");
                SnapshotResult {
                    snapshot_id: snapshot_id.clone(),
                    action: SnapshotAction::WouldDelete,
                }
            })
            .collect();

        return ImageResult {
            image_id: image_id.clone(),
            action: ImageAction::WouldDeregister,
            snapshots,
        };
    }

    if let Err(e) = api.deregister_image(image_id).await {
        warn!(image_id = %image_id, error = ?e, "failed to deregister image");
        // snapshots of a still-registered image are left untouched
        return ImageResult {
            image_id: image_id.clone(),
            action: ImageAction::Failed {
                error: format!("{e:#}"),
            },
            snapshots: Vec::new(),
        };
    }
    info!(image_id = %image_id, name = ?image.name, "deregistered image");

    let mut snapshots = Vec::new();
    for snapshot_id in &image.snapshot_ids {
        snapshots.push(SnapshotResult {
            snapshot_id: snapshot_id.clone(),
            action: delete_snapshot(api, snapshot_id).await,
        });
    }

    ImageResult {
        image_id: image_id.clone(),
        action: ImageAction::Deregistered,
        snapshots,
    }
}

async fn delete_snapshot(api: &impl Ec2Api, snapshot_id: &str) -> SnapshotAction {
    let tags = match api.snapshot_tags(snapshot_id).await {
        Ok(tags) => tags,
        Err(e) => {
            // a snapshot whose protection tag cannot be read is not deleted
            warn!(snapshot_id = %snapshot_id, error = ?e, "failed to read snapshot tags");
            return SnapshotAction::Failed {
                error: format!("{e:#}"),
            };
        }
    };

    if is_archived(&tags) {
        info!(snapshot_id = %snapshot_id, "skipping snapshot tagged archive=true");
        return SnapshotAction::SkippedArchived;
    }

    match api.delete_snapshot(snapshot_id).await {
        Ok(()) => {
            info!(snapshot_id = %snapshot_id, "deleted snapshot");
            SnapshotAction::Deleted
        }
        Err(e) => {
            warn!(snapshot_id = %snapshot_id, error = ?e, "failed to delete snapshot");
            SnapshotAction::Failed {
                error: format!("{e:#}"),
            }
        }
    }
}
