//! Collecting the in-use and owned image sets, and resolving the unused
//! images between them.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{ensure, Result};

use crate::ec2::Ec2Api;

/// Tag key that opts an image or snapshot out of deletion.
pub const ARCHIVE_TAG: &str = "archive";

/// One owned AMI as returned by the provider: identity, tags, and the
/// snapshots its block devices are backed by.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub image_id: String,
    pub name: Option<String>,
    pub tags: HashMap<String, String>,
    pub snapshot_ids: Vec<String>,
}

/// True when the archive opt-out tag is set. The key must match exactly;
/// the value matches `true` in any ASCII case.
pub fn is_archived(tags: &HashMap<String, String>) -> bool {
    tags.get(ARCHIVE_TAG)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Image ids referenced by any instance, deduplicated. Instances in every
/// lifecycle state count: an image behind a stopped instance is in use.
pub async fn collect_instance_image_ids(api: &impl Ec2Api) -> Result<HashSet<String>> {
    let ids = api.instance_image_ids().await?;
    Ok(ids.into_iter().collect())
}

/// Images owned by `owner_id`, keyed by image id. The key order of the
/// returned map is what every later stage iterates in, so runs over the
/// same account state log identically.
pub async fn collect_owned_images(
    api: &impl Ec2Api,
    owner_id: &str,
) -> Result<BTreeMap<String, ImageRecord>> {
    ensure!(
        !owner_id.trim().is_empty(),
        "owner account id must not be empty"
    );

    let images = api.owned_images(owner_id).await?;
    Ok(images
        .into_iter()
        .map(|image| (image.image_id.clone(), image))
        .collect())
}

/// Owned minus in-use. Pure; output follows the owned map's key order.
pub fn resolve_unused(
    owned: &BTreeMap<String, ImageRecord>,
    in_use: &HashSet<String>,
) -> Vec<String> {
    owned
        .keys()
        .filter(|id| !in_use.contains(id.as_str()))
        .cloned()
        .collect()
}
