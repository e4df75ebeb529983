//! EC2 provider surface: the calls the sweep pipeline makes, and their
//! aws-sdk-ec2 implementation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::types::{Image, Tag};
use aws_sdk_ec2::Client as Ec2Client;
use aws_types::region::Region;

use crate::images::ImageRecord;

/// Provider operations the pipeline depends on. Collectors and the
/// reclaimer take this trait so tests can substitute a recording mock.
#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// Image ids referenced as the launch source of any instance, in any
    /// lifecycle state. May contain duplicates.
    async fn instance_image_ids(&self) -> Result<Vec<String>>;

    /// Every image owned by `owner_id`, with tags and backing snapshot ids.
    async fn owned_images(&self, owner_id: &str) -> Result<Vec<ImageRecord>>;

    /// Tags on a single snapshot. Empty map if the snapshot has none.
    async fn snapshot_tags(&self, snapshot_id: &str) -> Result<HashMap<String, String>>;

    async fn deregister_image(&self, image_id: &str) -> Result<()>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;
}

/// `Ec2Api` backed by the real AWS SDK client.
pub struct AwsEc2 {
    client: Ec2Client,
}

impl AwsEc2 {
    pub async fn new(region: Option<String>) -> Self {
        let region_provider =
            RegionProviderChain::first_try(region.map(Region::new)).or_default_provider();

        let config = aws_config::defaults(BehaviorVersion::v2024_03_28())
            .region(region_provider)
            .load()
            .await;

        Self {
            client: Ec2Client::new(&config),
        }
    }
}

fn tags_to_map(tags: &[Tag]) -> HashMap<String, String> {
    tags.iter()
        .filter_map(|t| {
            let k = t.key()?;
            let v = t.value()?;
            Some((k.to_string(), v.to_string()))
        })
        .collect()
}

fn image_to_record(image: &Image) -> Option<ImageRecord> {
    let image_id = image.image_id()?.to_string();

    let snapshot_ids = image
        .block_device_mappings()
        .iter()
        .filter_map(|bdm| bdm.ebs().and_then(|ebs| ebs.snapshot_id()))
        .map(|id| id.to_string())
        .collect();

    Some(ImageRecord {
        image_id,
        name: image.name().map(|n| n.to_string()),
        tags: tags_to_map(image.tags()),
        snapshot_ids,
    })
}

#[async_trait]
impl Ec2Api for AwsEc2 {
    async fn instance_image_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self.client.describe_instances();
            if let Some(t) = token.as_deref() {
                req = req.next_token(t);
            }
            let resp = req.send().await.context("failed to describe instances")?;

            for reservation in resp.reservations() {
                for instance in reservation.instances() {
                    if let Some(image_id) = instance.image_id() {
                        ids.push(image_id.to_string());
                    }
                }
            }

            token = resp.next_token().map(|s| s.to_string());
            if token.is_none() {
                break;
            }
        }
        Ok(ids)
    }

    async fn owned_images(&self, owner_id: &str) -> Result<Vec<ImageRecord>> {
        let mut images = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self.client.describe_images().owners(owner_id);
            if let Some(t) = token.as_deref() {
                req = req.next_token(t);
            }
            let resp = req
                .send()
                .await
                .with_context(|| format!("failed to describe images owned by {owner_id}"))?;

            images.extend(resp.images().iter().filter_map(image_to_record));

            token = resp.next_token().map(|s| s.to_string());
            if token.is_none() {
                break;
            }
        }
        Ok(images)
    }

    async fn snapshot_tags(&self, snapshot_id: &str) -> Result<HashMap<String, String>> {
        let resp = self
            .client
            .describe_snapshots()
            .snapshot_ids(snapshot_id)
            .send()
            .await
            .with_context(|| format!("failed to describe snapshot {snapshot_id}"))?;

        Ok(resp
            .snapshots()
            .first()
            .map(|snap| tags_to_map(snap.tags()))
            .unwrap_or_default())
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        self.client
            .deregister_image()
            .image_id(image_id)
            .send()
            .await
            .with_context(|| format!("failed to deregister {image_id}"))?;
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.client
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .with_context(|| format!("failed to delete {snapshot_id}"))?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use aws_sdk_ec2::types::{BlockDeviceMapping, EbsBlockDevice, Image, Tag};

    use super::*;

    #[test]
    fn tags_collect_into_map() {
        let tags = vec![
            Tag::builder().key("archive").value("true").build(),
            Tag::builder().key("team").value("infra").build(),
            // key without value is dropped
            Tag::builder().key("incomplete").build(),
        ];

        let map = tags_to_map(&tags);
        assert_eq!(map.get("archive").map(String::as_str), Some("true"));
        assert_eq!(map.get("team").map(String::as_str), Some("infra"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn image_record_pulls_snapshot_ids_from_block_devices() {
        let image = Image::builder()
            .image_id("ami-0011")
            .name("builder-2024-01")
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name("/dev/sda1")
                    .ebs(EbsBlockDevice::builder().snapshot_id("snap-root").build())
                    .build(),
            )
            .block_device_mappings(
                // ephemeral device, nothing to delete behind it
                BlockDeviceMapping::builder().device_name("/dev/sdb").build(),
            )
            .build();

        let record = image_to_record(&image).unwrap();
        assert_eq!(record.image_id, "ami-0011");
        assert_eq!(record.name.as_deref(), Some("builder-2024-01"));
        assert_eq!(record.snapshot_ids, vec!["snap-root".to_string()]);
    }

    #[test]
    fn image_without_id_is_dropped() {
        assert!(image_to_record(&Image::builder().build()).is_none());
    }
}
