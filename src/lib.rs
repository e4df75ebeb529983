//! Find AMIs owned by one account that no EC2 instance references,
//! deregister them, and delete their backing snapshots. Images and
//! snapshots tagged `archive=true` are left alone.

pub mod ec2;
pub mod images;
pub mod reclaim;
