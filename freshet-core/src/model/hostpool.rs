//! Hostpools and their per-channel replicas.

use std::collections::HashMap;

use freshet_types::app::{HostpoolDescription, HostpoolMembership};
use freshet_types::ids::{ChannelIndex, HostpoolIndex, RegionIndex};

#[derive(Debug, Clone)]
pub struct Hostpool {
    pub index: HostpoolIndex,
    pub name: String,
    pub size: Option<u64>,
    pub membership: HostpoolMembership,
    pub hosts: Vec<String>,
    pub tags: Vec<String>,
    /// Derivative pools created for parallel channels, keyed by
    /// `(region, channel)`.
    pub replica_map: HashMap<(RegionIndex, ChannelIndex), HostpoolIndex>,
}

impl Hostpool {
    pub fn from_description(desc: &HostpoolDescription) -> Self {
        Self {
            index: desc.index,
            name: desc.name.clone(),
            size: desc.size,
            membership: desc.membership,
            hosts: desc.hosts.clone(),
            tags: desc.tags.clone(),
            replica_map: HashMap::new(),
        }
    }

    /// Builds the derivative pool for one parallel channel. The caller owns
    /// index allocation and insertion into the model.
    pub fn make_replica(
        &self,
        index: HostpoolIndex,
        region_index: RegionIndex,
        channel_index: ChannelIndex,
        tags: Vec<String>,
    ) -> Hostpool {
        Hostpool {
            index,
            name: format!("{}[{}][{}]", self.name, region_index, channel_index),
            size: self.size,
            membership: self.membership,
            hosts: self.hosts.clone(),
            tags,
            replica_map: HashMap::new(),
        }
    }
}
