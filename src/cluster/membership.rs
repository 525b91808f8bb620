use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::ShardKey;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub address: String,
}

impl Node {
    pub fn new(id: &str, address: &str) -> Self {
        Node { id: id.to_string(), address: address.to_string() }
    }
}

/// Which copies of a shard a request may be served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReplicaPreference {
    #[default]
    PrimaryOnly,
    PrimaryPreferred,
    ReplicaOnly,
    Any,
}

/// Owners of one shard: one primary, any number of replicas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAssignment {
    pub primary: String,
    #[serde(default)]
    pub replicas: Vec<String>,
}

impl ShardAssignment {
    pub fn new(primary: &str) -> Self {
        ShardAssignment { primary: primary.to_string(), replicas: Vec::new() }
    }

    pub fn with_replica(mut self, node_id: &str) -> Self {
        self.replicas.push(node_id.to_string());
        self
    }

    pub fn is_owner(&self, node_id: &str) -> bool {
        self.primary == node_id || self.replicas.iter().any(|r| r == node_id)
    }
}

/// Per-index role assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMapping {
    pub index_name: String,
    pub number_of_shards: u32,
    pub shards: HashMap<u32, ShardAssignment>,
}

impl IndexMapping {
    pub fn new(index_name: &str, number_of_shards: u32) -> Self {
        IndexMapping {
            index_name: index_name.to_string(),
            number_of_shards,
            shards: HashMap::new(),
        }
    }

    pub fn with_shard(mut self, shard_number: u32, assignment: ShardAssignment) -> Self {
        self.shards.insert(shard_number, assignment);
        self
    }

    /// Every shard's primary on one node, for single node clusters
    pub fn single_node(index_name: &str, number_of_shards: u32, node_id: &str) -> Self {
        (0..number_of_shards).fold(IndexMapping::new(index_name, number_of_shards), |mapping, shard| {
            mapping.with_shard(shard, ShardAssignment::new(node_id))
        })
    }

    /// Shards `node_id` holds a copy of, primary or replica
    pub fn shards_owned_by(&self, node_id: &str) -> Vec<u32> {
        let mut owned: Vec<u32> = self
            .shards
            .iter()
            .filter(|(_, assignment)| assignment.is_owner(node_id))
            .map(|(shard, _)| *shard)
            .collect();
        owned.sort_unstable();
        owned
    }
}

/// Cluster view used for a routing decision. Passed in per request, never
/// cached by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    pub this_node: Node,
    pub other_nodes: Vec<Node>,   // Currently reachable peers
    pub mappings: HashMap<String, IndexMapping>,
}

impl MembershipSnapshot {
    pub fn new(this_node: Node) -> Self {
        MembershipSnapshot {
            this_node,
            other_nodes: Vec::new(),
            mappings: HashMap::new(),
        }
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.other_nodes.push(node);
        self
    }

    pub fn with_mapping(mut self, mapping: IndexMapping) -> Self {
        self.mappings.insert(mapping.index_name.clone(), mapping);
        self
    }

    pub fn mapping(&self, index_name: &str) -> Result<&IndexMapping> {
        self.mappings
            .get(index_name)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("index <{}> does not exist", index_name)))
    }

    fn reachable(&self, node_id: &str) -> Option<&Node> {
        if self.this_node.id == node_id {
            return Some(&self.this_node);
        }
        self.other_nodes.iter().find(|n| n.id == node_id)
    }

    pub fn is_local(&self, node: &Node) -> bool {
        node.id == self.this_node.id
    }
}

/// Resolved (node, shard) pair for one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTarget {
    pub node: Node,
    pub shard: ShardKey,
    pub local: bool,
}

/// Ordered attempts for one shard. Preferred tier first; inside a tier this
/// node comes first, then the remaining owners in assignment order.
/// Unreachable owners are left out.
pub fn candidate_nodes(
    snapshot: &MembershipSnapshot,
    shard: &ShardKey,
    preference: ReplicaPreference,
) -> Result<Vec<RoutingTarget>> {
    let assignment = assignment_of(snapshot, shard)?;

    let primary = std::slice::from_ref(&assignment.primary);
    let replicas = assignment.replicas.as_slice();
    let tiers: Vec<&[String]> = match preference {
        ReplicaPreference::PrimaryOnly => vec![primary],
        ReplicaPreference::PrimaryPreferred => vec![primary, replicas],
        ReplicaPreference::ReplicaOnly => vec![replicas],
        ReplicaPreference::Any => vec![],
    };

    let mut ordered: Vec<&str> = Vec::new();
    if preference == ReplicaPreference::Any {
        let all: Vec<&str> = primary.iter().chain(replicas).map(String::as_str).collect();
        push_tier(&mut ordered, &all, &snapshot.this_node.id);
    } else {
        for tier in tiers {
            let ids: Vec<&str> = tier.iter().map(String::as_str).collect();
            push_tier(&mut ordered, &ids, &snapshot.this_node.id);
        }
    }

    Ok(reachable_targets(snapshot, shard, ordered))
}

/// Reachable replicas of a shard, this node first. Writes acknowledged by
/// the primary are applied to these so replica reads stay current.
pub fn replica_targets(snapshot: &MembershipSnapshot, shard: &ShardKey) -> Result<Vec<RoutingTarget>> {
    let assignment = assignment_of(snapshot, shard)?;
    let replicas: Vec<&str> = assignment
        .replicas
        .iter()
        .map(String::as_str)
        .filter(|id| *id != assignment.primary)
        .collect();

    let mut ordered = Vec::new();
    push_tier(&mut ordered, &replicas, &snapshot.this_node.id);
    Ok(reachable_targets(snapshot, shard, ordered))
}

fn assignment_of<'a>(snapshot: &'a MembershipSnapshot, shard: &ShardKey) -> Result<&'a ShardAssignment> {
    snapshot
        .mapping(&shard.index_name)?
        .shards
        .get(&shard.shard_number)
        .ok_or_else(|| Error::shard_unavailable(&shard.index_name, shard.shard_number))
}

fn reachable_targets(snapshot: &MembershipSnapshot, shard: &ShardKey, ordered: Vec<&str>) -> Vec<RoutingTarget> {
    ordered
        .into_iter()
        .filter_map(|id| snapshot.reachable(id))
        .map(|node| RoutingTarget {
            node: node.clone(),
            shard: shard.clone(),
            local: snapshot.is_local(node),
        })
        .collect()
}

fn push_tier<'a>(ordered: &mut Vec<&'a str>, tier: &[&'a str], this_node: &str) {
    let local_first = tier
        .iter()
        .filter(|id| **id == this_node)
        .chain(tier.iter().filter(|id| **id != this_node));
    for id in local_first {
        if !ordered.contains(id) {
            ordered.push(id);
        }
    }
}
