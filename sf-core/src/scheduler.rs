//! Placement scheduler - selects a node for a new instance under
//! multi-dimensional resource and affinity constraints (§4.1).
//!
//! The scheduler is stateless modulo reads from the coordination store: it
//! is constructed once per worker and takes its candidate pool as plain
//! arguments, so nothing here talks to the store directly.

use crate::error::Error;
use crate::model::Node;

/// A node plus the interfaces its current residents hold, the only extra
/// fact the scheduler needs beyond raw capacity.
#[derive(Debug, Clone)]
pub struct NodeCandidate {
    pub node: Node,
    /// Networks that already have at least one instance on this node.
    pub resident_networks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlacementRequest<'a> {
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub requested_networks: &'a [String],
}

pub struct Scheduler {
    overcommit_cpu_ratio: f64,
    overcommit_ram_ratio: f64,
}

impl Scheduler {
    pub fn new(overcommit_cpu_ratio: f64, overcommit_ram_ratio: f64) -> Self {
        Self {
            overcommit_cpu_ratio,
            overcommit_ram_ratio,
        }
    }

    /// Rank candidate nodes. Returns an ordered list of node names, most
    /// preferred first; empty when nothing qualifies. If `restrict_to` is
    /// supplied, the result is intersected with it (preserving its order);
    /// `CandidateNodeNotFound` if the intersection is empty and the caller
    /// did restrict.
    pub fn place(
        &self,
        candidates: &[NodeCandidate],
        req: &PlacementRequest,
        restrict_to: Option<&[String]>,
    ) -> Result<Vec<String>, Error> {
        let mut survivors: Vec<(&NodeCandidate, i64)> = candidates
            .iter()
            .filter(|c| self.has_capacity(c, req))
            .map(|c| {
                let score = req
                    .requested_networks
                    .iter()
                    .filter(|n| c.resident_networks.iter().any(|r| r == *n))
                    .count() as i64;
                (c, score)
            })
            .collect();

        survivors.sort_by(|(a, a_score), (b, b_score)| {
            b_score
                .cmp(a_score)
                .then(b.node.free_ram_mb.cmp(&a.node.free_ram_mb))
                .then(a.node.name.cmp(&b.node.name))
        });

        let ranked: Vec<String> = survivors.into_iter().map(|(c, _)| c.node.name.clone()).collect();

        match restrict_to {
            None => Ok(ranked),
            Some(restrict) => {
                let restricted: Vec<String> = restrict
                    .iter()
                    .filter(|n| ranked.contains(n))
                    .cloned()
                    .collect();
                if restricted.is_empty() {
                    Err(Error::CandidateNodeNotFound)
                } else {
                    Ok(restricted)
                }
            }
        }
    }

    fn has_capacity(&self, c: &NodeCandidate, req: &PlacementRequest) -> bool {
        let cpu_needed = (req.vcpus as f64) * self.overcommit_cpu_ratio;
        let ram_needed = (req.memory_mb as f64) * self.overcommit_ram_ratio;
        (c.node.free_cpu as f64) >= cpu_needed
            && (c.node.free_ram_mb as f64) >= ram_needed
            && c.node.free_disk_gb >= req.disk_gb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(name: &str, free_cpu: u32, free_ram_mb: u64, free_disk_gb: u64) -> NodeCandidate {
        NodeCandidate {
            node: Node {
                name: name.to_string(),
                ip: format!("10.0.0.{}", name.len()),
                fqdn: format!("{name}.local"),
                lastseen: Utc::now(),
                free_cpu,
                free_ram_mb,
                free_disk_gb,
            },
            resident_networks: Vec::new(),
        }
    }

    fn req(vcpus: u32, memory_mb: u64, disk_gb: u64) -> PlacementRequest<'static> {
        PlacementRequest {
            vcpus,
            memory_mb,
            disk_gb,
            requested_networks: &[],
        }
    }

    #[test]
    fn rejects_when_no_node_has_capacity() {
        let scheduler = Scheduler::new(16.0, 1.5);
        let nodes = vec![node("a", 4, 1000, 100), node("b", 4, 1000, 100)];
        let result = scheduler.place(&nodes, &req(1, 2000, 10), None).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn prefers_more_free_ram_on_tie() {
        let scheduler = Scheduler::new(16.0, 1.5);
        let nodes = vec![node("a", 64, 4000, 100), node("b", 64, 8000, 100)];
        let result = scheduler.place(&nodes, &req(1, 512, 10), None).unwrap();
        assert_eq!(result, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn breaks_ties_by_name() {
        let scheduler = Scheduler::new(16.0, 1.5);
        let nodes = vec![node("b", 64, 8000, 100), node("a", 64, 8000, 100)];
        let result = scheduler.place(&nodes, &req(1, 512, 10), None).unwrap();
        assert_eq!(result, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn network_affinity_bumps_score() {
        let scheduler = Scheduler::new(16.0, 1.5);
        let mut a = node("a", 64, 8000, 100);
        let mut b = node("b", 64, 8000, 100);
        b.resident_networks.push("net-1".to_string());
        a.resident_networks.push("net-2".to_string());
        let nodes = vec![a, b];
        let request = PlacementRequest {
            vcpus: 1,
            memory_mb: 512,
            disk_gb: 10,
            requested_networks: &["net-1".to_string()],
        };
        let result = scheduler.place(&nodes, &request, None).unwrap();
        assert_eq!(result[0], "b");
    }

    #[test]
    fn candidate_restriction_is_intersection_preserving_order() {
        let scheduler = Scheduler::new(16.0, 1.5);
        let nodes = vec![node("a", 64, 8000, 100), node("b", 64, 4000, 100)];
        let full = scheduler.place(&nodes, &req(1, 512, 10), None).unwrap();
        let restricted = scheduler
            .place(&nodes, &req(1, 512, 10), Some(&["b".to_string()]))
            .unwrap();
        assert_eq!(restricted, vec!["b".to_string()]);
        assert!(full.contains(&"b".to_string()));
    }

    #[test]
    fn restriction_to_unqualified_node_is_candidate_not_found() {
        let scheduler = Scheduler::new(16.0, 1.5);
        let nodes = vec![node("a", 1, 100, 1)];
        let result = scheduler.place(&nodes, &req(1, 2000, 10), Some(&["a".to_string()]));
        assert!(matches!(result, Err(Error::CandidateNodeNotFound)));
    }
}
