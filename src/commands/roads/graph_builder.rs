use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;

use super::models::{ConnectionEdge, Coordinate, StructurePoint};
use super::pending::PendingQueue;
use super::state_store::ConnectionStateStore;
use super::terrain::StructureLocator;

#[derive(Clone, Debug, PartialEq)]
pub enum Proposal {
    Created(ConnectionEdge),
    AlreadyConnected { from: Coordinate, to: Coordinate },
    TooFewStructures,
}

/// Greedy nearest-neighbour road graph: each proposal links the most
/// recently discovered structure to its closest other structure. Clusters
/// discovered far apart may stay disconnected.
pub struct ConnectionGraphBuilder {
    store: Arc<ConnectionStateStore>,
    queue: PendingQueue,
    locator: Option<Arc<dyn StructureLocator>>,
    target: String,
    radius: i32,
}

impl ConnectionGraphBuilder {
    pub fn new(store: Arc<ConnectionStateStore>, queue: PendingQueue) -> Self {
        Self { store, queue, locator: None, target: String::new(), radius: 0 }
    }

    pub fn with_locator(mut self, locator: Arc<dyn StructureLocator>, target: &str, radius: i32) -> Self {
        self.locator = Some(locator);
        self.target = target.to_string();
        self.radius = radius;
        self
    }

    /// Persists a structure found by an external locator. Returns false if
    /// one is already known at that position.
    pub fn register_structure(&self, point: StructurePoint) -> Result<bool> {
        let pos = point.pos;
        let added = self.store.add_structure(point)?;
        if added {
            info!("graph: discovered structure at {}", pos);
        }
        Ok(added)
    }

    /// Runs the configured locator around `near` and registers a new hit.
    pub fn discover_at(&self, near: Coordinate) -> Result<Option<StructurePoint>> {
        let Some(locator) = &self.locator else { return Ok(None) };
        let Some(pos) = locator.locate(&self.target, near, self.radius) else {
            debug!("graph: no '{}' within {} of {}", self.target, self.radius, near);
            return Ok(None);
        };
        let point = StructurePoint::new(pos, Some(self.target.clone()));
        if self.register_structure(point.clone())? { Ok(Some(point)) } else { Ok(None) }
    }

    pub fn propose_connection(&self, actor: Option<Coordinate>, allow_locate_at_actor: bool) -> Result<Proposal> {
        if allow_locate_at_actor {
            if let Some(pos) = actor {
                self.discover_at(pos)?;
            }
        }
        self.propose()
    }

    /// Links the latest structure to its nearest neighbour. Writes the edge
    /// list once when a new edge is created and not at all otherwise.
    pub fn propose(&self) -> Result<Proposal> {
        let structures = self.store.structures()?;
        if structures.len() < 2 {
            return Ok(Proposal::TooFewStructures);
        }
        let latest = structures[structures.len() - 1].pos;
        let Some(nearest) = nearest_other(&structures, latest) else {
            return Ok(Proposal::TooFewStructures);
        };
        let nearest = nearest.pos;

        let edge = ConnectionEdge::planned(latest, nearest);
        if !self.store.append_edge(edge)? {
            debug!("graph: {} and {} already connected", latest, nearest);
            return Ok(Proposal::AlreadyConnected { from: latest, to: nearest });
        }
        self.queue.push(&edge);
        info!("graph: planned road {} -> {}", latest, nearest);
        Ok(Proposal::Created(edge))
    }
}

/// Closest structure to `from` other than itself; ties go to the earliest
/// entry.
pub fn nearest_other(points: &[StructurePoint], from: Coordinate) -> Option<&StructurePoint> {
    let mut best: Option<(i64, &StructurePoint)> = None;
    for p in points.iter().filter(|p| p.pos != from) {
        let d = p.pos.distance_sq(from);
        if best.map_or(true, |(bd, _)| d < bd) {
            best = Some((d, p));
        }
    }
    best.map(|(_, p)| p)
}
