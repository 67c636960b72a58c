//! Connector Consistency Maintainer.
//!
//! DESIGN
//! ======
//! A connector's rendered path is derived, never stored: each endpoint is
//! the live port position of the attached object when it resolves, else the
//! stored float point, with the user's waypoints verbatim in between. Paths
//! are cached per connector and recomputed whenever either endpoint object
//! changes, including during a drag.
//!
//! Deleting an endpoint object floats the end at its last resolved position;
//! the connector itself is never removed as a side effect. Missing endpoints
//! are a normal state, not an error.

#[cfg(test)]
#[path = "connectors_test.rs"]
mod connectors_test;

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::error::EditError;
use crate::geometry::Point;
use crate::index::ObjectIndex;
use crate::model::{ArrowMode, CanvasObject, ConnectorData, Endpoint, ObjectBody, ObjectId, Port};
use crate::mutation::Mutation;

/// Scene position of `port` on `obj`, through its full transform.
#[must_use]
pub fn port_position(obj: &CanvasObject, port: Port) -> Point {
    let g = &obj.geometry;
    g.local_to_scene(port.local_offset(g.width, g.height))
}

/// Rendered position of one end of a connector.
#[must_use]
pub fn resolve_endpoint(index: &ObjectIndex, data: &ConnectorData, end: Endpoint) -> Point {
    data.attached_id(end)
        .and_then(|id| index.resolve(&id))
        .map_or_else(|| data.float_point(end), |obj| port_position(obj, data.port(end)))
}

/// Full rendered point list: source, waypoints, target.
#[must_use]
pub fn path_of(index: &ObjectIndex, data: &ConnectorData) -> Vec<Point> {
    let mut path = Vec::with_capacity(data.waypoints.len() + 2);
    path.push(resolve_endpoint(index, data, Endpoint::Source));
    path.extend(data.waypoints.iter().copied());
    path.push(resolve_endpoint(index, data, Endpoint::Target));
    path
}

/// One arrowhead: where it points and the direction it points in (radians).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Arrowhead {
    pub tip: Point,
    pub angle: f64,
}

/// Arrowheads to draw for `mode` on a rendered path.
#[must_use]
pub fn arrowheads(mode: ArrowMode, path: &[Point]) -> Vec<Arrowhead> {
    let (Some(first), Some(last)) = (path.first(), path.last()) else {
        return Vec::new();
    };
    if path.len() < 2 {
        return Vec::new();
    }
    let start = || Arrowhead { tip: *first, angle: (first.y - path[1].y).atan2(first.x - path[1].x) };
    let end = || {
        let prev = path[path.len() - 2];
        Arrowhead { tip: *last, angle: (last.y - prev.y).atan2(last.x - prev.x) }
    };
    match mode {
        ArrowMode::None => Vec::new(),
        ArrowMode::End => vec![end()],
        ArrowMode::Start => vec![start()],
        ArrowMode::Both => vec![start(), end()],
    }
}

// =============================================================================
// MAINTAINER
// =============================================================================

#[derive(Debug)]
pub struct ConnectorMaintainer {
    snap_radius: f64,
    paths: HashMap<ObjectId, Vec<Point>>,
}

impl ConnectorMaintainer {
    #[must_use]
    pub fn new(snap_radius: f64) -> Self {
        Self { snap_radius, paths: HashMap::new() }
    }

    /// Cached rendered path of a connector.
    #[must_use]
    pub fn path(&self, id: &ObjectId) -> Option<&[Point]> {
        self.paths.get(id).map(Vec::as_slice)
    }

    /// Recompute paths of connectors among `changed` and connectors attached
    /// to any of `changed` (or to members of changed containers). Returns the
    /// connectors whose path actually changed.
    pub fn recompute_for(&mut self, index: &ObjectIndex, changed: &[ObjectId]) -> Vec<ObjectId> {
        let mut affected = BTreeSet::new();
        for id in changed {
            match index.get(id).map(|obj| &obj.body) {
                Some(ObjectBody::Connector(_)) => {
                    affected.insert(*id);
                }
                Some(ObjectBody::Container(data)) => {
                    for member in &data.members {
                        affected.extend(index.connectors_attached_to(member.id));
                    }
                }
                Some(_) => {}
                None => {
                    self.paths.remove(id);
                }
            }
            affected.extend(index.connectors_attached_to(*id));
        }
        affected.into_iter().filter(|id| self.refresh(index, *id)).collect()
    }

    /// Recompute every connector (after a bulk load).
    pub fn recompute_all(&mut self, index: &ObjectIndex) -> Vec<ObjectId> {
        self.paths.retain(|id, _| index.contains(id));
        let connectors: Vec<ObjectId> =
            index.iter_ordered().filter(|obj| obj.as_connector().is_some()).map(|obj| obj.id).collect();
        connectors.into_iter().filter(|id| self.refresh(index, *id)).collect()
    }

    fn refresh(&mut self, index: &ObjectIndex, id: ObjectId) -> bool {
        let Some(data) = index.get(&id).and_then(CanvasObject::as_connector) else {
            self.paths.remove(&id);
            return false;
        };
        let path = path_of(index, data);
        if self.paths.get(&id) == Some(&path) {
            return false;
        }
        self.paths.insert(id, path);
        true
    }

    /// Float every connector end attached to `removed`, at its last resolved
    /// position. Call before `removed` leaves the index.
    pub fn detach_endpoints_of(&self, index: &mut ObjectIndex, mutation: &mut Mutation, removed: ObjectId) -> Vec<ObjectId> {
        let attached = index.connectors_attached_to(removed);
        for connector_id in &attached {
            let Some(data) = index.get(connector_id).and_then(CanvasObject::as_connector) else {
                continue;
            };
            let ends: Vec<(Endpoint, Point)> = [Endpoint::Source, Endpoint::Target]
                .into_iter()
                .filter(|end| data.attached_id(*end) == Some(removed))
                .map(|end| (end, resolve_endpoint(index, data, end)))
                .collect();
            mutation.touch(index, *connector_id);
            index.update(connector_id, |obj| {
                if let Some(data) = obj.as_connector_mut() {
                    for (end, at) in ends {
                        data.detach(end, at);
                    }
                }
            });
        }
        attached
    }

    /// Port a dropped endpoint should attach to on `target`: a port within
    /// the snap radius of the drop wins, otherwise the nearest of the four.
    #[must_use]
    pub fn choose_port(&self, target: &CanvasObject, drop: Point) -> Port {
        let mut ranked: Vec<(Port, f64)> =
            Port::ALL.into_iter().map(|port| (port, port_position(target, port).distance_to(drop))).collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked
            .iter()
            .find(|(_, distance)| *distance <= self.snap_radius)
            .or_else(|| ranked.first())
            .map_or(Port::Right, |(port, _)| *port)
    }

    /// Move one end of a connector: attach it to `target` at the chosen port,
    /// or leave it floating at `drop`.
    ///
    /// # Errors
    ///
    /// [`EditError::NotFound`] / [`EditError::NotAConnector`] for a bad
    /// connector id, [`EditError::InvalidAttachTarget`] when `target` is the
    /// connector itself, another connector, or a container.
    pub fn move_endpoint(
        &self,
        index: &mut ObjectIndex,
        mutation: &mut Mutation,
        connector_id: ObjectId,
        end: Endpoint,
        drop: Point,
        target: Option<ObjectId>,
    ) -> Result<Option<Port>, EditError> {
        connector_data(index, connector_id)?;
        let attach = match target {
            Some(target_id) => {
                let candidate = index.get(&target_id).ok_or(EditError::NotFound(target_id))?;
                if target_id == connector_id
                    || matches!(candidate.body, ObjectBody::Connector(_) | ObjectBody::Container(_))
                {
                    return Err(EditError::InvalidAttachTarget(target_id));
                }
                Some((target_id, self.choose_port(candidate, drop)))
            }
            None => None,
        };

        mutation.touch(index, connector_id);
        index.update(&connector_id, |obj| {
            if let Some(data) = obj.as_connector_mut() {
                match attach {
                    Some((target_id, port)) => {
                        data.attach(end, target_id, port);
                        data.set_float_point(end, drop);
                    }
                    None => data.detach(end, drop),
                }
            }
        });
        Ok(attach.map(|(_, port)| port))
    }

    /// Insert a waypoint on segment `segment` (0 = source to first waypoint);
    /// it becomes `waypoints[segment]`.
    ///
    /// # Errors
    ///
    /// [`EditError::WaypointOutOfRange`] when `segment` exceeds the waypoint count.
    pub fn insert_waypoint(
        &self,
        index: &mut ObjectIndex,
        mutation: &mut Mutation,
        connector_id: ObjectId,
        segment: usize,
        at: Point,
    ) -> Result<(), EditError> {
        let len = connector_data(index, connector_id)?.waypoints.len();
        if segment > len {
            return Err(EditError::WaypointOutOfRange { index: segment, len });
        }
        edit_waypoints(index, mutation, connector_id, |waypoints| waypoints.insert(segment, at));
        Ok(())
    }

    /// # Errors
    ///
    /// [`EditError::WaypointOutOfRange`] for an unknown waypoint.
    pub fn move_waypoint(
        &self,
        index: &mut ObjectIndex,
        mutation: &mut Mutation,
        connector_id: ObjectId,
        waypoint: usize,
        to: Point,
    ) -> Result<(), EditError> {
        let len = connector_data(index, connector_id)?.waypoints.len();
        if waypoint >= len {
            return Err(EditError::WaypointOutOfRange { index: waypoint, len });
        }
        edit_waypoints(index, mutation, connector_id, |waypoints| waypoints[waypoint] = to);
        Ok(())
    }

    /// # Errors
    ///
    /// [`EditError::WaypointOutOfRange`] for an unknown waypoint.
    pub fn remove_waypoint(
        &self,
        index: &mut ObjectIndex,
        mutation: &mut Mutation,
        connector_id: ObjectId,
        waypoint: usize,
    ) -> Result<Point, EditError> {
        let data = connector_data(index, connector_id)?;
        let len = data.waypoints.len();
        let Some(removed) = data.waypoints.get(waypoint).copied() else {
            return Err(EditError::WaypointOutOfRange { index: waypoint, len });
        };
        edit_waypoints(index, mutation, connector_id, |waypoints| {
            waypoints.remove(waypoint);
        });
        Ok(removed)
    }
}

fn connector_data(index: &ObjectIndex, id: ObjectId) -> Result<&ConnectorData, EditError> {
    index.get(&id).ok_or(EditError::NotFound(id))?.as_connector().ok_or(EditError::NotAConnector(id))
}

fn edit_waypoints<F>(index: &mut ObjectIndex, mutation: &mut Mutation, id: ObjectId, f: F)
where
    F: FnOnce(&mut Vec<Point>),
{
    mutation.touch(index, id);
    index.update(&id, |obj| {
        if let Some(data) = obj.as_connector_mut() {
            f(&mut data.waypoints);
        }
    });
}
