//! Document model: canvas objects and their kind-specific payloads.
//!
//! A `CanvasObject` is what lives in the local index and what is persisted as
//! a document payload. Kind-specific data is a tagged union (`ObjectBody`)
//! discriminated by an explicit `kind` tag, so every consumer matches
//! exhaustively instead of probing an untyped props bag.

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PayloadError;
use crate::geometry::{Geometry, Point};

/// Unique identifier for a canvas object.
pub type ObjectId = Uuid;
/// Identifier of a shared board.
pub type BoardId = Uuid;
/// Identifier of an authenticated user.
pub type UserId = Uuid;
/// Identifier of one connected client session (one per open board view).
pub type ClientId = Uuid;

// =============================================================================
// KIND
// =============================================================================

/// Discriminant of [`ObjectBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Shape,
    Frame,
    Table,
    Connector,
    Container,
}

/// Kind-specific payload of a canvas object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ObjectBody {
    Shape(ShapeData),
    Frame(FrameData),
    Table(TableData),
    Connector(ConnectorData),
    Container(ContainerData),
}

impl ObjectBody {
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Shape(_) => ObjectKind::Shape,
            Self::Frame(_) => ObjectKind::Frame,
            Self::Table(_) => ObjectKind::Table,
            Self::Connector(_) => ObjectKind::Connector,
            Self::Container(_) => ObjectKind::Container,
        }
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Outline drawn for a shape object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    #[default]
    Rect,
    Ellipse,
    Diamond,
    Star,
    Text,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapeData {
    #[serde(default)]
    pub shape: ShapeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

/// Spatial container. `child_ids` is derived from geometry by the membership
/// tracker and persisted with the frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameData {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub child_ids: BTreeSet<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableData {
    #[serde(default)]
    pub rows: u32,
    #[serde(default)]
    pub cols: u32,
    /// Row-major cell text.
    #[serde(default)]
    pub cells: Vec<Vec<String>>,
}

/// Group created by grouping objects. Members are held as scene-absolute
/// snapshots and are not present in the index while grouped.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerData {
    #[serde(default)]
    pub members: Vec<CanvasObject>,
}

/// One of the four canonical attachment points of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Port {
    Top,
    #[default]
    Right,
    Bottom,
    Left,
}

impl Port {
    pub const ALL: [Port; 4] = [Port::Top, Port::Right, Port::Bottom, Port::Left];

    /// Port location in object-local units (center origin, unscaled).
    #[must_use]
    pub fn local_offset(self, width: f64, height: f64) -> Point {
        match self {
            Self::Top => Point::new(0.0, -height / 2.0),
            Self::Right => Point::new(width / 2.0, 0.0),
            Self::Bottom => Point::new(0.0, height / 2.0),
            Self::Left => Point::new(-width / 2.0, 0.0),
        }
    }
}

/// Which arrowheads a connector draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrowMode {
    None,
    #[default]
    End,
    Start,
    Both,
}

/// Which end of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectorData {
    #[serde(default)]
    pub source_object_id: Option<ObjectId>,
    #[serde(default)]
    pub source_port: Port,
    #[serde(default)]
    pub target_object_id: Option<ObjectId>,
    #[serde(default = "default_target_port")]
    pub target_port: Port,
    /// User-placed bend points, rendered verbatim.
    #[serde(default)]
    pub waypoints: Vec<Point>,
    /// Last known source position, used while unattached.
    #[serde(default)]
    pub source_float_point: Point,
    /// Last known target position, used while unattached.
    #[serde(default)]
    pub target_float_point: Point,
    #[serde(default)]
    pub arrow_mode: ArrowMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stroke_dash: Vec<f64>,
}

fn default_target_port() -> Port {
    Port::Left
}

impl ConnectorData {
    /// Free-floating connector between two scene points.
    #[must_use]
    pub fn floating(source: Point, target: Point) -> Self {
        Self { source_float_point: source, target_float_point: target, ..Self::default() }
    }

    #[must_use]
    pub fn attached_id(&self, end: Endpoint) -> Option<ObjectId> {
        match end {
            Endpoint::Source => self.source_object_id,
            Endpoint::Target => self.target_object_id,
        }
    }

    #[must_use]
    pub fn port(&self, end: Endpoint) -> Port {
        match end {
            Endpoint::Source => self.source_port,
            Endpoint::Target => self.target_port,
        }
    }

    #[must_use]
    pub fn float_point(&self, end: Endpoint) -> Point {
        match end {
            Endpoint::Source => self.source_float_point,
            Endpoint::Target => self.target_float_point,
        }
    }

    /// Attach `end` to `object_id` at `port`.
    pub fn attach(&mut self, end: Endpoint, object_id: ObjectId, port: Port) {
        match end {
            Endpoint::Source => {
                self.source_object_id = Some(object_id);
                self.source_port = port;
            }
            Endpoint::Target => {
                self.target_object_id = Some(object_id);
                self.target_port = port;
            }
        }
    }

    /// Detach `end`, leaving it floating at `at`.
    pub fn detach(&mut self, end: Endpoint, at: Point) {
        match end {
            Endpoint::Source => {
                self.source_object_id = None;
                self.source_float_point = at;
            }
            Endpoint::Target => {
                self.target_object_id = None;
                self.target_float_point = at;
            }
        }
    }

    pub fn set_float_point(&mut self, end: Endpoint, at: Point) {
        match end {
            Endpoint::Source => self.source_float_point = at,
            Endpoint::Target => self.target_float_point = at,
        }
    }

    /// Whether either end references `object_id`.
    #[must_use]
    pub fn references(&self, object_id: ObjectId) -> bool {
        self.source_object_id == Some(object_id) || self.target_object_id == Some(object_id)
    }
}

// =============================================================================
// CANVAS OBJECT
// =============================================================================

/// An addressable object on a board, as held in the index and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasObject {
    pub id: ObjectId,
    pub geometry: Geometry,
    /// Stacking key; lower values are drawn beneath higher values. Assigned
    /// from the creation timestamp when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    pub body: ObjectBody,
}

impl CanvasObject {
    #[must_use]
    pub fn new(geometry: Geometry, body: ObjectBody) -> Self {
        Self { id: Uuid::new_v4(), geometry, z_index: None, body }
    }

    #[must_use]
    pub fn shape(geometry: Geometry) -> Self {
        Self::new(geometry, ObjectBody::Shape(ShapeData::default()))
    }

    #[must_use]
    pub fn frame(geometry: Geometry, title: &str) -> Self {
        Self::new(geometry, ObjectBody::Frame(FrameData { title: title.to_owned(), child_ids: BTreeSet::new() }))
    }

    #[must_use]
    pub fn connector(data: ConnectorData) -> Self {
        Self::new(Geometry::default(), ObjectBody::Connector(data))
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.body.kind()
    }

    #[must_use]
    pub fn is_frame(&self) -> bool {
        matches!(self.body, ObjectBody::Frame(_))
    }

    #[must_use]
    pub fn as_connector(&self) -> Option<&ConnectorData> {
        match &self.body {
            ObjectBody::Connector(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_connector_mut(&mut self) -> Option<&mut ConnectorData> {
        match &mut self.body {
            ObjectBody::Connector(data) => Some(data),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_frame(&self) -> Option<&FrameData> {
        match &self.body {
            ObjectBody::Frame(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_frame_mut(&mut self) -> Option<&mut FrameData> {
        match &mut self.body {
            ObjectBody::Frame(data) => Some(data),
            _ => None,
        }
    }

    /// Stacking key used by the ordered index.
    #[must_use]
    pub fn z_key(&self) -> i64 {
        self.z_index.unwrap_or(0)
    }

    /// Move the object by `(dx, dy)`. Connectors also move their waypoints
    /// and float points; container members move with the container.
    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.geometry.translate(dx, dy);
        match &mut self.body {
            ObjectBody::Connector(data) => {
                for wp in &mut data.waypoints {
                    *wp = wp.translated(dx, dy);
                }
                data.source_float_point = data.source_float_point.translated(dx, dy);
                data.target_float_point = data.target_float_point.translated(dx, dy);
            }
            ObjectBody::Container(data) => {
                for member in &mut data.members {
                    member.translate(dx, dy);
                }
            }
            ObjectBody::Shape(_) | ObjectBody::Frame(_) | ObjectBody::Table(_) => {}
        }
    }

    /// Serialize to the opaque document payload.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Malformed`] if serialization fails (non-finite numbers).
    pub fn to_payload(&self) -> Result<serde_json::Value, PayloadError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse a document payload.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Malformed`] when the payload does not describe an object.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, PayloadError> {
        Ok(Self::deserialize(payload)?)
    }

    /// Whether two objects serialize to the same payload.
    #[must_use]
    pub fn same_payload(&self, other: &CanvasObject) -> bool {
        match (self.to_payload(), other.to_payload()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}
