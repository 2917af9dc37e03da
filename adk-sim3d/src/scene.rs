//! The scene object registry: the authoritative set of live 3D entities.

use chrono::Utc;
use glam::{EulerRot, Quat, Vec3};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    config::ClientConfig,
    playback::Trajectory,
    protocol::{EntityId, ObjectTag, ShapeCreatedPayload, ShapeKind, UiProps},
};

/// Colours new entities are drawn from.
pub const PALETTE: [u32; 6] = [0xff6b6b, 0x4ecdc4, 0x45b7d1, 0x96ceb4, 0xfeca57, 0xff9ff3];

const DEFAULT_OPACITY: f32 = 0.8;
const ANIMATED_RADIUS: f32 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Cube,
    Sphere,
    Cylinder,
    AnimatedPoint,
    AnimatedCollisionPoint,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cube => "Cube",
            Self::Sphere => "Sphere",
            Self::Cylinder => "Cylinder",
            Self::AnimatedPoint => "Animated body",
            Self::AnimatedCollisionPoint => "Collision body",
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, Self::AnimatedPoint | Self::AnimatedCollisionPoint)
    }
}

impl From<ShapeKind> for EntityKind {
    fn from(kind: ShapeKind) -> Self {
        match kind {
            ShapeKind::Cube => Self::Cube,
            ShapeKind::Sphere => Self::Sphere,
            ShapeKind::Cylinder => Self::Cylinder,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Geometry {
    Cube { size: f32 },
    Sphere { radius: f32 },
    Cylinder { radius: f32, height: f32 },
}

/// User-adjustable dimensions for new primitives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ShapeParams {
    pub size: f32,
    pub radius: f32,
    pub height: f32,
}

impl Default for ShapeParams {
    fn default() -> Self {
        Self {
            size: 1.0,
            radius: 1.0,
            height: 2.0,
        }
    }
}

impl ShapeParams {
    pub fn geometry(&self, kind: ShapeKind) -> Geometry {
        match kind {
            ShapeKind::Cube => Geometry::Cube { size: self.size },
            ShapeKind::Sphere => Geometry::Sphere {
                radius: self.radius,
            },
            ShapeKind::Cylinder => Geometry::Cylinder {
                radius: self.radius,
                height: self.height,
            },
        }
    }

    /// The `params` object of an outbound `create_shape`.
    pub fn to_props(&self, kind: ShapeKind) -> UiProps {
        let params = match kind {
            ShapeKind::Cube => json!({ "size": self.size }),
            ShapeKind::Sphere => json!({ "radius": self.radius }),
            ShapeKind::Cylinder => json!({ "radius": self.radius, "height": self.height }),
        };
        params.as_object().cloned().unwrap_or_default()
    }

    /// Geometry described by a `shape_created` payload, defaulting missing dimensions.
    pub fn from_payload(payload: &ShapeCreatedPayload) -> Self {
        let defaults = Self::default();
        Self {
            size: payload.param("size").unwrap_or(defaults.size),
            radius: payload.param("radius").unwrap_or(defaults.radius),
            height: payload.param("height").unwrap_or(defaults.height),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in radians, XYZ order.
    pub rotation: Vec3,
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Vec3::ZERO,
        }
    }

    pub fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::XYZ, self.rotation.x, self.rotation.y, self.rotation.z)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Material {
    pub color: u32,
    pub opacity: f32,
    pub wireframe: bool,
}

impl Material {
    fn solid(color: u32) -> Self {
        Self {
            color,
            opacity: DEFAULT_OPACITY,
            wireframe: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SceneEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub transform: Transform,
    pub geometry: Geometry,
    pub material: Material,
    /// Simulation object id for collision bodies.
    pub object_tag: Option<ObjectTag>,
    trajectory: Option<Trajectory>,
    cursor: usize,
}

impl SceneEntity {
    pub fn trajectory(&self) -> Option<&Trajectory> {
        self.trajectory.as_ref()
    }

    /// Index of the next trajectory sample to display.
    pub fn playback_cursor(&self) -> usize {
        self.cursor
    }

    /// Whether the entity still has samples left to play.
    pub fn is_playing(&self) -> bool {
        self.trajectory
            .as_ref()
            .is_some_and(|trajectory| self.cursor < trajectory.len())
    }

    /// Show the sample under the cursor and move the cursor past it. Static entities and
    /// exhausted trajectories are left untouched.
    pub(crate) fn step_playback(&mut self) -> bool {
        let Some(sample) = self
            .trajectory
            .as_ref()
            .and_then(|trajectory| trajectory.get(self.cursor))
        else {
            return false;
        };
        self.transform.position = sample;
        self.cursor += 1;
        true
    }
}

/// Summary of the selected entity for the info panel.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SelectionInfo {
    pub id: EntityId,
    pub label: String,
    pub position: [f32; 3],
    pub rotation_degrees: [f32; 3],
}

#[derive(Debug)]
pub struct SceneRegistry {
    entities: Vec<SceneEntity>,
    selected: Option<EntityId>,
    rng: StdRng,
    half_extent: f32,
    height: (f32, f32),
    local_ids: u64,
}

impl Default for SceneRegistry {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl SceneRegistry {
    pub fn new(config: &ClientConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            entities: Vec::new(),
            selected: None,
            rng,
            half_extent: config.spawn_half_extent,
            height: config.spawn_height,
            local_ids: 0,
        }
    }

    /// Spawn a static primitive at a random position with a random palette colour.
    pub fn create(&mut self, kind: ShapeKind, params: &ShapeParams, id: Option<EntityId>) -> EntityId {
        let position = Vec3::new(
            self.rng.gen_range(-self.half_extent..self.half_extent),
            self.rng.gen_range(self.height.0..self.height.1),
            self.rng.gen_range(-self.half_extent..self.half_extent),
        );
        let color = PALETTE.choose(&mut self.rng).copied().unwrap_or(PALETTE[0]);
        let id = self.claim_id(id);

        self.entities.push(SceneEntity {
            id: id.clone(),
            kind: kind.into(),
            transform: Transform::at(position),
            geometry: params.geometry(kind),
            material: Material::solid(color),
            object_tag: None,
            trajectory: None,
            cursor: 0,
        });
        debug!(entity_id = %id, kind = kind.as_str(), "entity created");
        id
    }

    /// Spawn a sphere that replays `trajectory`, starting at the origin until the first tick.
    pub fn spawn_animated(
        &mut self,
        kind: EntityKind,
        trajectory: Trajectory,
        color: u32,
        object_tag: Option<ObjectTag>,
    ) -> EntityId {
        let id = self.claim_id(None);
        debug!(entity_id = %id, samples = trajectory.len(), "animated entity created");
        self.entities.push(SceneEntity {
            id: id.clone(),
            kind,
            transform: Transform::default(),
            geometry: Geometry::Sphere {
                radius: ANIMATED_RADIUS,
            },
            material: Material::solid(color),
            object_tag,
            trajectory: Some(trajectory),
            cursor: 0,
        });
        id
    }

    fn claim_id(&mut self, requested: Option<EntityId>) -> EntityId {
        if let Some(id) = requested {
            if !self.contains(&id) {
                return id;
            }
            warn!(entity_id = %id, "duplicate entity id; assigning a local id");
        }
        self.local_ids += 1;
        format!("local_{}_{}", Utc::now().timestamp_millis(), self.local_ids)
    }

    /// Remove every entity and drop the selection.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.selected = None;
    }

    pub fn set_wireframe(&mut self, wireframe: bool) {
        for entity in &mut self.entities {
            entity.material.wireframe = wireframe;
        }
    }

    pub fn select(&mut self, id: Option<EntityId>) {
        self.selected = id.filter(|id| self.contains(id));
    }

    pub fn selected(&self) -> Option<&SceneEntity> {
        let id = self.selected.as_deref()?;
        self.get(id)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selection_info(&self) -> Option<SelectionInfo> {
        let entity = self.selected()?;
        let rotation = entity.transform.rotation;
        Some(SelectionInfo {
            id: entity.id.clone(),
            label: entity.kind.label().to_string(),
            position: entity.transform.position.to_array(),
            rotation_degrees: [
                rotation.x.to_degrees(),
                rotation.y.to_degrees(),
                rotation.z.to_degrees(),
            ],
        })
    }

    pub fn get(&self, id: &str) -> Option<&SceneEntity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SceneEntity> {
        self.entities.iter_mut().find(|entity| entity.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneEntity> {
        self.entities.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SceneEntity> {
        self.entities.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
