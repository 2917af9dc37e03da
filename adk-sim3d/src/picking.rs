//! Pointer picking: resolve a click on the render surface to a scene entity.

use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Result, SimError},
    protocol::EntityId,
    scene::{Geometry, SceneEntity, SceneRegistry},
};

const PARALLEL_EPSILON: f32 = 1e-6;

/// Pixel dimensions of the render surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    size: Vec2,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Result<Self> {
        if !(width > 0.0 && height > 0.0) {
            return Err(SimError::RenderTarget(format!(
                "viewport must have a positive size, got {width}x{height}"
            )));
        }
        Ok(Self {
            size: Vec2::new(width, height),
        })
    }

    pub fn width(&self) -> f32 {
        self.size.x
    }

    pub fn height(&self) -> f32 {
        self.size.y
    }

    pub fn aspect(&self) -> f32 {
        self.size.x / self.size.y
    }

    /// Map a pointer position in pixels (origin top-left) to normalized device coordinates.
    pub fn ndc(&self, x: f32, y: f32) -> Vec2 {
        Vec2::new(x / self.size.x * 2.0 - 1.0, -(y / self.size.y * 2.0 - 1.0))
    }
}

/// Perspective camera looking at a fixed target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::splat(5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 75.0,
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Return to the home view, keeping the current aspect ratio.
    pub fn reset(&mut self) {
        *self = Self {
            aspect: self.aspect,
            ..Self::default()
        };
    }

    pub fn set_aspect(&mut self, viewport: &Viewport) {
        self.aspect = viewport.aspect();
    }

    pub fn view_projection(&self) -> Mat4 {
        let projection =
            Mat4::perspective_rh_gl(self.fov_y.to_radians(), self.aspect, self.near, self.far);
        projection * Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// World-space ray through a point in normalized device coordinates.
    pub fn ray(&self, ndc: Vec2) -> Ray {
        let inverse = self.view_projection().inverse();
        let near = inverse.project_point3(ndc.extend(-1.0));
        let far = inverse.project_point3(ndc.extend(1.0));
        Ray::new(near, far - near)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit direction.
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

/// Intersection test between a ray and one entity's geometry.
pub trait RayCaster: Send + Sync {
    /// Distance along the ray to the nearest hit in front of the origin.
    fn intersect(&self, ray: &Ray, entity: &SceneEntity) -> Option<f32>;
}

/// Tests against the analytic bounds of each primitive, in the entity's local frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundsRayCaster;

impl RayCaster for BoundsRayCaster {
    fn intersect(&self, ray: &Ray, entity: &SceneEntity) -> Option<f32> {
        // Rotation preserves length, so local distances equal world distances.
        let inverse = entity.transform.orientation().inverse();
        let origin = inverse * (ray.origin - entity.transform.position);
        let direction = inverse * ray.direction;

        match entity.geometry {
            Geometry::Sphere { radius } => intersect_sphere(origin, direction, radius),
            Geometry::Cube { size } => intersect_box(origin, direction, Vec3::splat(size * 0.5)),
            Geometry::Cylinder { radius, height } => {
                intersect_cylinder(origin, direction, radius, height * 0.5)
            }
        }
    }
}

fn intersect_sphere(origin: Vec3, direction: Vec3, radius: f32) -> Option<f32> {
    let b = origin.dot(direction);
    let c = origin.length_squared() - radius * radius;
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    let root = discriminant.sqrt();
    nearest_positive(-b - root, -b + root)
}

fn intersect_box(origin: Vec3, direction: Vec3, half: Vec3) -> Option<f32> {
    let mut t_min = f32::NEG_INFINITY;
    let mut t_max = f32::INFINITY;

    for axis in 0..3 {
        let (o, d, h) = (origin[axis], direction[axis], half[axis]);
        if d.abs() < PARALLEL_EPSILON {
            if o.abs() > h {
                return None;
            }
            continue;
        }
        let (a, b) = ((-h - o) / d, (h - o) / d);
        t_min = t_min.max(a.min(b));
        t_max = t_max.min(a.max(b));
        if t_min > t_max {
            return None;
        }
    }
    nearest_positive(t_min, t_max)
}

/// Capped cylinder centred on the origin, axis along +Y.
fn intersect_cylinder(origin: Vec3, direction: Vec3, radius: f32, half_height: f32) -> Option<f32> {
    let mut best: Option<f32> = None;
    let mut consider = |t: f32| {
        if t >= 0.0 && best.is_none_or(|current| t < current) {
            best = Some(t);
        }
    };

    let a = direction.x * direction.x + direction.z * direction.z;
    if a > PARALLEL_EPSILON {
        let b = origin.x * direction.x + origin.z * direction.z;
        let c = origin.x * origin.x + origin.z * origin.z - radius * radius;
        let discriminant = b * b - a * c;
        if discriminant >= 0.0 {
            let root = discriminant.sqrt();
            for t in [(-b - root) / a, (-b + root) / a] {
                if (origin.y + direction.y * t).abs() <= half_height {
                    consider(t);
                }
            }
        }
    }

    if direction.y.abs() > PARALLEL_EPSILON {
        for cap in [-half_height, half_height] {
            let t = (cap - origin.y) / direction.y;
            let x = origin.x + direction.x * t;
            let z = origin.z + direction.z * t;
            if x * x + z * z <= radius * radius {
                consider(t);
            }
        }
    }

    best
}

fn nearest_positive(near: f32, far: f32) -> Option<f32> {
    if near >= 0.0 {
        Some(near)
    } else if far >= 0.0 {
        // Origin inside the volume.
        Some(far)
    } else {
        None
    }
}

/// Resolves pointer events to entities and maintains the single selection.
pub struct PickingService {
    caster: Box<dyn RayCaster>,
}

impl Default for PickingService {
    fn default() -> Self {
        Self::new(BoundsRayCaster)
    }
}

impl std::fmt::Debug for PickingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PickingService").finish_non_exhaustive()
    }
}

impl PickingService {
    pub fn new(caster: impl RayCaster + 'static) -> Self {
        Self {
            caster: Box::new(caster),
        }
    }

    /// The nearest entity under the pointer, without touching the selection.
    pub fn hit_test(
        &self,
        x: f32,
        y: f32,
        viewport: &Viewport,
        camera: &Camera,
        scene: &SceneRegistry,
    ) -> Option<EntityId> {
        let ray = camera.ray(viewport.ndc(x, y));
        scene
            .iter()
            .filter_map(|entity| Some((self.caster.intersect(&ray, entity)?, entity)))
            .min_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, entity)| entity.id.clone())
    }

    /// Select the nearest entity under the pointer. A miss clears the selection.
    pub fn pick(
        &self,
        x: f32,
        y: f32,
        viewport: &Viewport,
        camera: &Camera,
        scene: &mut SceneRegistry,
    ) -> Option<EntityId> {
        let hit = self.hit_test(x, y, viewport, camera, scene);
        debug!(x, y, hit = ?hit, "pick");
        scene.select(hit.clone());
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ClientConfig,
        protocol::ShapeKind,
        scene::{ShapeParams, Transform},
    };

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    fn place(scene: &mut SceneRegistry, kind: ShapeKind, position: Vec3) -> EntityId {
        let id = scene.create(kind, &ShapeParams::default(), None);
        if let Some(entity) = scene.get_mut(&id) {
            entity.transform = Transform::at(position);
        }
        id
    }

    fn scene() -> SceneRegistry {
        SceneRegistry::new(&ClientConfig::builder().seed(3).build().expect("valid config"))
    }

    #[test]
    fn zero_sized_viewport_is_rejected() {
        assert!(matches!(Viewport::new(0.0, 600.0), Err(SimError::RenderTarget(_))));
        assert!(Viewport::new(800.0, 600.0).is_ok());
    }

    #[test]
    fn viewport_centre_maps_to_ndc_origin() {
        let viewport = Viewport::new(800.0, 600.0).expect("viewport");
        assert_eq!(viewport.ndc(400.0, 300.0), Vec2::ZERO);
        assert_eq!(viewport.ndc(0.0, 0.0), Vec2::new(-1.0, 1.0));
    }

    #[test]
    fn centre_ray_points_at_target() {
        let camera = Camera::default();
        let ray = camera.ray(Vec2::ZERO);
        let expected = (camera.target - camera.eye).normalize();
        assert!(ray.direction.abs_diff_eq(expected, 1e-4));
    }

    #[test]
    fn reset_restores_home_view() {
        let mut camera = Camera {
            eye: Vec3::new(10.0, 0.0, 0.0),
            aspect: 2.0,
            ..Camera::default()
        };
        camera.reset();
        assert_eq!(camera.eye, Vec3::splat(5.0));
        assert_eq!(camera.aspect, 2.0);
    }

    #[test]
    fn primitive_intersections() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        assert!(intersect_sphere(ray.origin, ray.direction, 1.0).is_some_and(|t| approx(t, 9.0)));
        assert!(
            intersect_box(ray.origin, ray.direction, Vec3::splat(0.5)).is_some_and(|t| approx(t, 9.5))
        );
        assert!(
            intersect_cylinder(ray.origin, ray.direction, 1.0, 1.0).is_some_and(|t| approx(t, 9.0))
        );

        let down = Ray::new(Vec3::new(0.0, 10.0, 0.0), Vec3::NEG_Y);
        assert!(intersect_cylinder(down.origin, down.direction, 1.0, 1.0).is_some_and(|t| approx(t, 9.0)));

        let miss = Ray::new(Vec3::new(3.0, 0.0, 10.0), Vec3::NEG_Z);
        assert!(intersect_sphere(miss.origin, miss.direction, 1.0).is_none());
        assert!(intersect_box(miss.origin, miss.direction, Vec3::splat(0.5)).is_none());
        assert!(intersect_cylinder(miss.origin, miss.direction, 1.0, 1.0).is_none());
    }

    #[test]
    fn behind_the_ray_is_not_a_hit() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::Z);
        assert!(intersect_sphere(ray.origin, ray.direction, 1.0).is_none());
    }

    #[test]
    fn pick_selects_nearest_entity() {
        let mut scene = scene();
        let far = place(&mut scene, ShapeKind::Sphere, Vec3::ZERO);
        let near = place(&mut scene, ShapeKind::Cube, Vec3::splat(2.5));
        let viewport = Viewport::new(800.0, 800.0).expect("viewport");
        let picking = PickingService::default();

        let hit = picking.pick(400.0, 400.0, &viewport, &Camera::default(), &mut scene);
        assert_eq!(hit.as_deref(), Some(near.as_str()));
        assert_eq!(scene.selected_id(), Some(near.as_str()));
        assert_ne!(hit.as_deref(), Some(far.as_str()));
    }

    #[test]
    fn picking_empty_space_clears_selection() {
        let mut scene = scene();
        let id = place(&mut scene, ShapeKind::Sphere, Vec3::ZERO);
        let viewport = Viewport::new(800.0, 800.0).expect("viewport");
        let picking = PickingService::default();

        assert!(picking.pick(400.0, 400.0, &viewport, &Camera::default(), &mut scene).is_some());
        assert_eq!(scene.selected_id(), Some(id.as_str()));

        assert!(picking.pick(0.0, 0.0, &viewport, &Camera::default(), &mut scene).is_none());
        assert!(scene.selected_id().is_none());
    }
}
