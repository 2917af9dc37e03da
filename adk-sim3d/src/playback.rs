//! Trajectory playback.
//!
//! The scheduler holds no entities of its own; each tick walks the scene registry and moves every
//! entity that still has trajectory samples left by exactly one sample.

use std::{collections::BTreeSet, time::Duration};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    config::PlaybackPacing,
    protocol::{ObjectTag, Point3, StepSnapshot},
    scene::SceneRegistry,
};

/// An ordered sequence of position samples replayed onto one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    samples: Vec<Vec3>,
}

impl Trajectory {
    /// A single-body trajectory from a flat point list.
    pub fn from_points(points: &[Point3]) -> Self {
        Self {
            samples: points.iter().copied().map(Vec3::from_array).collect(),
        }
    }

    /// The positions tagged `tag`, in step order. Steps that omit the object are skipped, so
    /// the result can be shorter than the number of steps.
    pub fn for_object(steps: &[StepSnapshot], tag: ObjectTag) -> Self {
        let samples = steps
            .iter()
            .filter_map(|step| step.objects.iter().find(|object| object.id == tag))
            .map(|object| Vec3::from_array(object.position))
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<Vec3> {
        self.samples.get(idx).copied()
    }

    pub fn last(&self) -> Option<Vec3> {
        self.samples.last().copied()
    }

    pub fn samples(&self) -> &[Vec3] {
        &self.samples
    }
}

impl FromIterator<Vec3> for Trajectory {
    fn from_iter<I: IntoIterator<Item = Vec3>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

/// Every object id that appears in any step, ascending.
pub fn object_tags(steps: &[StepSnapshot]) -> BTreeSet<ObjectTag> {
    steps
        .iter()
        .flat_map(|step| step.objects.iter().map(|object| object.id))
        .collect()
}

#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    pacing: PlaybackPacing,
    /// Wall-clock time not yet converted into ticks under fixed-rate pacing.
    carry: Duration,
}

impl PlaybackScheduler {
    pub fn new(pacing: PlaybackPacing) -> Self {
        Self {
            pacing,
            carry: Duration::ZERO,
        }
    }

    /// Advance every playing entity by one sample. Returns how many entities moved.
    pub fn tick(&mut self, scene: &mut SceneRegistry) -> usize {
        let moved = scene
            .iter_mut()
            .map(|entity| entity.step_playback())
            .filter(|moved| *moved)
            .count();
        if moved > 0 {
            trace!(moved, "playback tick");
        }
        moved
    }

    /// Entry point for the frame clock. Per-tick pacing ticks once per frame; fixed-rate pacing
    /// ticks once for every full interval of `elapsed` time, carrying the remainder.
    pub fn advance(&mut self, scene: &mut SceneRegistry, elapsed: Duration) -> usize {
        match self.pacing {
            PlaybackPacing::PerTick => self.tick(scene),
            PlaybackPacing::FixedRate { interval } => {
                if Self::is_idle(scene) {
                    self.carry = Duration::ZERO;
                    return 0;
                }
                self.carry += elapsed;
                let mut moved = 0;
                while self.carry >= interval {
                    self.carry -= interval;
                    moved += self.tick(scene);
                }
                moved
            }
        }
    }

    /// True when no entity has samples left to play.
    pub fn is_idle(scene: &SceneRegistry) -> bool {
        !scene.iter().any(|entity| entity.is_playing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ClientConfig,
        protocol::{ShapeKind, TaggedPosition},
        scene::{EntityKind, PALETTE, ShapeParams},
    };

    fn scene() -> SceneRegistry {
        SceneRegistry::new(&ClientConfig::builder().seed(1).build().expect("valid config"))
    }

    fn step(objects: &[(ObjectTag, Point3)]) -> StepSnapshot {
        StepSnapshot {
            objects: objects
                .iter()
                .map(|(id, position)| TaggedPosition {
                    id: *id,
                    position: *position,
                })
                .collect(),
        }
    }

    #[test]
    fn reaches_fixed_point_after_n_ticks() {
        let mut scene = scene();
        let points = [[0.0, 10.0, 0.0], [0.0, 9.0, 0.0], [0.0, 7.0, 0.0], [0.0, 4.0, 0.0]];
        let id = scene.spawn_animated(
            EntityKind::AnimatedPoint,
            Trajectory::from_points(&points),
            PALETTE[0],
            None,
        );
        let mut scheduler = PlaybackScheduler::default();

        for (frame, expected) in points.iter().enumerate() {
            assert_eq!(scheduler.tick(&mut scene), 1);
            let entity = scene.get(&id).expect("entity");
            assert_eq!(entity.playback_cursor(), frame + 1);
            assert_eq!(entity.transform.position, Vec3::from_array(*expected));
        }
        assert!(PlaybackScheduler::is_idle(&scene));

        for _ in 0..3 {
            assert_eq!(scheduler.tick(&mut scene), 0);
        }
        let entity = scene.get(&id).expect("entity");
        assert_eq!(entity.playback_cursor(), points.len());
        assert_eq!(entity.transform.position, Vec3::new(0.0, 4.0, 0.0));
    }

    #[test]
    fn static_entities_never_move() {
        let mut scene = scene();
        let id = scene.create(ShapeKind::Cube, &ShapeParams::default(), None);
        let before = scene.get(&id).expect("entity").transform;
        let mut scheduler = PlaybackScheduler::default();
        assert_eq!(scheduler.tick(&mut scene), 0);
        assert_eq!(scene.get(&id).expect("entity").transform, before);
    }

    #[test]
    fn collision_reconstruction_skips_missing_steps() {
        let steps = [
            step(&[(1, [0.0, 1.0, 0.0]), (2, [5.0, 0.0, 0.0])]),
            step(&[(2, [4.0, 0.0, 0.0])]),
            step(&[(1, [0.0, 3.0, 0.0]), (2, [3.0, 0.0, 0.0])]),
        ];
        let trajectory = Trajectory::for_object(&steps, 1);
        assert_eq!(trajectory.len(), 2);
        assert_eq!(trajectory.get(0), Some(Vec3::new(0.0, 1.0, 0.0)));
        assert_eq!(trajectory.get(1), Some(Vec3::new(0.0, 3.0, 0.0)));
        assert_eq!(Trajectory::for_object(&steps, 2).len(), 3);
        assert!(Trajectory::for_object(&steps, 9).is_empty());
        assert_eq!(object_tags(&steps).into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn shorter_trajectories_hold_while_longer_ones_play() {
        let mut scene = scene();
        let short = scene.spawn_animated(
            EntityKind::AnimatedCollisionPoint,
            Trajectory::from_points(&[[1.0, 0.0, 0.0]]),
            PALETTE[1],
            Some(1),
        );
        let long = scene.spawn_animated(
            EntityKind::AnimatedCollisionPoint,
            Trajectory::from_points(&[[0.0, 0.0, 1.0], [0.0, 0.0, 2.0]]),
            PALETTE[2],
            Some(2),
        );
        let mut scheduler = PlaybackScheduler::default();
        assert_eq!(scheduler.tick(&mut scene), 2);
        assert_eq!(scheduler.tick(&mut scene), 1);
        assert_eq!(scene.get(&short).expect("entity").transform.position, Vec3::X);
        assert_eq!(scene.get(&long).expect("entity").transform.position, Vec3::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn fixed_rate_consumes_samples_by_elapsed_time() {
        let mut scene = scene();
        let id = scene.spawn_animated(
            EntityKind::AnimatedPoint,
            Trajectory::from_points(&[[0.0; 3], [1.0; 3], [2.0; 3], [3.0; 3]]),
            PALETTE[0],
            None,
        );
        let mut scheduler = PlaybackScheduler::new(PlaybackPacing::FixedRate {
            interval: Duration::from_millis(50),
        });

        assert_eq!(scheduler.advance(&mut scene, Duration::from_millis(30)), 0);
        assert_eq!(scheduler.advance(&mut scene, Duration::from_millis(30)), 1);
        assert_eq!(scheduler.advance(&mut scene, Duration::from_millis(100)), 2);
        assert_eq!(scene.get(&id).expect("entity").playback_cursor(), 3);
        assert_eq!(scheduler.advance(&mut scene, Duration::from_secs(1)), 1);
        assert!(PlaybackScheduler::is_idle(&scene));
    }

    #[test]
    fn per_tick_pacing_ignores_elapsed_time() {
        let mut scene = scene();
        scene.spawn_animated(
            EntityKind::AnimatedPoint,
            Trajectory::from_points(&[[0.0; 3], [1.0; 3]]),
            PALETTE[0],
            None,
        );
        let mut scheduler = PlaybackScheduler::default();
        assert_eq!(scheduler.advance(&mut scene, Duration::from_secs(10)), 1);
    }
}
