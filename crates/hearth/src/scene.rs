//! Demo scene: a static hub, orbiters circling it, and an emitter that
//! spawns short-lived sparks through deferred commands.

use hearth_core::{Component, Entity, EntityIds, Quat, Transform, UpdateContext};

/// Local transform of an orbiter `radius` units from its parent at `angle`.
#[must_use]
pub fn orbit_transform(radius: f32, angle: f32) -> Transform {
    Transform::from_xyz(radius * angle.cos(), radius * angle.sin(), 0.0).with_rotation(Quat::from_rotation_z(angle))
}

/// Circles its entity around the parent, one step per frame.
#[derive(Debug)]
pub struct Orbit {
    /// Distance from the parent.
    pub radius: f32,
    /// Radians per second.
    pub speed: f32,
    /// Current angle.
    pub angle: f32,
}

impl Component for Orbit {
    fn update(&mut self, ctx: &mut UpdateContext<'_>) {
        self.angle = (self.angle + self.speed * ctx.dt) % std::f32::consts::TAU;
        ctx.commands
            .set_local_transform(ctx.entity, orbit_transform(self.radius, self.angle));
    }
}

/// Deletes its entity after a number of frames.
#[derive(Debug)]
pub struct Lifetime {
    /// Frames left.
    pub remaining: u32,
}

impl Component for Lifetime {
    fn update(&mut self, ctx: &mut UpdateContext<'_>) {
        if self.remaining == 0 {
            return;
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            // Root is never a spark, so this cannot fail.
            let _ = ctx.commands.delete_entity(ctx.entity);
        }
    }
}

/// Marker for spawned sparks.
#[derive(Debug)]
pub struct Spark;

impl Component for Spark {}

/// Spawns a spark below its entity every `interval` frames.
pub struct Emitter {
    ids: EntityIds,
    interval: u64,
    lifetime: u32,
}

impl Component for Emitter {
    fn update(&mut self, ctx: &mut UpdateContext<'_>) {
        if ctx.frame % self.interval != 0 {
            return;
        }
        let spark = self
            .ids
            .spawn()
            .with_transform(Transform::from_xyz(0.0, 1.0, 0.0))
            .with_component(Spark)
            .with_component(Lifetime {
                remaining: self.lifetime,
            });
        let _ = ctx.commands.add_entity_to(spark, ctx.entity);
    }
}

/// Builds the hub subtree. Sparks appear under the first orbiter.
pub fn build_hub(ids: &EntityIds, orbiters: u32) -> Entity {
    let mut hub = ids.spawn().with_static(true);

    for i in 0..orbiters {
        let angle = i as f32 / orbiters.max(1) as f32 * std::f32::consts::TAU;
        let radius = 5.0 + i as f32;
        let mut orbiter = ids
            .spawn()
            .with_transform(orbit_transform(radius, angle))
            .with_component(Orbit {
                radius,
                speed: 1.0 + i as f32 * 0.25,
                angle,
            });
        if i == 0 {
            orbiter.add_component(Emitter {
                ids: ids.clone(),
                interval: 15,
                lifetime: 40,
            });
        }
        hub.add_child(orbiter);
    }
    hub
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::FrameScheduler;

    #[test]
    fn test_hub_layout() {
        let ids = EntityIds::new();
        let hub = build_hub(&ids, 4);
        assert!(hub.is_static());
        assert_eq!(hub.children().len(), 4);
        assert_eq!(hub.children()[0].components().len(), 2);
        assert_eq!(hub.subtree_ids().len(), 5);
    }

    #[test]
    fn test_orbit_moves_its_entity() {
        let mut engine = FrameScheduler::default();
        let orbiter = engine.ids().spawn().with_transform(orbit_transform(2.0, 0.0)).with_component(Orbit {
            radius: 2.0,
            speed: std::f32::consts::PI,
            angle: 0.0,
        });
        let id = orbiter.id();
        engine.commands().add_entity(orbiter).unwrap();

        engine.tick(0.5).unwrap();
        let start = engine.scene().world_transform(id).unwrap().translation();
        assert!((start.x - 2.0).abs() < 1e-5);

        // The move queued in frame 1 is applied and frozen in frame 2.
        engine.tick(0.5).unwrap();
        let frozen = engine.frozen_transforms();
        let moved = frozen.read_handle().get(id).unwrap().translation();
        assert!(moved.x.abs() < 1e-5);
        assert!((moved.y - 2.0).abs() < 1e-5);
    }
}
