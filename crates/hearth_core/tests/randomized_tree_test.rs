//! Seeded random add/delete traffic against the scene tree.
//!
//! Whatever order requests arrive in, every entity ever created must end up
//! either live in the tree or released exactly once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hearth_core::{Component, Entity, EntityId, FrameScheduler, SceneTree};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Tracked {
    releases: Arc<AtomicUsize>,
}

impl Component for Tracked {
    fn on_release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn check_tree(scene: &SceneTree) {
    let order = scene.preorder();
    assert_eq!(order[0], EntityId::ROOT);
    assert_eq!(order.len(), scene.len() + 1);

    let unique: HashSet<_> = order.iter().copied().collect();
    assert_eq!(unique.len(), order.len(), "an id appears twice in the tree");

    for &id in &order {
        assert!(scene.contains(id));
        for child in scene.children(id) {
            assert_eq!(scene.parent(child), Some(id));
        }
    }
    assert_eq!(scene.parent(EntityId::ROOT), None);
}

fn run_seed(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut engine = FrameScheduler::default();
    let releases = Arc::new(AtomicUsize::new(0));
    let mut created = 0usize;
    let mut known: Vec<EntityId> = vec![EntityId::ROOT];

    for _ in 0..60 {
        for _ in 0..rng.gen_range(0..12) {
            let target = known[rng.gen_range(0..known.len())];
            if rng.gen_bool(0.65) {
                let id = engine.ids().allocate();
                let entity = Entity::new(id).with_component(Tracked {
                    releases: Arc::clone(&releases),
                });
                created += 1;
                engine.commands().add_entity_to(entity, target).unwrap();
                known.push(id);
            } else if !target.is_root() {
                engine.commands().delete_entity(target).unwrap();
            }
        }

        engine.tick(0.016).unwrap();

        check_tree(engine.scene());
        assert_eq!(
            created,
            engine.scene().len() + releases.load(Ordering::SeqCst),
            "seed {seed}: entity leaked or released twice"
        );
        known.retain(|id| engine.scene().contains(*id) || rng.gen_bool(0.2));
        if known.is_empty() {
            known.push(EntityId::ROOT);
        }
    }

    let remaining = engine.scene_mut().release_all();
    assert_eq!(created, releases.load(Ordering::SeqCst));
    assert!(remaining <= created);
    assert!(engine.scene().is_empty());
}

#[test]
fn test_random_traffic_conserves_entities() {
    for seed in 0..16 {
        run_seed(seed);
    }
}

#[test]
fn test_released_ids_stay_unknown() {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut engine = FrameScheduler::default();
    let mut live = Vec::new();

    for _ in 0..20 {
        let id = engine.ids().allocate();
        engine.commands().add_entity(Entity::new(id)).unwrap();
        live.push(id);
    }
    engine.tick(0.016).unwrap();
    assert_eq!(engine.scene().len(), 20);

    let mut deleted = Vec::new();
    while live.len() > 5 {
        let id = live.swap_remove(rng.gen_range(0..live.len()));
        engine.commands().delete_entity(id).unwrap();
        deleted.push(id);
    }
    engine.tick(0.016).unwrap();

    assert_eq!(engine.scene().len(), 5);
    for id in deleted {
        assert!(!engine.scene().contains(id));
        assert_eq!(engine.scene().parent(id), None);
        assert!(engine.scene().children(id).is_empty());
    }
    check_tree(engine.scene());
}
