use std::sync::Arc;
use std::thread;

use liverpool_memory::{OwnerHandle, RegistryError, ResourceRegistry};
use pretty_assertions::assert_eq;

#[test]
fn unregistering_an_owner_cascades_to_its_resources() {
    let registry = ResourceRegistry::new();
    let game = registry.register_owner("game");
    let system = registry.register_owner("system");

    registry.register_resource(game, 0x1_0000, 0x1000, "vertices", 3, 1).unwrap();
    registry.register_resource(game, 0x2_0000, 0x4000, "texture", 4, 2).unwrap();
    let kept = registry
        .register_resource(system, 0x8_0000, 0x100, "labels", 7, 0)
        .unwrap();

    assert_eq!(registry.unregister_owner_and_resources(game), Ok(2));
    assert_eq!(
        registry.unregister_owner_and_resources(game),
        Err(RegistryError::UnknownOwner(game))
    );

    let owners: Vec<String> = registry.owners().into_iter().map(|o| o.name).collect();
    assert_eq!(owners, vec!["system".to_owned()]);
    let resources = registry.resources();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].handle, kept);
    assert_eq!(resources[0].owner, system);
    assert!(registry.resources_for_owner(game).is_empty());
}

#[test]
fn registry_is_shared_across_threads() {
    let registry = Arc::new(ResourceRegistry::new());
    let owner = registry.register_owner("streaming");

    let workers: Vec<_> = (0..4u64)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..16u64 {
                    registry
                        .register_resource(owner, (t << 20) | (i << 8), 0x100, "chunk", 1, t)
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(registry.resources_for_owner(owner).len(), 64);
    assert_eq!(registry.unregister_all_resources_for_owner(owner), Ok(64));
    assert_eq!(
        registry.unregister_all_resources_for_owner(OwnerHandle(999)),
        Err(RegistryError::UnknownOwner(OwnerHandle(999)))
    );
}
