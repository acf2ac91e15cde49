use std::{fs, sync::Arc, thread};

use hotswap_content::{
    document,
    scene::{Action, Collection, Constraint, InputValue, Material, NodeTree, Object, ObjectData},
    staleness::{check_all, check_asset},
    AssetLoader, Error, FileLibrary, LoadTarget, LoadedAsset, RelinkEngine, RelinkResult, Scene, SharedScene, Uid,
};
use hotswap_shared::parking_lot::Mutex;
use hotswap_test::{setup_logger, spectral::assert_that, test_library, TestLibrary, CHAIR_LIBRARY, LAMP_LIBRARY};

fn load_chair(library: &TestLibrary, scene: &mut Scene) -> LoadedAsset {
    library.write_source("props/chair.yaml", CHAIR_LIBRARY);
    let descriptor = library.write_descriptor("chair.ini", "props/chair.yaml", "collections", "Chair");
    AssetLoader::new(Arc::new(FileLibrary), library.library_root())
        .load_descriptor(scene, &descriptor, LoadTarget::SceneRoot)
        .unwrap()
}

fn tint(scene: &Scene, material: &str) -> InputValue {
    let wood = scene.find::<Material>(material).unwrap();
    let tree = scene.get(wood).unwrap().node_tree.unwrap();
    let paint = scene.get(tree).unwrap().node("Paint").unwrap();
    paint.input("Tint").unwrap().value
}

fn set_tint(scene: &mut Scene, material: &str, value: InputValue) {
    let wood = scene.find::<Material>(material).unwrap();
    let tree = scene.get(wood).unwrap().node_tree.unwrap();
    let tree = scene.get_mut(tree).unwrap();
    let paint = tree.nodes.iter_mut().find(|node| node.name == "Paint").unwrap();
    paint.input_mut("Tint").unwrap().value = value;
}

fn constraint_names(scene: &Scene, object: &str) -> Vec<String> {
    let object = scene.find::<Object>(object).unwrap();
    scene
        .get(object)
        .unwrap()
        .constraints
        .iter()
        .map(|constraint| constraint.name.clone())
        .collect()
}

/// Prepares the local modifications that a relink has to keep.
fn modify_chair(scene: &mut Scene) {
    let rig = scene.find::<Object>("Rig").unwrap();
    let seat = scene.find::<Object>("Seat").unwrap();
    let rig = scene.get_mut(rig).unwrap();
    rig.constraints.push(Constraint::new("IK_Extra", "IK").with_target(seat));
    rig.transform.location = [2.0, 0.0, 0.0];
    rig.transform.rotation_euler = [1.0, 0.0, 0.0];
    scene.get_mut(seat).unwrap().transform.scale = [0.5; 3];
    set_tint(scene, "Wood", InputValue::Color([0.1, 0.2, 0.3, 1.0]));
}

#[test]
fn relink_keeps_local_modifications() {
    setup_logger();
    let library = test_library!();
    let mut scene = Scene::new();
    let loaded = load_chair(&library, &mut scene);
    modify_chair(&mut scene);
    let rig_action = scene.find::<Action>("RigAction").unwrap();
    let wood_action = scene.find::<Action>("WoodAction").unwrap();

    library.bump_modified(&library.library_root().join("props/chair.yaml"));
    assert!(check_asset(&scene, loaded.uid).unwrap());

    let engine = RelinkEngine::new(Arc::new(FileLibrary));
    let result = engine.relink(&mut scene, loaded.uid).unwrap();
    let new_uid = result.new_uid();
    assert_that!(result.warning()).is_equal_to(None);
    assert!(new_uid != loaded.uid);
    assert!(scene.registry().lookup(loaded.uid).is_none());
    assert!(!check_asset(&scene, new_uid).unwrap());
    assert!(check_all(&mut scene).is_empty());

    // The new hierarchy is in place and tagged with the new uid
    let chair = scene.find::<Collection>("Chair").unwrap();
    assert_that!(scene.parent_of_collection(chair)).is_equal_to(Some(scene.root()));
    assert!(scene.get(chair).unwrap().relink.is(new_uid));
    assert!(scene.tagged(loaded.uid).is_empty());

    // Constraints are the import-time ones plus the user-added one, without duplicates
    assert_that!(constraint_names(&scene, "Rig")).is_equal_to(vec!["Copy Location".to_owned(), "IK_Extra".to_owned()]);
    let rig = scene.find::<Object>("Rig").unwrap();
    let seat = scene.find::<Object>("Seat").unwrap();
    let ik = scene.get(rig).unwrap().constraint("IK_Extra").unwrap();
    assert_that!(ik.target).is_equal_to(Some(seat));
    let copy_location = scene.get(rig).unwrap().constraint("Copy Location").unwrap();
    assert_that!(copy_location.target).is_equal_to(Some(seat));

    // Actions are the old ones and are owned by the new uid
    assert_that!(scene.get(rig).unwrap().action).is_equal_to(Some(rig_action));
    assert!(scene.get(rig_action).unwrap().relink.is(new_uid));
    let wood = scene.find::<Material>("Wood").unwrap();
    let tree = scene.get(wood).unwrap().node_tree.unwrap();
    assert_that!(scene.get(tree).unwrap().action).is_equal_to(Some(wood_action));
    assert_that!(scene.count::<Action>()).is_equal_to(2);

    // Transforms are kept unless an action drives them
    let rig = scene.get(rig).unwrap();
    assert_that!(rig.transform.location).is_equal_to([2.0, 0.0, 0.0]);
    assert_that!(rig.transform.rotation_euler).is_equal_to([0.0; 3]);
    assert_that!(scene.get(seat).unwrap().transform.scale).is_equal_to([0.5; 3]);

    assert_that!(tint(&scene, "Wood")).is_equal_to(InputValue::Color([0.1, 0.2, 0.3, 1.0]));
}

#[test]
fn repeated_relinks_are_stable() {
    let library = test_library!();
    let mut scene = Scene::new();
    let loaded = load_chair(&library, &mut scene);
    modify_chair(&mut scene);
    let engine = RelinkEngine::new(Arc::new(FileLibrary));

    let first = engine.relink(&mut scene, loaded.uid).unwrap();
    let seat = scene.find::<Object>("Seat").unwrap();
    let transform = scene.get(seat).unwrap().transform;
    let constraints = constraint_names(&scene, "Rig");
    let action = scene.get(scene.find::<Object>("Rig").unwrap()).unwrap().action;

    let second = engine.relink(&mut scene, first.new_uid()).unwrap();
    assert_that!(second.warning()).is_equal_to(None);
    let seat = scene.find::<Object>("Seat").unwrap();
    assert_that!(scene.get(seat).unwrap().transform).is_equal_to(transform);
    assert_that!(constraint_names(&scene, "Rig")).is_equal_to(constraints);
    assert_that!(scene.get(scene.find::<Object>("Rig").unwrap()).unwrap().action).is_equal_to(action);
    assert_that!(tint(&scene, "Wood")).is_equal_to(InputValue::Color([0.1, 0.2, 0.3, 1.0]));
    assert_that!(scene.registry().len()).is_equal_to(1);
    assert_that!(scene.count::<Object>()).is_equal_to(3);
}

fn bone_constraint_names(scene: &Scene, object: &str, bone: &str) -> Vec<String> {
    let object = scene.find::<Object>(object).unwrap();
    scene
        .get(object)
        .unwrap()
        .pose_bone(bone)
        .unwrap()
        .constraints
        .iter()
        .map(|constraint| constraint.name.clone())
        .collect()
}

fn add_bone_constraint(scene: &mut Scene, object: &str, bone: &str, constraint: Constraint) {
    let object = scene.find::<Object>(object).unwrap();
    let object = scene.get_mut(object).unwrap();
    let bone = object.pose_bones.iter_mut().find(|candidate| candidate.name == bone).unwrap();
    bone.constraints.push(constraint);
}

#[test]
fn second_instance_keeps_local_modifications() {
    setup_logger();
    let library = test_library!();
    let mut scene = Scene::new();
    let first = load_chair(&library, &mut scene);
    let second = load_chair(&library, &mut scene);
    assert_that!(second.name).is_equal_to("Chair.001".to_owned());

    let rig = scene.find::<Object>("Rig.001").unwrap();
    let seat = scene.find::<Object>("Seat.001").unwrap();
    let action = scene.get(rig).unwrap().action;
    let rig = scene.get_mut(rig).unwrap();
    rig.constraints.push(Constraint::new("IK_Extra", "IK").with_target(seat));
    rig.transform.location = [7.0, 0.0, 0.0];
    set_tint(&mut scene, "Wood.001", InputValue::Color([0.1, 0.2, 0.3, 1.0]));

    let engine = RelinkEngine::new(Arc::new(FileLibrary));
    let result = engine.relink(&mut scene, second.uid).unwrap();
    assert_that!(result.warning()).is_equal_to(None);

    let rig = scene.find::<Object>("Rig.001").unwrap();
    let seat = scene.find::<Object>("Seat.001").unwrap();
    assert!(scene.get(rig).unwrap().relink.is(result.new_uid()));
    assert_that!(constraint_names(&scene, "Rig.001")).is_equal_to(vec!["Copy Location".to_owned(), "IK_Extra".to_owned()]);
    let ik = scene.get(rig).unwrap().constraint("IK_Extra").unwrap();
    assert_that!(ik.target).is_equal_to(Some(seat));
    assert_that!(scene.get(rig).unwrap().transform.location).is_equal_to([7.0, 0.0, 0.0]);
    assert_that!(scene.get(rig).unwrap().action).is_equal_to(action);
    assert_that!(tint(&scene, "Wood.001")).is_equal_to(InputValue::Color([0.1, 0.2, 0.3, 1.0]));

    // The first instance is untouched
    assert!(scene.registry().lookup(first.uid).is_some());
    assert_that!(constraint_names(&scene, "Rig")).is_equal_to(vec!["Copy Location".to_owned()]);
    assert_that!(tint(&scene, "Wood")).is_equal_to(InputValue::Color([0.8, 0.5, 0.2, 1.0]));
    assert_that!(scene.count::<Object>()).is_equal_to(6);
}

#[test]
fn bone_constraints_survive_relinks() {
    let library = test_library!();
    let mut scene = Scene::new();
    let loaded = load_chair(&library, &mut scene);
    add_bone_constraint(&mut scene, "Rig", "Spine", Constraint::new("Bend", "DAMPED_TRACK"));

    let engine = RelinkEngine::new(Arc::new(FileLibrary));
    let first = engine.relink(&mut scene, loaded.uid).unwrap();
    assert_that!(first.warning()).is_equal_to(None);
    let expected = vec!["Limit Rotation".to_owned(), "Bend".to_owned()];
    assert_that!(bone_constraint_names(&scene, "Rig", "Spine")).is_equal_to(expected.clone());

    let second = engine.relink(&mut scene, first.new_uid()).unwrap();
    assert_that!(second.warning()).is_equal_to(None);
    assert_that!(bone_constraint_names(&scene, "Rig", "Spine")).is_equal_to(expected);
}

#[test]
fn lost_bones_are_reported() {
    let library = test_library!();
    let mut scene = Scene::new();
    let loaded = load_chair(&library, &mut scene);
    add_bone_constraint(&mut scene, "Rig", "Spine", Constraint::new("Bend", "DAMPED_TRACK"));

    let without_spine = CHAIR_LIBRARY.replace(
        "    pose_bones:\n      - name: Spine\n        constraints:\n          - { name: Limit Rotation, kind: LIMIT_ROTATION }\n",
        "",
    );
    assert!(!without_spine.contains("Spine"));
    library.write_source("props/chair.yaml", &without_spine);

    let engine = RelinkEngine::new(Arc::new(FileLibrary));
    let result = engine.relink(&mut scene, loaded.uid).unwrap();
    let RelinkResult::Warning { reason, .. } = result else {
        panic!("expected a warning");
    };
    assert!(reason.contains("The bone 'Spine' of 'Rig' no longer exists"));

    let rig = scene.find::<Object>("Rig").unwrap();
    assert!(scene.get(rig).unwrap().pose_bones.is_empty());
    assert_that!(constraint_names(&scene, "Rig")).is_equal_to(vec!["Copy Location".to_owned()]);
}

#[test]
fn lost_targets_are_reported() {
    let library = test_library!();
    let mut scene = Scene::new();
    let loaded = load_chair(&library, &mut scene);
    let rig = scene.find::<Object>("Rig").unwrap();
    let legs = scene.find::<Object>("Legs").unwrap();
    scene
        .get_mut(rig)
        .unwrap()
        .constraints
        .push(Constraint::new("Track Legs", "TRACK_TO").with_target(legs));

    let without_legs = CHAIR_LIBRARY
        .replace("objects: [Rig, Legs]", "objects: [Rig]")
        .replace("  - name: Legs\n    data: { name: LegsMesh, kind: mesh }\n    materials: [Wood]\n", "");
    library.write_source("props/chair.yaml", &without_legs);

    let engine = RelinkEngine::new(Arc::new(FileLibrary));
    let result = engine.relink(&mut scene, loaded.uid).unwrap();
    let RelinkResult::Warning { reason, .. } = result else {
        panic!("expected a warning");
    };
    assert!(reason.contains("Track Legs"));
    assert!(reason.contains("'Legs' no longer exists"));

    let rig = scene.find::<Object>("Rig").unwrap();
    let track = scene.get(rig).unwrap().constraint("Track Legs").unwrap();
    assert_that!(track.target).is_equal_to(None);
    assert!(scene.find::<Object>("Legs").is_none());
}

#[test]
fn outside_constraints_follow_the_new_objects() {
    let library = test_library!();
    let mut scene = Scene::new();
    let loaded = load_chair(&library, &mut scene);
    let seat = scene.find::<Object>("Seat").unwrap();
    let camera = scene.add(Object::new("Camera", ObjectData::default()));
    scene.link_object(scene.root(), camera);
    scene
        .get_mut(camera)
        .unwrap()
        .constraints
        .push(Constraint::new("Track Seat", "TRACK_TO").with_target(seat));

    let engine = RelinkEngine::new(Arc::new(FileLibrary));
    engine.relink(&mut scene, loaded.uid).unwrap();

    let new_seat = scene.find::<Object>("Seat").unwrap();
    assert!(new_seat != seat);
    let track = scene.get(camera).unwrap().constraint("Track Seat").unwrap();
    assert_that!(track.target).is_equal_to(Some(new_seat));
}

#[test]
fn relink_after_reopening_the_document() {
    let library = test_library!();
    let mut scene = Scene::new();
    load_chair(&library, &mut scene);
    modify_chair(&mut scene);
    document::save(&mut scene, library.document_path()).unwrap();

    let mut scene = document::load(library.document_path()).unwrap();
    assert!(check_all(&mut scene).is_empty());
    let uid = scene.registry().iter().next().unwrap().uid;
    assert!(!scene.registry().lookup(uid).unwrap().path.contains('\\'));

    let engine = RelinkEngine::new(Arc::new(FileLibrary));
    let result = engine.relink(&mut scene, uid).unwrap();
    assert_that!(result.warning()).is_equal_to(None);
    assert_that!(constraint_names(&scene, "Rig")).is_equal_to(vec!["Copy Location".to_owned(), "IK_Extra".to_owned()]);
    assert_that!(tint(&scene, "Wood")).is_equal_to(InputValue::Color([0.1, 0.2, 0.3, 1.0]));
}

#[test]
fn deleting_an_asset_removes_its_registry_entry() {
    let library = test_library!();
    let mut scene = Scene::new();
    let chair = load_chair(&library, &mut scene);
    library.write_source("lamp.yaml", LAMP_LIBRARY);
    let descriptor = library.write_descriptor("lamp.ini", "lamp.yaml", "objects", "Lamp");
    let lamp = AssetLoader::new(Arc::new(FileLibrary), library.library_root())
        .load_descriptor(&mut scene, &descriptor, LoadTarget::SceneRoot)
        .unwrap();
    assert_that!(scene.registry().len()).is_equal_to(2);

    scene.delete(chair.root);
    assert_that!(scene.registry().len()).is_equal_to(1);
    assert!(scene.registry().lookup(lamp.uid).is_some());
    assert!(scene.find::<Object>("Rig").is_none());
    assert!(scene.find::<NodeTree>("Wood").is_none());
}

#[test]
fn concurrent_relinks_run_once() {
    let library = test_library!();
    let mut scene = Scene::new();
    let loaded = load_chair(&library, &mut scene);
    let scene: SharedScene = Arc::new(Mutex::new(scene));
    let engine = RelinkEngine::new(Arc::new(FileLibrary));

    let results = thread::scope(|scope| {
        let handles = (0..2)
            .map(|_| scope.spawn(|| engine.relink_shared(&scene, loaded.uid)))
            .collect::<Vec<_>>();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect::<Vec<_>>()
    });

    let succeeded = results.iter().filter(|result| result.is_ok()).count();
    assert_that!(succeeded).is_equal_to(1);
    assert!(results
        .iter()
        .any(|result| matches!(result, Err(Error::UnknownAsset(uid)) if *uid == loaded.uid)));

    let scene = scene.lock();
    assert_that!(scene.registry().len()).is_equal_to(1);
    assert_that!(scene.count::<Object>()).is_equal_to(3);
}

#[test]
fn missing_source_fails_forward() {
    let library = test_library!();
    let mut scene = Scene::new();
    let loaded = load_chair(&library, &mut scene);
    fs::remove_file(library.library_root().join("props/chair.yaml")).unwrap();

    let engine = RelinkEngine::new(Arc::new(FileLibrary));
    let result = engine.relink(&mut scene, loaded.uid);
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(scene.registry().lookup(loaded.uid).is_some());
    assert!(matches!(engine.relink(&mut scene, Uid::new()), Err(Error::UnknownAsset(_))));
}
