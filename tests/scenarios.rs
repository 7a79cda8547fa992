mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arcor_sync_core::model::{NamedOrientation, ObjectCapability};
use arcor_sync_core::{
    ConnectionEvent, EditorState, Flag, IntentOutcome, Orientation, PositionTarget,
    PresentationAdapter, ProjectApply, ProjectEvent, SceneEvent, ServerEvent, SyncError,
    Vector3D,
};
use async_trait::async_trait;
use common::{context, object, point, project, scene, MockGateway};

fn at(x: f32) -> PositionTarget {
    PositionTarget::Explicit(Vector3D::new(x, 0.0, 0.0))
}

fn orientation(id: &str, name: &str) -> NamedOrientation {
    NamedOrientation {
        id: id.into(),
        name: name.into(),
        orientation: Orientation::identity(),
    }
}

/// Connected, object types known, scene `s1` with a box and a robot loaded.
async fn ready(ctx: &arcor_sync_core::AppContext) {
    let handle = ctx.handle();
    handle.connected().await.expect("connect");
    handle.set_object_types_ready(true).await;
    handle
        .apply_event(ServerEvent::SceneChanged(Some(scene(
            "s1",
            vec![
                object("box", ObjectCapability::Plain),
                object("robot", ObjectCapability::Robot),
            ],
        ))))
        .await;
}

#[tokio::test]
async fn connecting_refreshes_lists() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    let mut connection = ctx.events().subscribe_connection();

    ctx.handle().connecting("ws://localhost:6789").await;
    ctx.handle().connected().await.unwrap();

    assert_eq!(ctx.handle().state().await, EditorState::MainScreen);
    assert_eq!(gateway.count("load_scenes"), 1);
    assert_eq!(gateway.count("load_projects"), 1);
    let scenes = ctx.handle().read(|r| r.scenes().len()).await;
    assert_eq!(scenes, 1);

    let events = connection.drain();
    assert!(events.contains(&ConnectionEvent::StateChanged(EditorState::MainScreen)));
    assert!(events.contains(&ConnectionEvent::ScenesListed));
    assert_eq!(ctx.loading().depth(), 0);
}

#[tokio::test]
async fn project_ahead_of_scene_opens_once_scene_is_ready() {
    let gateway = MockGateway::new();
    let ctx = context(gateway);
    let handle = ctx.handle();
    handle.connected().await.unwrap();
    handle.set_object_types_ready(true).await;
    let mut projects = ctx.events().subscribe_project();

    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap0", None)],
        ))))
        .await;
    assert_eq!(handle.state().await, EditorState::MainScreen);
    assert!(projects.drain().is_empty());

    handle
        .apply_event(ServerEvent::SceneChanged(Some(scene("s1", vec![]))))
        .await;
    assert_eq!(handle.state().await, EditorState::ProjectEditor);
    let events = projects.drain();
    assert!(events.contains(&ProjectEvent::ActionPointAdded("ap0".into())));
    assert_eq!(
        events.last(),
        Some(&ProjectEvent::Opened {
            project_id: "p1".into()
        })
    );
}

#[tokio::test]
async fn replayed_snapshots_are_silent() {
    let ctx = context(MockGateway::new());
    ready(&ctx).await;
    let handle = ctx.handle();
    let p = project("p1", "s1", vec![point("ap0", Some("box")), point("ap1", Some("ap0"))]);
    handle
        .apply_event(ServerEvent::ProjectChanged(Some(p.clone())))
        .await;

    let mut scenes = ctx.events().subscribe_scene();
    let mut projects = ctx.events().subscribe_project();
    handle
        .apply_event(ServerEvent::SceneChanged(Some(scene(
            "s1",
            vec![
                object("box", ObjectCapability::Plain),
                object("robot", ObjectCapability::Robot),
            ],
        ))))
        .await;
    handle.apply_event(ServerEvent::ProjectChanged(Some(p))).await;

    assert!(scenes.drain().is_empty());
    assert!(projects.drain().is_empty());
    assert_eq!(handle.state().await, EditorState::ProjectEditor);
}

#[tokio::test]
async fn orientation_lookup_falls_back_to_parent_point() {
    let ctx = context(MockGateway::new());
    ready(&ctx).await;
    let mut ap0 = point("ap0", None);
    ap0.orientations.push(orientation("o1", "grip"));
    ctx.handle()
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![ap0, point("ap1", Some("ap0"))],
        ))))
        .await;

    let first = ctx.handle().first_orientation("ap1").await.unwrap();
    assert_eq!(first.id, "o1");
    assert!(ctx.handle().poses("ap1").await.unwrap().is_empty());
    assert!(matches!(
        ctx.handle().default_pose("ap0").await,
        Err(SyncError::ItemNotFound(_))
    ));
    assert!(matches!(
        ctx.handle().first_joints("ap1", None, false).await,
        Err(SyncError::NotFound { .. })
    ));
}

#[tokio::test]
async fn default_names_fill_the_next_free_slot() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    let mut ap = point("ap", None);
    ap.orientations.push(orientation("o1", "default"));
    ap.orientations.push(orientation("o2", "default_1"));
    ctx.handle()
        .apply_event(ServerEvent::ProjectChanged(Some(project("p1", "s1", vec![ap]))))
        .await;

    let added = ctx
        .handle()
        .add_orientation("ap", None, Orientation::identity())
        .await
        .unwrap();
    assert_eq!(added.name, "default_2");
    assert_eq!(gateway.count("add_action_point_orientation"), 1);

    let name = ctx.handle().add_joints("ap", "robot", None).await.unwrap();
    assert_eq!(name, "default_3");

    let err = ctx
        .handle()
        .add_orientation("ap", Some("default_1".into()), Orientation::identity())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NameCollision { .. }));
    assert_eq!(gateway.count("add_action_point_orientation"), 1);
}

#[tokio::test]
async fn refused_orientation_is_withdrawn() {
    let gateway = MockGateway::new();
    gateway.fail("add_action_point_orientation", "action point is locked");
    let ctx = context(gateway);
    ready(&ctx).await;
    ctx.handle()
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;

    let err = ctx
        .handle()
        .add_orientation("ap", None, Orientation::identity())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RequestFailed { .. }));
    let count = ctx
        .handle()
        .read(|r| r.store().action_point("ap").map(|ap| ap.orientations.len()))
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn locked_point_rejects_updates_without_a_round_trip() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    let handle = ctx.handle();
    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;
    handle
        .apply_event(ServerEvent::ObjectLocked {
            id: "ap".into(),
            owner: "other-tablet".into(),
        })
        .await;

    let err = handle
        .update_action_point_position("ap", at(1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Locked { .. }));
    assert!(gateway.positions().is_empty());
    assert!(matches!(
        handle.remove_action_point("ap").await,
        Err(SyncError::Locked { .. })
    ));
    assert_eq!(ctx.loading().depth(), 0);

    handle
        .apply_event(ServerEvent::ObjectLocked {
            id: "ap".into(),
            owner: "tablet".into(),
        })
        .await;
    assert_eq!(
        handle.update_action_point_position("ap", at(1.0)).await.unwrap(),
        IntentOutcome::Sent
    );
}

#[tokio::test]
async fn parked_updates_collapse_to_the_latest() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    let handle = ctx.handle().clone();
    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;

    let gate = gateway.hold("update_action_point_position");
    let first = tokio::spawn({
        let handle = handle.clone();
        async move { handle.update_action_point_position("ap", at(1.0)).await }
    });
    gateway.called("update_action_point_position").await;
    assert!(ctx.loading().is_visible());

    assert_eq!(
        handle.update_action_point_position("ap", at(2.0)).await.unwrap(),
        IntentOutcome::Queued
    );
    assert_eq!(
        handle.update_action_point_position("ap", at(3.0)).await.unwrap(),
        IntentOutcome::Queued
    );
    gate.notify_one();

    assert_eq!(first.await.unwrap().unwrap(), IntentOutcome::Sent);
    let sent: Vec<_> = gateway.positions().into_iter().map(|(_, t)| t).collect();
    assert_eq!(sent, vec![at(1.0), at(3.0)]);
    let position = handle
        .read(|r| r.store().action_point("ap").map(|ap| ap.position))
        .await
        .unwrap();
    assert_eq!(position, Vector3D::new(3.0, 0.0, 0.0));
    assert_eq!(ctx.loading().depth(), 0);
}

#[tokio::test]
async fn failure_for_a_removed_point_is_dropped() {
    let gateway = MockGateway::new();
    gateway.fail("update_action_point_position", "no such action point");
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    let handle = ctx.handle().clone();
    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;

    let gate = gateway.hold("update_action_point_position");
    let update = tokio::spawn({
        let handle = handle.clone();
        async move { handle.update_action_point_position("ap", at(1.0)).await }
    });
    gateway.called("update_action_point_position").await;

    handle
        .apply_event(ServerEvent::ActionPointRemoved("ap".into()))
        .await;
    gate.notify_one();

    assert_eq!(update.await.unwrap().unwrap(), IntentOutcome::Sent);
    assert!(!handle.read(|r| r.store().contains("ap")).await);
    assert_eq!(ctx.loading().depth(), 0);
}

#[tokio::test]
async fn parked_update_dies_with_its_point() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    let handle = ctx.handle().clone();
    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;

    let gate = gateway.hold("update_action_point_position");
    let first = tokio::spawn({
        let handle = handle.clone();
        async move { handle.update_action_point_position("ap", at(1.0)).await }
    });
    gateway.called("update_action_point_position").await;
    assert_eq!(
        handle.update_action_point_position("ap", at(2.0)).await.unwrap(),
        IntentOutcome::Queued
    );

    handle
        .apply_event(ServerEvent::ActionPointRemoved("ap".into()))
        .await;
    gate.notify_one();

    assert_eq!(first.await.unwrap().unwrap(), IntentOutcome::Sent);
    assert_eq!(gateway.count("update_action_point_position"), 1);

    // The same id pushed again starts with a clean slate.
    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;
    assert_eq!(
        handle.update_action_point_position("ap", at(4.0)).await.unwrap(),
        IntentOutcome::Sent
    );
    assert_eq!(gateway.count("update_action_point_position"), 2);
}

#[tokio::test]
async fn abandoned_update_still_completes() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    let handle = ctx.handle().clone();
    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;

    let gate = gateway.hold("update_action_point_position");
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        handle.update_action_point_position("ap", at(1.0)),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(
        handle.update_action_point_position("ap", at(2.0)).await.unwrap(),
        IntentOutcome::Queued
    );

    gate.notify_one();
    tokio::time::timeout(Duration::from_secs(5), async {
        while gateway.count("update_action_point_position") < 2 || ctx.loading().is_visible() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("parked update was never sent");

    let sent: Vec<_> = gateway.positions().into_iter().map(|(_, t)| t).collect();
    assert_eq!(sent, vec![at(1.0), at(2.0)]);
    assert_eq!(
        handle.update_action_point_position("ap", at(3.0)).await.unwrap(),
        IntentOutcome::Sent
    );
}

#[tokio::test]
async fn slow_entity_does_not_hold_up_another() {
    let gateway = MockGateway::new();
    gateway.delay("update_action_object_position", Duration::from_millis(200));
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    let handle = ctx.handle().clone();
    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;

    let slow = tokio::spawn({
        let handle = handle.clone();
        async move { handle.update_action_object_position("box", at(5.0)).await }
    });
    gateway.called("update_action_object_position").await;

    assert_eq!(
        handle.update_action_point_position("ap", at(2.0)).await.unwrap(),
        IntentOutcome::Sent
    );
    assert!(!slow.is_finished());
    assert!(ctx.loading().is_visible());

    assert_eq!(slow.await.unwrap().unwrap(), IntentOutcome::Sent);
    let position = handle
        .read(|r| r.store().action_object("box").map(|o| o.pose.position))
        .await
        .unwrap();
    assert_eq!(position, Vector3D::new(5.0, 0.0, 0.0));
    assert_eq!(ctx.loading().depth(), 0);
}

#[tokio::test]
async fn failed_update_restores_position() {
    let gateway = MockGateway::new();
    gateway.fail("update_action_object_position", "object is being moved");
    let ctx = context(gateway);
    ready(&ctx).await;
    let handle = ctx.handle();
    let mut scenes = ctx.events().subscribe_scene();

    let err = handle
        .update_action_object_position("box", at(5.0))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RequestFailed { ref operation, .. } if operation == "update_action_object_position"));

    let position = handle
        .read(|r| r.store().action_object("box").map(|o| o.pose.position))
        .await
        .unwrap();
    assert_eq!(position, Vector3D::zero());
    let updates = scenes
        .drain()
        .into_iter()
        .filter(|e| *e == SceneEvent::ActionObjectUpdated("box".into()))
        .count();
    assert_eq!(updates, 2);
    assert_eq!(ctx.loading().depth(), 0);
}

#[tokio::test]
async fn answer_after_disconnect_is_discarded() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    let handle = ctx.handle().clone();
    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;

    let gate = gateway.hold("update_action_point_position");
    let pending = tokio::spawn({
        let handle = handle.clone();
        async move { handle.update_action_point_position("ap", at(1.0)).await }
    });
    gateway.called("update_action_point_position").await;

    handle.connection_lost().await;
    gate.notify_one();

    assert!(matches!(
        pending.await.unwrap(),
        Err(SyncError::Disconnected)
    ));
    assert_eq!(handle.state().await, EditorState::Disconnected);
    assert!(handle.read(|r| r.store().is_empty()).await);
    assert_eq!(ctx.loading().depth(), 0);
}

#[tokio::test]
async fn closing_the_scene_drops_a_buffered_project() {
    let ctx = context(MockGateway::new());
    ready(&ctx).await;
    let handle = ctx.handle();

    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project("p2", "s2", vec![]))))
        .await;
    assert!(handle.read(|r| r.buffered_project().is_some()).await);

    handle.apply_event(ServerEvent::SceneChanged(None)).await;
    assert_eq!(handle.state().await, EditorState::MainScreen);
    handle
        .apply_event(ServerEvent::SceneChanged(Some(scene("s2", vec![]))))
        .await;
    assert_eq!(handle.state().await, EditorState::SceneEditor);
    assert!(handle.read(|r| r.store().project().is_none()).await);
}

#[tokio::test]
async fn new_project_needs_a_name() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ctx.handle().connected().await.unwrap();

    let err = ctx.handle().new_project("", "s1", true).await.unwrap_err();
    match err {
        SyncError::RequestFailed { messages, .. } => {
            assert_eq!(messages, vec!["Project name not specified".to_string()])
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(gateway.count("update_project"), 0);

    let outcome = ctx.handle().new_project("p9", "s1", false).await.unwrap();
    assert_eq!(outcome, ProjectApply::Buffered);
    assert_eq!(gateway.count("open_scene"), 1);
}

#[tokio::test]
async fn new_scene_rejects_listed_names() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ctx.handle().connected().await.unwrap();
    ctx.handle().set_object_types_ready(true).await;

    assert!(!ctx.handle().new_scene("").await.unwrap());
    assert!(!ctx.handle().new_scene("s1").await.unwrap());
    assert!(ctx.handle().new_scene("fresh").await.unwrap());
    assert_eq!(gateway.count("update_scene"), 1);
    assert_eq!(ctx.handle().state().await, EditorState::SceneEditor);
}

#[tokio::test]
async fn scene_objects_get_uuids_and_roll_back_on_refusal() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ready(&ctx).await;

    let created = ctx
        .handle()
        .add_object_to_scene("Box", None)
        .await
        .unwrap();
    assert_eq!(created.id.len(), 36);
    assert_eq!(created.pose.orientation, Orientation::identity());

    gateway.fail("add_object_to_scene", "unknown type");
    let before = ctx.handle().read(|r| r.store().len()).await;
    assert!(ctx
        .handle()
        .add_object_to_scene("Unknown", Some("ghost".into()))
        .await
        .is_err());
    assert_eq!(ctx.handle().read(|r| r.store().len()).await, before);
}

#[tokio::test]
async fn removing_a_scene_object_takes_its_points() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    let handle = ctx.handle();
    handle
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap0", Some("box")), point("ap1", Some("ap0")), point("free", None)],
        ))))
        .await;

    handle.remove_from_scene("box").await.unwrap();
    let remaining: Vec<String> = handle
        .read(|r| r.store().action_points().map(|ap| ap.id.clone()).collect())
        .await;
    assert_eq!(remaining, vec!["free".to_string()]);
}

#[tokio::test]
async fn robot_events_need_a_robot() {
    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    use arcor_sync_core::RobotEventKind;

    assert!(ctx
        .handle()
        .register_for_robot_event("box", true, RobotEventKind::Joints)
        .await
        .is_err());
    ctx.handle()
        .register_for_robot_event("robot", true, RobotEventKind::EefPose)
        .await
        .unwrap();
    assert_eq!(gateway.count("register_for_robot_event"), 1);
}

#[tokio::test]
async fn pushed_project_keeps_one_wiring_per_action() {
    use arcor_sync_core::model::{ActionData, ActionIo};

    let gateway = MockGateway::new();
    let ctx = context(gateway.clone());
    ready(&ctx).await;
    let mut ap = point("ap", Some("box"));
    ap.actions.push(ActionData {
        id: "a1".into(),
        name: "pick".into(),
        action_type: "robot/pick".into(),
        parameters: vec![],
        inputs: vec![ActionIo::to("start"), ActionIo::to("a0")],
        outputs: vec![ActionIo::to("end")],
    });
    ctx.handle()
        .apply_event(ServerEvent::ProjectChanged(Some(project("p1", "s1", vec![ap]))))
        .await;

    let snapshot = ctx
        .handle()
        .read(|r| r.project_snapshot())
        .await
        .unwrap();
    let action = &snapshot.objects[0].action_points[0].actions[0];
    assert_eq!(action.inputs, vec![ActionIo::to("start")]);
    assert_eq!(action.outputs.len(), 1);

    ctx.handle().push_project().await.unwrap();
    assert_eq!(gateway.count("update_project"), 1);
}

#[tokio::test]
async fn flags_are_scoped_to_the_open_project() {
    let ctx = context(MockGateway::new());
    ready(&ctx).await;
    assert!(matches!(
        ctx.set_action_point_flag("ap", Flag::Locked, true).await,
        Err(SyncError::InvalidState { .. })
    ));

    ctx.handle()
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;
    assert!(!ctx.action_point_flag("ap", Flag::Locked).await.unwrap());
    assert!(ctx
        .action_point_flag("ap", Flag::OrientationsVisible)
        .await
        .unwrap());
    ctx.set_action_point_flag("ap", Flag::Locked, true)
        .await
        .unwrap();
    assert!(ctx.action_point_flag("ap", Flag::Locked).await.unwrap());
    assert!(ctx.flags().action_point_flag("p1", "ap", Flag::Locked));

    ctx.set_action_object_flag("box", Flag::OrientationsVisible, false)
        .await
        .unwrap();
    assert!(!ctx
        .action_object_flag("box", Flag::OrientationsVisible)
        .await
        .unwrap());
    assert!(!ctx
        .flags()
        .action_object_flag("p1", "box", Flag::OrientationsVisible));
}

#[derive(Default)]
struct Recorder {
    scene: Mutex<Vec<SceneEvent>>,
    project: Mutex<Vec<ProjectEvent>>,
}

#[async_trait]
impl PresentationAdapter for Recorder {
    async fn on_scene_event(&self, event: &SceneEvent) {
        self.scene.lock().unwrap().push(event.clone());
    }

    async fn on_project_event(&self, event: &ProjectEvent) {
        self.project.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn presentation_adapter_sees_published_events() {
    let mut ctx = context(MockGateway::new());
    let recorder = Arc::new(Recorder::default());
    ctx.attach_presentation(recorder.clone());

    ready(&ctx).await;
    ctx.handle()
        .apply_event(ServerEvent::ProjectChanged(Some(project(
            "p1",
            "s1",
            vec![point("ap", None)],
        ))))
        .await;

    let loaded = SceneEvent::Loaded {
        scene_id: "s1".into(),
    };
    let opened = ProjectEvent::Opened {
        project_id: "p1".into(),
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let seen_scene = recorder.scene.lock().unwrap().contains(&loaded);
            let seen_project = recorder.project.lock().unwrap().contains(&opened);
            if seen_scene && seen_project {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("adapter never saw the scene and project open");

    ctx.shutdown().unwrap();
}
