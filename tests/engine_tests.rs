//! Reference engine behaviour: caching, filtering, placement, frames

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};
    use sim_control::codec::{encode_response, read_message, write_message, MessageKind};
    use sim_control::error::EngineError;
    use sim_control::types::METADATA_HEADROOM;
    use sim_control::{
        protocol::StepResponse, ActionRequest, AgentMode, Engine, EngineConfig, ErrorCode, Event,
    };

    const KITCHEN_OBJECTS: usize = 8;

    fn engine() -> Engine {
        Engine::new(EngineConfig {
            width: 48,
            height: 48,
            ..Default::default()
        })
        .unwrap()
    }

    fn act(engine: &mut Engine, action: &str, params: Value) -> StepResponse {
        let mut req = ActionRequest::new(action);
        if let Value::Object(map) = params {
            for (k, v) in map {
                req = req.with(k, v).unwrap();
            }
        }
        engine.step_action(&req)
    }

    fn ok(response: StepResponse) -> StepResponse {
        assert!(
            response.metadata.last_action_success,
            "{} failed: {}",
            response.metadata.last_action,
            response.metadata.error_message
        );
        response
    }

    fn rejected(response: &StepResponse, code: ErrorCode) {
        assert!(!response.metadata.last_action_success);
        assert_eq!(response.metadata.error_code, Some(code));
    }

    fn failed(response: &StepResponse, fragment: &str) {
        let m = &response.metadata;
        assert!(!m.last_action_success);
        assert_eq!(m.error_code, Some(ErrorCode::ActionFailed));
        assert!(
            m.error_message.contains(fragment),
            "'{}' does not mention '{}'",
            m.error_message,
            fragment
        );
    }

    // -----------------------------------------------------------------------
    // Fast emit
    // -----------------------------------------------------------------------

    #[test]
    fn queries_reuse_the_object_list() {
        let mut e = engine();
        let a = ok(act(&mut e, "Pass", json!({})));
        let b = ok(act(&mut e, "GetSceneBounds", json!({})));
        assert!(b.metadata.fast_emit);
        assert!(Arc::ptr_eq(&a.metadata.objects, &b.metadata.objects));

        ok(act(&mut e, "RotateRight", json!({})));
        let c = ok(act(&mut e, "Pass", json!({})));
        assert!(!Arc::ptr_eq(&b.metadata.objects, &c.metadata.objects));
        assert_eq!(c.metadata.objects.len(), KITCHEN_OBJECTS);
    }

    #[test]
    fn disabled_fast_emit_always_rebuilds() {
        let mut e = engine();
        ok(act(&mut e, "Initialize", json!({"fastActionEmit": false})));
        let a = ok(act(&mut e, "Pass", json!({})));
        let b = ok(act(&mut e, "Pass", json!({})));
        assert!(!b.metadata.fast_emit);
        assert!(!Arc::ptr_eq(&a.metadata.objects, &b.metadata.objects));
        assert_eq!(*a.metadata.objects, *b.metadata.objects);
    }

    // -----------------------------------------------------------------------
    // Object filter
    // -----------------------------------------------------------------------

    #[test]
    fn filter_sets_exact_membership() {
        let mut e = engine();
        let r = ok(act(
            &mut e,
            "SetObjectFilter",
            json!({"objectIds": ["Mug|1", "Apple|1", "Mug|1", "Ghost|9"]}),
        ));
        let mut ids: Vec<_> = r.metadata.objects.iter().map(|o| o.object_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, ["Apple|1", "Mug|1"]);

        let r = ok(act(&mut e, "SetObjectFilter", json!({"objectIds": []})));
        assert!(r.metadata.objects.is_empty());
        assert!(e.session().filter.ids().is_some());

        let r = ok(act(&mut e, "ResetObjectFilter", json!({})));
        assert_eq!(r.metadata.objects.len(), KITCHEN_OBJECTS);
    }

    #[test]
    fn filtered_objects_can_still_be_opened() {
        let mut e = engine();
        ok(act(&mut e, "SetObjectFilter", json!({"objectIds": ["Mug|1"]})));
        ok(act(
            &mut e,
            "OpenObject",
            json!({"objectId": "Fridge|1", "forceAction": true}),
        ));
        assert!(e.session().scene.object("Fridge|1").unwrap().is_open());

        let r = ok(act(&mut e, "ResetObjectFilter", json!({})));
        assert!(r.metadata.object("Fridge|1").unwrap().is_open);
    }

    // -----------------------------------------------------------------------
    // Teleport
    // -----------------------------------------------------------------------

    #[test]
    fn teleport_outside_the_scene_fails_without_moving() {
        let mut e = engine();
        let before = e.session().agents[0].clone();
        let r = act(&mut e, "Teleport", json!({"x": 100.0, "z": 0.0}));
        failed(&r, "outside");
        assert_eq!(e.session().agents[0], before);
    }

    #[test]
    fn teleport_snaps_within_vertical_tolerance() {
        let mut e = engine();
        let r = ok(act(&mut e, "Teleport", json!({"x": 0.5, "y": 0.95, "z": -0.5})));
        let agent = &r.metadata.agent;
        assert!((agent.position.y - 0.900_998).abs() < 1e-5);
        assert_eq!(agent.position.x, 0.5);

        let r = act(&mut e, "Teleport", json!({"y": 1.0}));
        failed(&r, "resting height");
    }

    #[test]
    fn teleport_into_geometry_fails() {
        let mut e = engine();
        let r = act(&mut e, "Teleport", json!({"position": {"x": -2.2, "z": -1.0}}));
        failed(&r, "collides");
    }

    #[test]
    fn full_teleport_requires_standing_for_stance_agents() {
        let mut e = engine();
        let pose = json!({"x": 0.5, "y": 0.900998, "z": 0.0, "rotation": 90.0, "horizon": 30.0});
        let r = act(&mut e, "TeleportFull", pose.clone());
        assert_eq!(r.metadata.error_code, Some(ErrorCode::MissingArguments));

        let mut with_standing = pose.clone();
        with_standing["standing"] = json!(false);
        let r = ok(act(&mut e, "TeleportFull", with_standing.clone()));
        assert_eq!(r.metadata.agent.is_standing, Some(false));
        assert_eq!(r.metadata.agent.camera_horizon, 30.0);

        ok(act(&mut e, "Initialize", json!({"agentMode": "locobot"})));
        ok(act(&mut e, "TeleportFull", pose));
        failed(&act(&mut e, "TeleportFull", with_standing), "stand");
    }

    // -----------------------------------------------------------------------
    // Movement
    // -----------------------------------------------------------------------

    #[test]
    fn rotation_wraps_and_look_clamps() {
        let mut e = engine();
        let r = ok(act(&mut e, "RotateLeft", json!({})));
        assert_eq!(r.metadata.agent.rotation.y, 270.0);

        ok(act(&mut e, "LookUp", json!({})));
        let r = ok(act(&mut e, "LookUp", json!({})));
        assert_eq!(r.metadata.agent.camera_horizon, -30.0);
        let r = ok(act(&mut e, "LookDown", json!({"degrees": 200.0})));
        assert_eq!(r.metadata.agent.camera_horizon, 60.0);
    }

    #[test]
    fn moves_stop_at_walls() {
        let mut e = engine();
        let r = ok(act(&mut e, "MoveAhead", json!({})));
        assert!((r.metadata.agent.position.z - 0.25).abs() < 1e-5);

        ok(act(&mut e, "Teleport", json!({"x": 0.0, "z": 2.2, "rotation": 0.0})));
        let before = e.session().agents[0].clone();
        let r = act(&mut e, "MoveAhead", json!({}));
        assert_eq!(r.metadata.error_code, Some(ErrorCode::ActionFailed));
        assert_eq!(e.session().agents[0], before);
    }

    // -----------------------------------------------------------------------
    // Interaction
    // -----------------------------------------------------------------------

    #[test]
    fn openness_is_validated() {
        let mut e = engine();
        failed(
            &act(&mut e, "OpenObject", json!({"objectId": "Fridge|1", "openness": 1.5})),
            "openness",
        );
        failed(&act(&mut e, "OpenObject", json!({"objectId": "Fridge|1"})), "not visible");
        failed(
            &act(&mut e, "OpenObject", json!({"objectId": "Mug|1", "forceAction": true})),
            "not openable",
        );

        let closed = e.session().scene.object("Fridge|1").unwrap().bounds();
        let r = ok(act(
            &mut e,
            "OpenObject",
            json!({"objectId": "Fridge|1", "openness": 0.5, "forceAction": true}),
        ));
        let fridge = r.metadata.object("Fridge|1").unwrap();
        assert_eq!(fridge.openness, 0.5);
        assert_ne!(fridge.axis_aligned_bounding_box, closed.to_aabb());

        ok(act(
            &mut e,
            "OpenObject",
            json!({"objectId": "Fridge|1", "moveMagnitude": 0.0, "forceAction": true}),
        ));
        assert_eq!(e.session().scene.object("Fridge|1").unwrap().openness, 1.0);

        let r = ok(act(
            &mut e,
            "CloseObject",
            json!({"objectId": "Fridge|1", "forceAction": true}),
        ));
        let fridge = r.metadata.object("Fridge|1").unwrap();
        assert!(!fridge.is_open);
        assert_eq!(fridge.axis_aligned_bounding_box, closed.to_aabb());
    }

    #[test]
    fn toggling_requires_a_toggleable_object() {
        let mut e = engine();
        let r = ok(act(
            &mut e,
            "ToggleObjectOn",
            json!({"objectId": "StoveKnob|1", "forceAction": true}),
        ));
        assert!(r.metadata.object("StoveKnob|1").unwrap().is_toggled);
        failed(
            &act(&mut e, "ToggleObjectOn", json!({"objectId": "Apple|1", "forceAction": true})),
            "not toggleable",
        );
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[test]
    fn enclosed_object_has_no_poses() {
        let mut e = engine();
        let r = ok(act(&mut e, "GetInteractablePoses", json!({"objectId": "Potato|1"})));
        assert_eq!(r.metadata.action_return, json!([]));
    }

    #[test]
    fn max_poses_caps_the_search() {
        let mut e = engine();
        let all = ok(act(&mut e, "GetInteractablePoses", json!({"objectId": "Mug|1"})));
        let all = all.metadata.action_return.as_array().unwrap().clone();
        assert!(all.len() > 2);

        let r = ok(act(
            &mut e,
            "GetInteractablePoses",
            json!({"objectId": "Mug|1", "maxPoses": 2}),
        ));
        assert_eq!(r.metadata.action_return, Value::Array(all[..2].to_vec()));
        let r = ok(act(
            &mut e,
            "GetInteractablePoses",
            json!({"objectId": "Mug|1", "maxPoses": 2.0}),
        ));
        assert_eq!(r.metadata.action_return, Value::Array(all[..2].to_vec()));
        rejected(
            &act(&mut e, "GetInteractablePoses", json!({"objectId": "Mug|1", "maxPoses": 1.5})),
            ErrorCode::InvalidArgument,
        );

        // Every pose replays as a teleport.
        let pose = all[0].as_object().unwrap();
        let mut replay = json!({});
        for key in ["x", "z", "rotation", "horizon", "standing"] {
            if let Some(v) = pose.get(key) {
                replay[key] = v.clone();
            }
        }
        ok(act(&mut e, "Teleport", replay));
    }

    #[test]
    fn reachable_positions_are_transient() {
        let mut e = engine();
        let r = ok(act(&mut e, "GetReachablePositions", json!({})));
        let listed = &r.metadata.extra["reachablePositions"];
        assert_eq!(listed, &r.metadata.action_return);
        assert!(listed.as_array().unwrap().len() > 10);

        let r = ok(act(&mut e, "Pass", json!({})));
        assert!(!r.metadata.extra.contains_key("reachablePositions"));
    }

    #[test]
    fn scene_bounds_have_eight_corners() {
        let mut e = engine();
        let r = ok(act(&mut e, "GetSceneBounds", json!({})));
        let corners = r.metadata.action_return["cornerPoints"].as_array().unwrap();
        assert_eq!(corners.len(), 8);
        assert_eq!(r.metadata.action_return["size"]["x"], json!(5.0));
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    #[test]
    fn initialize_validates_before_resetting() {
        let mut e = engine();
        ok(act(&mut e, "RotateRight", json!({})));
        failed(&act(&mut e, "Initialize", json!({"scene": "Moon"})), "unknown scene");
        failed(&act(&mut e, "Initialize", json!({"agentCount": 9})), "agentCount");
        assert_eq!(e.session().agents[0].rotation.y, 90.0);

        let r = ok(act(&mut e, "Initialize", json!({"scene": "Studio", "agentCount": 2})));
        assert_eq!(r.metadata.scene_name, "Studio");
        assert_eq!(r.metadata.agents.len(), 2);
        assert_ne!(r.metadata.agents[0].position, r.metadata.agents[1].position);
    }

    #[test]
    fn whole_numbers_are_read_as_counts() {
        let mut e = engine();
        rejected(&act(&mut e, "Initialize", json!({"agentCount": -1})), ErrorCode::InvalidArgument);
        rejected(&act(&mut e, "Initialize", json!({"agentCount": 1.5})), ErrorCode::InvalidArgument);
        assert_eq!(e.session().agents.len(), 1);

        let r = ok(act(&mut e, "Initialize", json!({"agentCount": 2.0})));
        assert_eq!(r.metadata.agents.len(), 2);

        let r = ok(act(&mut e, "ChangeResolution", json!({"x": 64.0, "y": 64})));
        assert_eq!(Event::from_response(r).unwrap().frame().unwrap().shape(), (64, 64, 3));
        assert_eq!(e.session().width, 64);
    }

    #[test]
    fn bot_is_an_alias_for_locobot() {
        let mut e = engine();
        let r = ok(act(&mut e, "Initialize", json!({"agentMode": "bot"})));
        assert_eq!(r.metadata.action_return["handlerClass"], json!("LocobotAgent"));
        assert_eq!(e.session().mode, AgentMode::Locobot);
        assert!(e.session().agents[0].is_standing.is_none());
    }

    #[test]
    fn grid_size_has_a_floor() {
        let mut e = engine();
        failed(&act(&mut e, "Initialize", json!({"gridSize": 1e-5})), "gridSize");
        failed(&act(&mut e, "Initialize", json!({"gridSize": 0.0})), "gridSize");
        ok(act(&mut e, "Initialize", json!({"gridSize": 0.05})));

        let err = Engine::new(EngineConfig {
            grid_size: 1e-5,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn echo_returns_its_argument() {
        let mut e = engine();
        let value = json!({"nested": [1, 2, {"deep": true}]});
        let r = ok(act(&mut e, "EchoReturn", json!({"rvalue": value.clone()})));
        assert_eq!(r.metadata.action_return, value);
    }

    // -----------------------------------------------------------------------
    // Frames and cameras
    // -----------------------------------------------------------------------

    #[test]
    fn resize_round_trip_keeps_depth_and_segmentation() {
        let mut e = engine();
        ok(act(
            &mut e,
            "Initialize",
            json!({
                "width": 300,
                "height": 300,
                "renderDepthImage": true,
                "renderInstanceSegmentation": true,
            }),
        ));
        let before = Event::from_response(ok(act(&mut e, "Pass", json!({})))).unwrap();

        let big = Event::from_response(ok(act(&mut e, "ChangeResolution", json!({"x": 500, "y": 500}))))
            .unwrap();
        assert_eq!(big.frame().unwrap().shape(), (500, 500, 3));
        assert_eq!(big.depth_frame().unwrap().shape(), (500, 500));

        let after = Event::from_response(ok(act(&mut e, "ChangeResolution", json!({"x": 300, "y": 300}))))
            .unwrap();
        let (d0, d1) = (before.depth_frame().unwrap(), after.depth_frame().unwrap());
        assert_eq!(d0.shape(), d1.shape());
        assert!(d0.data.iter().zip(&d1.data).all(|(a, b)| (a - b).abs() < 1e-3));
        assert_eq!(
            before.instance_segmentation_frame(),
            after.instance_segmentation_frame()
        );
        assert_eq!(before.metadata.colors, after.metadata.colors);
    }

    #[test]
    fn out_of_range_resolution_fails() {
        let mut e = engine();
        failed(&act(&mut e, "ChangeResolution", json!({"x": 5000, "y": 10})), "resolution");
        failed(&act(&mut e, "ChangeResolution", json!({"x": 0, "y": 10})), "resolution");
        assert_eq!(e.session().width, 48);
    }

    #[test]
    fn agents_get_independent_frames() {
        let mut e = engine();
        let r = ok(act(&mut e, "Initialize", json!({"agentCount": 2})));
        let event = Event::from_response(r).unwrap();
        let frames = event.agent_frames();
        assert_eq!(frames.len(), 2);
        assert_ne!(frames[0].color, frames[1].color);
    }

    #[test]
    fn per_step_overrides_do_not_persist() {
        let mut e = engine();
        let r = ok(act(&mut e, "Pass", json!({"renderDepthImage": true})));
        assert!(Event::from_response(r).unwrap().depth_frame().is_some());
        let r = ok(act(&mut e, "Pass", json!({})));
        assert!(Event::from_response(r).unwrap().depth_frame().is_none());
    }

    #[test]
    fn third_party_cameras_validate_and_merge() {
        let mut e = engine();
        let camera = json!({"position": {"x": 0.0, "y": 2.0, "z": 0.0}, "rotation": {"x": 30.0, "y": 0.0, "z": 0.0}});
        for fov in [0.0, 180.0] {
            let mut bad = camera.clone();
            bad["fieldOfView"] = json!(fov);
            failed(&act(&mut e, "AddThirdPartyCamera", bad), "fieldOfView");
        }
        let r = ok(act(&mut e, "AddThirdPartyCamera", camera));
        assert_eq!(r.metadata.action_return, json!(0));
        assert_eq!(r.metadata.third_party_cameras[0].field_of_view, 90.0);

        failed(
            &act(
                &mut e,
                "UpdateThirdPartyCamera",
                json!({"thirdPartyCameraId": 0, "fieldOfView": 200.0, "position": {"x": 1.0}}),
            ),
            "fieldOfView",
        );
        let r = ok(act(
            &mut e,
            "UpdateThirdPartyCamera",
            json!({"thirdPartyCameraId": 0, "position": {"y": 2.2}}),
        ));
        let cam = &r.metadata.third_party_cameras[0];
        assert_eq!((cam.position.x, cam.position.y, cam.position.z), (0.0, 2.2, 0.0));
        assert_eq!(cam.rotation.x, 30.0);

        let event = Event::from_response(r).unwrap();
        assert_eq!(event.third_party_frames().len(), 1);
        assert_ne!(event.third_party_frames()[0].color, event.frame().unwrap().clone());
    }

    #[test]
    fn deprecated_render_flags_enable_segmentation() {
        let mut e = engine();
        let r = ok(act(
            &mut e,
            "Initialize",
            json!({"renderObjectImage": true, "renderClassImage": true}),
        ));
        let event = Event::from_response(r).unwrap();
        assert!(event.instance_segmentation_frame().is_some());
        assert!(event.semantic_segmentation_frame().is_some());
        assert!(event.depth_frame().is_none());
    }

    // -----------------------------------------------------------------------
    // Frame budget
    // -----------------------------------------------------------------------

    #[test]
    fn default_budget_fits_the_payload_cap() {
        let config = EngineConfig::default();
        assert!(config.max_frame_bytes + METADATA_HEADROOM <= sim_control::codec::DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn oversized_resolution_is_refused() {
        let mut e = engine();
        ok(act(
            &mut e,
            "Initialize",
            json!({
                "agentCount": 2,
                "renderDepthImage": true,
                "renderInstanceSegmentation": true,
                "renderSemanticSegmentation": true,
            }),
        ));
        // 2048 x 2048 x 13 bytes for two agents is well past 64 MiB.
        failed(&act(&mut e, "ChangeResolution", json!({"x": 2048, "y": 2048})), "byte limit");
        assert_eq!((e.session().width, e.session().height), (48, 48));
        failed(
            &act(&mut e, "Initialize", json!({"agentCount": 2, "width": 2048, "height": 2048})),
            "byte limit",
        );
        assert_eq!(e.session().agents.len(), 2);
    }

    #[test]
    fn accepted_layouts_fit_the_reader() {
        // Exactly two full-channel 48 x 48 agents.
        let budget = 48 * 48 * 13 * 2;
        let mut e = Engine::new(EngineConfig {
            width: 48,
            height: 48,
            max_frame_bytes: budget,
            ..Default::default()
        })
        .unwrap();
        let r = ok(act(
            &mut e,
            "Initialize",
            json!({
                "agentCount": 2,
                "renderDepthImage": true,
                "renderInstanceSegmentation": true,
                "renderSemanticSegmentation": true,
            }),
        ));
        assert_eq!(r.frame_buffer.len(), budget);

        let payload = encode_response(&r).unwrap();
        let mut wire = Vec::new();
        write_message(&mut wire, MessageKind::Response, &payload).unwrap();
        let read = read_message(&mut wire.as_slice(), budget + METADATA_HEADROOM)
            .unwrap()
            .unwrap();
        assert_eq!(read.payload.len(), payload.len());

        // A camera would take the frames past the budget.
        let camera = json!({"position": {"x": 0.0, "y": 2.0, "z": 0.0}, "rotation": {"x": 30.0, "y": 0.0, "z": 0.0}});
        failed(&act(&mut e, "AddThirdPartyCamera", camera), "byte limit");
        assert!(e.session().cameras.is_empty());
        failed(&act(&mut e, "ChangeResolution", json!({"x": 64, "y": 48})), "byte limit");
    }

    // -----------------------------------------------------------------------
    // Viewport queries
    // -----------------------------------------------------------------------

    #[test]
    fn scenes_in_build_are_listed() {
        let mut e = engine();
        let r = ok(act(&mut e, "GetScenesInBuild", json!({})));
        assert_eq!(r.metadata.action_return, json!(["Kitchen", "Studio"]));
    }

    #[test]
    fn object_in_frame_matches_segmentation() {
        let mut e = engine();
        let r = ok(act(&mut e, "Pass", json!({"renderInstanceSegmentation": true})));
        let event = Event::from_response(r).unwrap();
        let seg = event.instance_segmentation_frame().unwrap().clone();

        let mut object = None;
        let mut surface = None;
        for py in 0..seg.height {
            for px in 0..seg.width {
                let Some(id) = seg.pixel(px, py).and_then(|c| event.color_to_object_id(c)) else {
                    continue;
                };
                // Pixel centres, computed the way the renderer does.
                let point = (
                    (px as f32 + 0.5) / seg.width as f32,
                    (py as f32 + 0.5) / seg.height as f32,
                );
                if event.get_object(id).is_some() {
                    object.get_or_insert((point, id.to_string()));
                } else {
                    surface.get_or_insert(point);
                }
            }
        }

        let ((x, y), id) = object.expect("an object in view");
        let r = ok(act(&mut e, "GetObjectInFrame", json!({"x": x, "y": y})));
        assert_eq!(r.metadata.action_return, json!(id));

        let (x, y) = surface.expect("a wall or floor in view");
        failed(&act(&mut e, "GetObjectInFrame", json!({"x": x, "y": y})), "not an object");
        failed(&act(&mut e, "GetObjectInFrame", json!({"x": 1.5, "y": 0.5})), "[0, 1]");
        rejected(&act(&mut e, "GetObjectInFrame", json!({"x": 0.5})), ErrorCode::MissingArguments);
    }

    #[test]
    fn raycast_coordinate_lies_inside_the_scene() {
        let mut e = engine();
        let bounds = ok(act(&mut e, "GetSceneBounds", json!({}))).metadata.action_return;
        let r = ok(act(&mut e, "GetCoordinateFromRaycast", json!({"x": 0.5, "y": 0.5})));
        let point = &r.metadata.action_return;
        for axis in ["x", "y", "z"] {
            let v = point[axis].as_f64().unwrap();
            let (c, half) = (
                bounds["center"][axis].as_f64().unwrap(),
                bounds["size"][axis].as_f64().unwrap() / 2.0,
            );
            assert!((v - c).abs() <= half + 1e-3, "{axis} = {v} outside the scene");
        }
        failed(
            &act(&mut e, "GetCoordinateFromRaycast", json!({"x": 0.5, "y": -0.1})),
            "[0, 1]",
        );
    }
}
