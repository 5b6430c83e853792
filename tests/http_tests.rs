//! HTTP host routes and the HTTP client transport

#[cfg(all(test, feature = "server"))]
mod tests {
    use std::thread;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use sim_control::cache::ObjectListCache;
    use sim_control::codec::{decode_response, encode_action};
    use sim_control::host::router;
    use sim_control::http::{CONTENT_TYPE_PAYLOAD, QUIT_PATH, STEP_PATH};
    use sim_control::{
        serve_http, ActionRequest, Controller, ControllerConfig, Engine, EngineConfig, HostState,
        SessionState,
    };
    use tower::ServiceExt;

    fn state() -> HostState {
        HostState::new(
            Engine::new(EngineConfig {
                width: 16,
                height: 16,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn post(path: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, CONTENT_TYPE_PAYLOAD)
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn step_route_answers_with_a_response_payload() {
        tokio_test::block_on(async {
            let payload = encode_action(&ActionRequest::new("Pass").to_wire(1)).unwrap();
            let resp = router(state()).oneshot(post(STEP_PATH, payload)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(resp.headers()[header::CONTENT_TYPE], CONTENT_TYPE_PAYLOAD);

            let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let response = decode_response(body, &mut ObjectListCache::new()).unwrap();
            assert_eq!(response.metadata.last_action, "Pass");
            assert_eq!(response.metadata.sequence_id, 1);
            assert!(response.metadata.last_action_success);
        });
    }

    #[test]
    fn malformed_step_is_a_bad_request() {
        tokio_test::block_on(async {
            let resp = router(state())
                .oneshot(post(STEP_PATH, b"not json".to_vec()))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        });
    }

    #[test]
    fn quit_route_signals_shutdown() {
        tokio_test::block_on(async {
            let host = state();
            let resp = router(host.clone())
                .oneshot(post(QUIT_PATH, Vec::new()))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NO_CONTENT);
            host.quit_requested().await;
        });
    }

    #[test]
    fn quit_drops_the_cached_object_list() {
        tokio_test::block_on(async {
            let host = state();
            let mut cache = ObjectListCache::new();
            let mut sequence = 0;
            let mut pass = || {
                sequence += 1;
                let payload = encode_action(&ActionRequest::new("Pass").to_wire(sequence)).unwrap();
                router(host.clone()).oneshot(post(STEP_PATH, payload))
            };

            let mut emitted = Vec::new();
            for _ in 0..2 {
                let resp = pass().await.unwrap();
                let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
                emitted.push(decode_response(body, &mut cache).unwrap().metadata.fast_emit);
            }
            assert_eq!(emitted, [false, true]);

            let resp = router(host.clone())
                .oneshot(post(QUIT_PATH, Vec::new()))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NO_CONTENT);

            // The next client starts without a cache, so the list is sent again.
            let resp = pass().await.unwrap();
            let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let response = decode_response(body, &mut ObjectListCache::new()).unwrap();
            assert!(!response.metadata.fast_emit);
            assert_eq!(response.metadata.objects.len(), 8);
        });
    }

    #[test]
    fn controller_session_over_http() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let host = state();
        let engine = host.engine().clone();

        let server = thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                serve_http(listener, host).await.unwrap();
            });
        });

        let mut c = Controller::connect_http(&format!("http://{addr}"), ControllerConfig::default())
            .unwrap();
        let event = c.step(&ActionRequest::new("RotateRight")).unwrap();
        assert!(event.last_action_success());
        assert_eq!(event.metadata.agent.rotation.y, 90.0);
        assert_eq!(event.frame().unwrap().shape(), (16, 16, 3));

        c.stop();
        assert_eq!(c.state(), SessionState::Stopped);
        server.join().unwrap();
        assert_eq!(engine.lock().session().agents[0].rotation.y, 90.0);
    }
}
