//! # Request Correlation Flows
//!
//! Identifier uniqueness, at-most-once delivery, out-of-order routing,
//! orphan tolerance, per-request deadlines and offline rejection.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::mock_server::{echo_reply, error_reply, ok_reply, Action, MockServer};
    use console_link::{actions, ClientError, RequestId, RequestResult};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // =========================================================================
    // SCENARIOS
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generic_request_routes_to_its_caller() {
        let server = MockServer::start(|req: &Value| {
            vec![Action::Reply(ok_reply(req, json!(["ap-1", "sw-24"])))]
        })
        .await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let pending = client.send_request(actions::LIST_MODELS, ()).unwrap();
        let id = pending.id();
        let response = pending.await.unwrap();

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": true, "data": ["ap-1", "sw-24"]})
        );
        let sent = server.received();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["action"], "list_models");
        assert_eq!(sent[0]["id"], id.to_string());
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.stats().responses_delivered, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_params_are_flattened_into_request() {
        let server = MockServer::echo().await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let response = client
            .send_request(actions::FILE_GET, json!({"path": "maps/site.json"}))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            response.data.unwrap(),
            json!({"action": "file_get", "params": {"path": "maps/site.json"}})
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_application_error_reaches_caller() {
        let server =
            MockServer::start(|req: &Value| vec![Action::Reply(error_reply(req, "no such file"))])
                .await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let response = client
            .send_request(actions::FILE_GET, json!({"path": "missing"}))
            .unwrap()
            .await
            .unwrap();

        assert!(!response.is_success());
        assert_eq!(response.into_result().unwrap_err().message, "no such file");
    }

    // =========================================================================
    // UNIQUENESS
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_requests_get_distinct_ids() {
        const REQUESTS: usize = 200;
        let server = MockServer::start(|_: &Value| Vec::new()).await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let mut tasks = Vec::new();
        for worker in 0..4 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                (0..REQUESTS / 4)
                    .map(|n| {
                        client
                            .send_request(actions::PING, json!({"worker": worker, "n": n}))
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            }));
        }
        let mut pending = Vec::new();
        for task in tasks {
            pending.extend(task.await.unwrap());
        }

        let handle_ids: HashSet<RequestId> = pending.iter().map(|p| p.id()).collect();
        assert_eq!(handle_ids.len(), REQUESTS);

        let received = server.wait_for_requests(REQUESTS, PROMPT).await;
        let wire_ids: HashSet<String> = received
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(wire_ids.len(), REQUESTS);
        assert!(eventually(PROMPT, || client.pending_count() == REQUESTS).await);

        stop_client(&client).await;
        for p in pending {
            assert_eq!(p.await, Err(ClientError::Stopped));
        }
    }

    // =========================================================================
    // AT-MOST-ONCE DELIVERY
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_response_invokes_handler_once() {
        let server = MockServer::start(|req: &Value| {
            let reply = echo_reply(req);
            if req["action"] == "csv_read" {
                vec![Action::Reply(reply.clone()), Action::Reply(reply)]
            } else {
                vec![Action::Reply(reply)]
            }
        })
        .await;
        let (client, mut queue) = connected_client(test_config(&server.url())).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        client
            .send_request_with(actions::CSV_READ, json!({"file": "vlans.csv"}), move |result| {
                assert!(result.is_ok());
                calls2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        drain_until(&mut queue, || calls.load(Ordering::SeqCst) == 1).await;
        // A later round trip guarantees the duplicate has been processed
        client.send_request(actions::PING, ()).unwrap().await.unwrap();
        queue.run_pending();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.stats().orphaned_responses, 1);
    }

    // =========================================================================
    // OUT-OF-ORDER CORRELATION
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_responses_out_of_order_reach_correct_handlers() {
        let mut held: Option<Value> = None;
        let server = MockServer::start(move |req: &Value| match held.take() {
            // Answer the second request first, then the one we held back
            Some(first) => vec![
                Action::Reply(ok_reply(req, req["tag"].clone())),
                Action::Reply(ok_reply(&first, first["tag"].clone())),
            ],
            None => {
                held = Some(req.clone());
                Vec::new()
            }
        })
        .await;
        let (client, mut queue) = connected_client(test_config(&server.url())).await;

        let results: Arc<Mutex<Vec<(&str, RequestResult)>>> = Arc::default();
        let a_results = Arc::clone(&results);
        client
            .send_request_with(actions::LIST_MASTERS, json!({"tag": "A"}), move |r| {
                a_results.lock().push(("A", r))
            })
            .unwrap();
        server.wait_for_requests(1, PROMPT).await;
        let b_results = Arc::clone(&results);
        client
            .send_request_with(actions::LIST_FIRMWARES, json!({"tag": "B"}), move |r| {
                b_results.lock().push(("B", r))
            })
            .unwrap();

        drain_until(&mut queue, || results.lock().len() == 2).await;

        let results = results.lock();
        assert_eq!(results[0].0, "B", "B's response was sent first");
        for (handler, result) in results.iter() {
            let data = result.as_ref().unwrap().data.clone().unwrap();
            assert_eq!(data, json!(handler));
        }
    }

    // =========================================================================
    // ORPHAN TOLERANCE
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_orphan_and_malformed_frames_are_tolerated() {
        let server = MockServer::start(|req: &Value| {
            let stray = json!({"id": RequestId::new().to_string(), "success": true});
            vec![
                Action::Reply(stray),
                Action::Raw("this is not json".into()),
                Action::Reply(ok_reply(req, json!("real"))),
            ]
        })
        .await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let response = client
            .send_request(actions::LIST_MNGMT_VLAN, ())
            .unwrap()
            .await
            .unwrap();

        assert_eq!(response.data, Some(json!("real")));
        let stats = client.stats();
        assert_eq!(stats.orphaned_responses, 1);
        assert_eq!(stats.malformed_frames, 1);
        assert_eq!(server.connection_count(), 1, "bad frames do not drop the connection");
        assert!(client.is_connected());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_binary_json_response_is_routed() {
        let server = MockServer::start(|req: &Value| {
            vec![Action::Binary(ok_reply(req, json!({"vlan": 42})))]
        })
        .await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let response = client
            .send_request(actions::LIST_MNGMT_VLAN, ())
            .unwrap()
            .await
            .unwrap();

        assert_eq!(response.data, Some(json!({"vlan": 42})));
        let stats = client.stats();
        assert_eq!(stats.responses_delivered, 1);
        assert_eq!(stats.malformed_frames, 0);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unsolicited_frame_does_not_disturb_pending() {
        let server = MockServer::start(|_: &Value| Vec::new()).await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let pending = client.send_request(actions::DOWNLOAD_IMAGE, ()).unwrap();
        let id = pending.id();
        server.wait_for_requests(1, PROMPT).await;

        server.inject(json!({"id": RequestId::new().to_string(), "success": true}).to_string());
        assert!(eventually(PROMPT, || client.stats().orphaned_responses == 1).await);
        assert_eq!(client.pending_count(), 1);

        server.inject(json!({"id": id.to_string(), "success": true, "data": 7}).to_string());
        assert_eq!(pending.await.unwrap().data, Some(json!(7)));
    }

    // =========================================================================
    // DEADLINES
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unanswered_request_times_out() {
        let server = MockServer::start(|_: &Value| Vec::new()).await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let timeout = Duration::from_millis(150);
        let result = client
            .send_request_timeout(actions::SAVE_FIRMWARES, json!({"list": []}), timeout)
            .unwrap()
            .await;

        assert_eq!(result, Err(ClientError::Timeout(timeout)));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.stats().timeouts, 1);
        assert!(client.is_connected(), "a timeout does not drop the connection");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_late_response_after_timeout_is_orphaned() {
        let server = MockServer::start(|_: &Value| Vec::new()).await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let pending = client
            .send_request_timeout(actions::PING, (), Duration::from_millis(50))
            .unwrap();
        let id = pending.id();
        assert!(matches!(pending.await, Err(ClientError::Timeout(_))));

        server.inject(json!({"id": id.to_string(), "success": true}).to_string());
        assert!(eventually(PROMPT, || client.stats().orphaned_responses == 1).await);
    }

    // =========================================================================
    // OFFLINE AND INVALID REQUESTS
    // =========================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_requests_while_disconnected_fail_fast() {
        // Reserve a port and close it so connecting is refused
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let (bridge, mut queue) = console_link::completion_bridge();
        let client = ConsoleClient::new(test_config(&url), bridge).unwrap();

        // Not started yet
        let before_start = client.send_request(actions::PING, ()).unwrap().await;
        assert_eq!(before_start, Err(ClientError::NotConnected));

        client.start().unwrap();
        let result = tokio::time::timeout(
            PROMPT,
            client.send_request(actions::PING, ()).unwrap(),
        )
        .await
        .expect("offline request resolves promptly");
        assert_eq!(result, Err(ClientError::NotConnected));

        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        client
            .send_request_with(actions::PING, (), move |r| *seen2.lock() = Some(r))
            .unwrap();
        drain_until(&mut queue, || seen.lock().is_some()).await;
        assert_eq!(*seen.lock(), Some(Err(ClientError::NotConnected)));
        assert!(client.stats().rejected_offline >= 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_params_rejected_synchronously() {
        let server = MockServer::echo().await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let err = client.send_request(actions::CSV_WRITE, json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ClientError::InvalidParams(_)));
        let err = client
            .send_request(actions::CSV_WRITE, json!({"id": "spoofed"}))
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidParams(_)));

        client.send_request(actions::PING, ()).unwrap().await.unwrap();
        assert_eq!(server.received().len(), 1, "rejected requests never hit the wire");
    }
}
