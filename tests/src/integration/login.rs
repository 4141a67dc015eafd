//! # Login Flows
//!
//! The uncorrelated login exchange: round trip, rejection, the single
//! outstanding login rule, coexistence with correlated traffic, and the
//! credential record written afterwards.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::mock_server::{echo_script, login_reply, Action, MockServer};
    use console_link::{
        actions, ClientError, Credential, CredentialRecord, CredentialStore, LoginOutcome,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn alice() -> Credential {
        Credential::from_password("alice", "secret".to_string()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_round_trip() {
        let server = MockServer::echo().await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let outcome = tokio::time::timeout(PROMPT, client.login(&alice()))
            .await
            .expect("login answered");

        assert_eq!(
            outcome,
            LoginOutcome::Accepted {
                user: Some(json!({"name": "alice", "role": "admin"}))
            }
        );
        assert!(!client.login_in_flight());

        let sent = server.received();
        assert_eq!(sent.len(), 1);
        let request = &sent[0];
        assert_eq!(request["action"], "auth_login");
        assert_eq!(request["login"], "alice");
        assert!(request.get("id").is_none(), "login is uncorrelated");
        let hash = request["password_hash"].as_str().unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(!request.to_string().contains("\"secret\""));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_rejected() {
        let server = MockServer::echo().await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let wrong = Credential::from_password("alice", "guess".to_string()).unwrap();
        let outcome = client.login(&wrong).await;

        assert_eq!(
            outcome,
            LoginOutcome::Rejected {
                message: "invalid login or password".into()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_only_one_login_outstanding() {
        let server = MockServer::start(|_: &Value| Vec::new()).await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;
        let mut events = client.login_events();

        client.send_login(&alice()).unwrap();
        assert_eq!(client.send_login(&alice()), Err(ClientError::LoginInProgress));
        server.wait_for_requests(1, PROMPT).await;

        stop_client(&client).await;
        assert_eq!(
            events.recv().await.unwrap(),
            LoginOutcome::Failed(ClientError::Stopped)
        );
        assert_eq!(server.received().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_times_out() {
        let server = MockServer::start(|_: &Value| Vec::new()).await;
        let mut config = test_config(&server.url());
        config.request_timeout = Duration::from_millis(150);
        let (client, _queue) = connected_client(config).await;

        let outcome = client.login(&alice()).await;

        assert_eq!(
            outcome,
            LoginOutcome::Failed(ClientError::Timeout(Duration::from_millis(150)))
        );
        assert!(!client.login_in_flight());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_while_disconnected() {
        let (bridge, _queue) = console_link::completion_bridge();
        let client = ConsoleClient::new(test_config("ws://127.0.0.1:9"), bridge).unwrap();

        let outcome = client.login(&alice()).await;

        assert_eq!(outcome, LoginOutcome::Failed(ClientError::NotConnected));
        assert!(!client.login_in_flight());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_correlated_traffic_during_login() {
        let server = MockServer::start(|req: &Value| {
            if req["action"] == "auth_login" {
                // Hold the login reply until the test injects it
                Vec::new()
            } else {
                echo_script(req)
            }
        })
        .await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;
        let mut events = client.login_events();

        client.send_login(&alice()).unwrap();
        let ping = client.send_request(actions::PING, ()).unwrap().await.unwrap();
        assert!(ping.is_success());
        assert!(client.login_in_flight(), "a correlated reply is not the login reply");

        let received = server.wait_for_requests(1, PROMPT).await;
        server.inject(login_reply(&received[0]).to_string());

        assert!(events.recv().await.unwrap().is_accepted());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_observer_runs_through_bridge() {
        let server = MockServer::echo().await;
        let (client, mut queue) = connected_client(test_config(&server.url())).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        client.on_login(move |outcome| seen2.lock().push(outcome));

        client.send_login(&alice()).unwrap();
        drain_until(&mut queue, || !seen.lock().is_empty()).await;

        assert!(seen.lock()[0].is_accepted());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remembered_credential_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("netconsole").join("credentials.json"));
        let server = MockServer::start(|req: &Value| {
            vec![Action::Reply(match req["action"].as_str() {
                Some("auth_login") => login_reply(req),
                _ => json!({"id": req["id"], "success": true}),
            })]
        })
        .await;
        let (client, _queue) = connected_client(test_config(&server.url())).await;

        let credential = alice();
        assert!(client.login(&credential).await.is_accepted());
        store
            .save(&CredentialRecord::new(&credential, true))
            .unwrap();

        let record = store.load().unwrap().expect("record saved");
        assert!(record.remember);
        let restored = record.credential().unwrap();
        assert_eq!(restored, credential);
        assert!(client.login(&restored).await.is_accepted());
    }
}
