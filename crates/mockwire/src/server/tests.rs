use super::*;
use crate::config::{ProxySaveMappingSetting, ProxySaveMappingSettings};
use crate::mapping::SYNTHESIZED_PRIORITY;
use crate::message::{BodyData, RequestMessage};
use crate::proxy::ProxyError;
use crate::webhook::Webhook;
use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::{Request, Response};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Upstream answering with a fixed status and JSON body, recording what it
/// receives.
struct FakeUpstream {
    status: u16,
    seen: Mutex<Vec<String>>,
}

impl FakeUpstream {
    fn new(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ProxyClient for FakeUpstream {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ProxyError> {
        self.seen
            .lock()
            .push(format!("{} {}", request.method(), request.uri()));
        Ok(Response::builder()
            .status(self.status)
            .header("content-type", "application/json")
            .body(Bytes::from_static(br#"{"from":"upstream"}"#))
            .unwrap())
    }
}

fn server_with(settings: ServerSettings) -> (MockServer, Arc<FakeUpstream>) {
    let upstream = FakeUpstream::new(200);
    let server = MockServer::new(settings, upstream.clone()).unwrap();
    (server, upstream)
}

fn server() -> MockServer {
    server_with(ServerSettings::default()).0
}

fn get(path: &str) -> RequestMessage {
    RequestMessage::new("GET", path)
}

fn stub(path: &str, body: &str) -> Mapping {
    Mapping::builder()
        .given(
            RequestMatcherSpec::new()
                .with_path(MatcherSpec::exact(path))
                .using_method("GET"),
        )
        .respond_with(ResponseMessage::ok().with_body_string(body))
        .build()
        .unwrap()
}

fn text(response: &ResponseMessage) -> String {
    response.body.as_text().unwrap_or_default().into_owned()
}

#[tokio::test]
async fn test_unmatched_request_yields_not_found_and_is_logged() {
    let server = server();
    server.add_or_update_mapping(stub("/a", "a")).unwrap();

    let response = server.handle_request(get("/nowhere")).await;
    assert_eq!(response.status, 404);
    assert_eq!(
        response.body.as_json(),
        Some(&json!({"Status": "No matching mapping found"}))
    );

    let log = server.log_entries();
    assert_eq!(log.len(), 1);
    assert!(log[0].mapping_guid.is_none());
}

#[tokio::test]
async fn test_scenario_routes_second_request_to_next_state() {
    let server = server();
    let first = Mapping::builder()
        .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact("/todo")))
        .in_scenario("S")
        .will_set_state_to("S2")
        .respond_with(ResponseMessage::ok().with_body_string("first"))
        .build()
        .unwrap();
    let second = Mapping::builder()
        .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact("/todo")))
        .in_scenario("S")
        .when_state_is("S2")
        .respond_with(ResponseMessage::ok().with_body_string("second"))
        .build()
        .unwrap();
    server.add_or_update_mapping(first).unwrap();
    server.add_or_update_mapping(second).unwrap();

    assert_eq!(text(&server.handle_request(get("/todo")).await), "first");
    assert_eq!(server.scenario("S").unwrap().state.as_deref(), Some("S2"));
    assert_eq!(text(&server.handle_request(get("/todo")).await), "second");

    let state = server.scenario("s").unwrap();
    assert!(state.started);
    assert!(state.finished);
    assert_eq!(state.state, None);
}

#[tokio::test]
async fn test_scenario_needs_repeat_count_before_moving() {
    let server = server();
    let polling = Mapping::builder()
        .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact("/job")))
        .in_scenario("job")
        .will_set_state_to("done")
        .times(3)
        .respond_with(ResponseMessage::new(202))
        .build()
        .unwrap();
    let finished = Mapping::builder()
        .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact("/job")))
        .in_scenario("job")
        .when_state_is("done")
        .respond_with(ResponseMessage::ok())
        .build()
        .unwrap();
    server.add_or_update_mapping(polling).unwrap();
    server.add_or_update_mapping(finished).unwrap();

    for _ in 0..3 {
        assert_eq!(server.handle_request(get("/job")).await.status, 202);
    }
    assert_eq!(server.handle_request(get("/job")).await.status, 200);

    server.reset_scenarios();
    assert_eq!(server.handle_request(get("/job")).await.status, 202);
    assert_eq!(server.scenario("job").unwrap().counter, 1);
}

#[tokio::test]
async fn test_partial_match_only_when_allowed() {
    let mapping = Mapping::builder()
        .given(
            RequestMatcherSpec::new()
                .with_path(MatcherSpec::exact("/orders"))
                .using_method("POST"),
        )
        .in_scenario("orders")
        .will_set_state_to("placed")
        .respond_with(ResponseMessage::new(201))
        .build()
        .unwrap();

    let strict = server();
    strict.add_or_update_mapping(mapping.clone()).unwrap();
    assert_eq!(strict.handle_request(get("/orders")).await.status, 404);
    let log = strict.log_entries();
    assert_eq!(log[0].partial_mapping_guid, Some(mapping.guid));

    let lenient = server_with(ServerSettings {
        allow_partial_mapping: true,
        ..ServerSettings::default()
    })
    .0;
    lenient.add_or_update_mapping(mapping).unwrap();
    assert_eq!(lenient.handle_request(get("/orders")).await.status, 201);
    // Partial matches never advance scenarios
    assert_eq!(lenient.scenario("orders").unwrap().state, None);
    assert!(!lenient.scenario("orders").unwrap().started);
}

#[tokio::test]
async fn test_dynamic_provider_sees_request() {
    let server = server();
    let echo = Mapping::builder()
        .given(RequestMatcherSpec::new().with_path(MatcherSpec::wildcard("/echo/*")))
        .respond_with_dynamic(|request: &RequestMessage| {
            ResponseMessage::ok().with_body_string(request.path.clone())
        })
        .build()
        .unwrap();
    server.add_or_update_mapping(echo).unwrap();

    let response = server.handle_request(get("/echo/hello")).await;
    assert_eq!(text(&response), "/echo/hello");
}

#[tokio::test]
async fn test_mapping_crud_pass_throughs() {
    let server = server();
    let a = server.add_or_update_mapping(stub("/a", "a")).unwrap();
    server.add_or_update_mapping(stub("/b", "b")).unwrap();
    server.add_or_update_mapping(stub("/b", "b2")).unwrap();
    assert_eq!(server.mappings().len(), 3);
    assert!(server.mapping(&a.guid).is_some());

    assert_eq!(server.delete_mappings_by_path("/b").len(), 2);
    assert!(server.delete_mapping(&a.guid).is_some());
    assert!(server.mappings().is_empty());
    assert_eq!(server.handle_request(get("/a")).await.status, 404);
}

#[tokio::test]
async fn test_disabled_logging_and_log_queries() {
    let server = server();
    let quiet = Mapping::builder()
        .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact("/quiet")))
        .respond_with(ResponseMessage::ok())
        .without_logging()
        .build()
        .unwrap();
    server.add_or_update_mapping(quiet).unwrap();
    server.add_or_update_mapping(stub("/loud", "x")).unwrap();

    server.handle_request(get("/quiet")).await;
    server.handle_request(get("/loud")).await;
    server.handle_request(get("/loud")).await;

    assert_eq!(server.log_entries().len(), 2);
    let found = server
        .find_log_entries(&RequestMatcherSpec::new().with_path(MatcherSpec::exact("/loud")))
        .unwrap();
    assert_eq!(found.len(), 2);

    server.reset_log();
    assert!(server.log_entries().is_empty());
}

#[tokio::test]
async fn test_subscribers_receive_handled_requests() {
    let server = server();
    server.add_or_update_mapping(stub("/watched", "x")).unwrap();
    let mut rx = server.subscribe();

    server.handle_request(get("/watched")).await;
    let entry = rx.recv().await.unwrap();
    assert_eq!(entry.request.path, "/watched");
    assert_eq!(entry.response.status, 200);
}

#[tokio::test]
async fn test_default_request_log_stays_bounded() {
    let server = server();
    let limit = server.settings().max_request_log_count;
    assert_eq!(limit, crate::log::DEFAULT_MAX_ENTRIES);

    for i in 0..limit + 5 {
        server.handle_request(get(&format!("/miss/{i}"))).await;
    }

    let entries = server.log_entries();
    assert_eq!(entries.len(), limit);
    assert_eq!(entries[0].request.path, "/miss/5");
}

#[tokio::test]
async fn test_delay_is_applied() {
    let server = server();
    let slow = Mapping::builder()
        .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact("/slow")))
        .respond_with(ResponseMessage::ok().with_delay(Duration::from_millis(50)))
        .build()
        .unwrap();
    server.add_or_update_mapping(slow).unwrap();

    let started = Instant::now();
    server.handle_request(get("/slow")).await;
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_proxy_catch_all_records_mapping() {
    let mut proxy = ProxyAndRecordSettings::new("http://upstream:8080");
    proxy.save_mapping = true;
    let (server, upstream) = server_with(ServerSettings {
        proxy_and_record: Some(proxy),
        ..ServerSettings::default()
    });
    server.add_or_update_mapping(stub("/local", "local")).unwrap();

    assert_eq!(text(&server.handle_request(get("/local")).await), "local");
    assert!(upstream.seen.lock().is_empty());

    let response = server.handle_request(get("/remote?id=1")).await;
    assert_eq!(response.body.as_json(), Some(&json!({"from": "upstream"})));
    assert_eq!(
        upstream.seen.lock().as_slice(),
        ["GET http://upstream:8080/remote?id=1"]
    );

    let recorded: Vec<_> = server
        .mappings()
        .into_iter()
        .filter(|m| m.priority == SYNTHESIZED_PRIORITY)
        .collect();
    assert_eq!(recorded.len(), 1);

    // The recorded mapping now answers without going upstream
    server.handle_request(get("/remote?id=1")).await;
    assert_eq!(upstream.seen.lock().len(), 1);
}

#[tokio::test]
async fn test_proxy_save_filter_skips_failures() {
    let mut proxy = ProxyAndRecordSettings::new("http://upstream");
    proxy.save_mapping = true;
    proxy.save_mapping_settings = Some(ProxySaveMappingSettings {
        status_code_pattern: Some(ProxySaveMappingSetting::accept("2xx".to_string())),
        http_methods: None,
    });
    let upstream = FakeUpstream::new(404);
    let server = MockServer::new(
        ServerSettings {
            proxy_and_record: Some(proxy),
            ..ServerSettings::default()
        },
        upstream,
    )
    .unwrap();

    assert_eq!(server.handle_request(get("/missing")).await.status, 404);
    assert_eq!(server.mappings().len(), 1);
}

#[tokio::test]
async fn test_proxy_records_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut proxy = ProxyAndRecordSettings::new("http://upstream");
    proxy.save_mapping_to_file = true;
    let (server, _) = server_with(ServerSettings {
        proxy_and_record: Some(proxy),
        mappings_dir: dir.path().to_path_buf(),
        ..ServerSettings::default()
    });

    server.handle_request(get("/saved")).await;
    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
    // Saving to file alone does not register the mapping
    assert_eq!(server.mappings().len(), 1);
}

#[tokio::test]
async fn test_reset_keeps_builtin_mappings() {
    let (server, _) = server_with(ServerSettings {
        start_admin_interface: true,
        proxy_and_record: Some(ProxyAndRecordSettings::new("http://upstream")),
        ..ServerSettings::default()
    });
    server.add_or_update_mapping(stub("/a", "a")).unwrap();
    assert_eq!(server.mappings().len(), 3);

    server.reset().unwrap();
    assert_eq!(server.mappings().len(), 2);

    let health = server.handle_request(get(HEALTH_PATH)).await;
    assert_eq!(health.body.as_json(), Some(&json!({"status": "healthy"})));
    assert!(server.log_entries().is_empty());
}

#[tokio::test]
async fn test_webhooks_are_sent_through_client() {
    let (server, upstream) = server_with(ServerSettings::default());
    let mapping = Mapping::builder()
        .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact("/pay")))
        .respond_with(ResponseMessage::ok())
        .with_webhook(
            Webhook::new("http://hooks.local/paid").with_body(BodyData::from_json(json!({"paid": true}))),
        )
        .build()
        .unwrap();
    server.add_or_update_mapping(mapping).unwrap();

    server.handle_request(get("/pay")).await;
    assert_eq!(
        upstream.seen.lock().as_slice(),
        ["POST http://hooks.local/paid"]
    );
}

#[tokio::test]
async fn test_synchronous_handling_serializes_requests() {
    let server = Arc::new(
        server_with(ServerSettings {
            handle_requests_synchronously: true,
            ..ServerSettings::default()
        })
        .0,
    );
    let slow = Mapping::builder()
        .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact("/slow")))
        .respond_with(ResponseMessage::ok().with_delay(Duration::from_millis(40)))
        .build()
        .unwrap();
    server.add_or_update_mapping(slow).unwrap();

    let started = Instant::now();
    let a = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.handle_request(get("/slow")).await }
    });
    let b = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.handle_request(get("/slow")).await }
    });
    a.await.unwrap();
    b.await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(80));
}
