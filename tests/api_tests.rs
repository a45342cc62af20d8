// Request/response API tests against a canned HTTP fixture

mod common;
use common::{setup_logging, spawn_http_server, Route};

use axum::http::Method;

use chatbook::api::ApiClient;
use chatbook::models::DeliveryStatus;
use chatbook::state::ChatState;
use chatbook::ChatError;

fn route(method: Method, path: &'static str, status: u16, body: &str) -> Route {
    Route {
        method,
        path,
        status,
        body: body.to_string(),
    }
}

const TOKENS: &str = r#"{"access_token":"acc","refresh_token":"ref","token_type":"bearer"}"#;

#[tokio::test]
async fn test_login_returns_tokens_and_sends_json() {
    setup_logging();
    let fixture = spawn_http_server(vec![route(Method::POST, "/login-json", 200, TOKENS)]).await;
    let api = ApiClient::new(&fixture.config).unwrap();

    let tokens = api.login("alice", "secret").await.unwrap();
    assert_eq!(tokens.access_token, "acc");
    assert_eq!(tokens.refresh_token, "ref");

    let requests = fixture.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("content-type"), Some("application/json"));
    let value: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(value, serde_json::json!({"username": "alice", "password": "secret"}));
}

#[tokio::test]
async fn test_rejections_carry_backend_detail() {
    setup_logging();
    let fixture = spawn_http_server(vec![
        route(Method::POST, "/register", 400, r#"{"detail":"Username already registered"}"#),
        route(Method::POST, "/login-json", 401, r#"{"detail":"Incorrect username or password"}"#),
    ])
    .await;
    let api = ApiClient::new(&fixture.config).unwrap();

    match api.register("alice", "pw").await {
        Err(ChatError::Rejected { status, detail }) => {
            assert_eq!(status, 400);
            assert_eq!(detail, "Username already registered");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(matches!(
        api.login("alice", "wrong").await,
        Err(ChatError::Rejected { status: 401, .. })
    ));
}

#[tokio::test]
async fn test_refresh_passes_token_as_query() {
    setup_logging();
    let fixture = spawn_http_server(vec![route(Method::POST, "/refresh-token", 200, TOKENS)]).await;
    let api = ApiClient::new(&fixture.config).unwrap();

    api.refresh("ref-123").await.unwrap();
    let request = &fixture.requests()[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.path, "/refresh-token");
    assert_eq!(request.query.as_deref(), Some("refresh_token=ref-123"));
}

#[tokio::test]
async fn test_contacts_exclude_self_and_carry_bearer() {
    setup_logging();
    let fixture = spawn_http_server(vec![route(
        Method::GET,
        "/users",
        200,
        r#"[{"username":"alice"},{"username":"bob"},{"username":"carol"}]"#,
    )])
    .await;
    let mut api = ApiClient::new(&fixture.config).unwrap();
    api.set_access_token(Some("acc".to_string()));

    let contacts = api.fetch_contacts("alice").await.unwrap();
    let names: Vec<&str> = contacts.iter().map(|c| c.username.as_str()).collect();
    assert_eq!(names, vec!["bob", "carol"]);

    let request = &fixture.requests()[0];
    assert_eq!(request.header("authorization"), Some("Bearer acc"));
}

#[tokio::test]
async fn test_history_query_and_merge() {
    setup_logging();
    let fixture = spawn_http_server(vec![route(
        Method::GET,
        "/messages",
        200,
        r#"[
            {"id":1,"from":"alice","to":"bob","content":"hi","status":"seen","timestamp":"2024-05-01T10:00:00"},
            {"id":2,"from":"bob","to":"alice","content":"yo","status":"sent","timestamp":"2024-05-01T10:01:00"}
        ]"#,
    )])
    .await;
    let api = ApiClient::new(&fixture.config).unwrap();

    let mut state = ChatState::new();
    state.switch_identity("alice");
    let request = state.select_contact("bob").unwrap();
    let result = api.fetch_history(&request.identity, &request.contact).await;
    assert!(state.apply_history(&request, result));

    let view = state.view();
    assert_eq!(view.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(view[0].status, DeliveryStatus::Seen);
    let request = &fixture.requests()[0];
    assert_eq!(request.path, "/messages");
    assert_eq!(request.query.as_deref(), Some("user1=alice&user2=bob"));
}

#[tokio::test]
async fn test_unknown_route_is_rejected_with_detail() {
    setup_logging();
    let fixture = spawn_http_server(vec![]).await;
    let api = ApiClient::new(&fixture.config).unwrap();

    match api.logout().await {
        Err(ChatError::Rejected { status, detail }) => {
            assert_eq!(status, 404);
            assert_eq!(detail, "Not Found");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    let requests = fixture.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!((requests[0].method.clone(), requests[0].path.as_str()), (Method::POST, "/logout"));
    assert!(requests[0].header("authorization").is_none());
}

#[tokio::test]
async fn test_unreachable_backend_degrades_to_empty() {
    setup_logging();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let config = chatbook::config::ClientConfig::from_server_url(&format!("http://{}", addr)).unwrap();
    let api = ApiClient::new(&config).unwrap();

    let mut state = ChatState::new();
    state.switch_identity("alice");
    let contacts = api.fetch_contacts("alice").await;
    assert!(matches!(contacts, Err(ChatError::Http(_))));
    state.set_contacts(contacts);
    assert!(state.contacts().is_empty());
}

#[tokio::test]
async fn test_cut_off_error_body_falls_back_to_status() {
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::Response;
    use axum::routing::post;

    setup_logging();
    let app = axum::Router::new().route(
        "/login-json",
        post(|| async {
            let chunks: Vec<std::io::Result<&'static str>> = vec![
                Ok(r#"{"detail":"Incorr"#),
                Err(std::io::Error::other("connection reset")),
            ];
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from_stream(futures_util::stream::iter(chunks)))
                .unwrap()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let config = chatbook::config::ClientConfig::from_server_url(&format!("http://{}", addr)).unwrap();
    let api = ApiClient::new(&config).unwrap();
    match api.login("alice", "secret").await {
        Err(ChatError::Rejected { status, detail }) => {
            assert_eq!(status, 500);
            assert_eq!(detail, "500 Internal Server Error");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}
