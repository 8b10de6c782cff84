//! Integration tests for the roam API.
//!
//! HTTP routes are exercised with `tower::ServiceExt::oneshot`; the chat
//! socket is exercised end to end against a real listener with a
//! tokio-tungstenite client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Days, Local};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use roam_api::handlers::{HealthResponse, RootResponse};
use roam_api::{create_router, AppState};
use roam_chat::{ChatService, LocalEngine, ScriptedEngine, ServerMessage, SnapshotEvent, StampFinder};
use roam_core::config::RoamConfig;
use roam_core::types::UserId;
use roam_geo::FixedLocator;
use roam_storage::{Database, NewStamp, StampRepository};

// =============================================================================
// Helpers
// =============================================================================

fn scripted_state() -> AppState {
    let config = RoamConfig::default();
    let engine = ScriptedEngine::repeating(vec![
        SnapshotEvent::partial("您好"),
        SnapshotEvent::partial("您好，歡迎"),
        SnapshotEvent::complete("您好，歡迎使用！"),
    ]);
    let chat = ChatService::new(Arc::new(engine), &config.engine);
    AppState::new(config, chat)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Serve `state` on an ephemeral port and return its address.
async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/ws/chat?{query}");
    let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    client
}

async fn next_message(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for server message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Collect messages up to and including the turn's terminal message.
async fn read_turn(client: &mut Client) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    loop {
        let message = next_message(client).await;
        let done = matches!(message, ServerMessage::End { .. } | ServerMessage::Error { .. });
        messages.push(message);
        if done {
            return messages;
        }
    }
}

async fn send_query(client: &mut Client, query: &str) {
    let frame = serde_json::json!({ "query": query }).to_string();
    client.send(Message::Text(frame)).await.unwrap();
}

fn streamed_text(messages: &[ServerMessage]) -> String {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Partial { content } | ServerMessage::Complete { content } => {
                Some(content.as_str())
            }
            _ => None,
        })
        .collect()
}

// =============================================================================
// HTTP routes
// =============================================================================

#[tokio::test]
async fn test_root_descriptor() {
    let app = create_router(scripted_state());
    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: RootResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.message, "FAQ ChatBot WebSocket API");
    assert_eq!(body.endpoints.websocket, "/ws/chat?user_id={user_id}");
    assert_eq!(body.endpoints.health, "/health");
}

#[tokio::test]
async fn test_health_reports_no_connections() {
    let app = create_router(scripted_state());
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: HealthResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.status, "healthy");
    assert_eq!(body.active_connections, 0);
}

#[tokio::test]
async fn test_ws_missing_user_is_bad_request() {
    let app = create_router(scripted_state());
    let response = app
        .oneshot(Request::get("/ws/chat").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_ws_blank_user_is_bad_request() {
    let app = create_router(scripted_state());
    let response = app
        .oneshot(
            Request::get("/ws/chat?user_id=%20%20")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ws_without_upgrade_is_rejected() {
    let app = create_router(scripted_state());
    let response = app
        .oneshot(Request::get("/ws/chat?user_id=u1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let app = create_router(scripted_state());
    let response = app
        .oneshot(
            Request::get("/health")
                .header("origin", "http://example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
}

// =============================================================================
// Chat socket
// =============================================================================

#[tokio::test]
async fn test_ws_full_conversation() {
    let state = scripted_state();
    let addr = spawn_server(state.clone()).await;
    let mut client = connect(addr, "user_id=alice").await;

    assert_eq!(
        next_message(&mut client).await,
        ServerMessage::welcome(&UserId::new("alice"))
    );
    let ServerMessage::SessionCreated { session_id } = next_message(&mut client).await else {
        panic!("expected session_created");
    };
    assert_eq!(state.chat.connections().active_count(), 1);

    send_query(&mut client, "你好").await;
    let turn = read_turn(&mut client).await;
    assert_eq!(
        turn[0],
        ServerMessage::Info {
            conversation_count: 1,
            session_id: session_id.clone()
        }
    );
    assert_eq!(turn[1], ServerMessage::start());
    assert_eq!(streamed_text(&turn), "您好，歡迎使用！");
    assert_eq!(turn.last(), Some(&ServerMessage::end()));

    send_query(&mut client, "再一次").await;
    let turn = read_turn(&mut client).await;
    assert_eq!(
        turn[0],
        ServerMessage::Info {
            conversation_count: 2,
            session_id
        }
    );
}

#[tokio::test]
async fn test_ws_pipelined_queries_do_not_interleave() {
    let addr = spawn_server(scripted_state()).await;
    let mut client = connect(addr, "user_id=erin").await;
    next_message(&mut client).await;
    let ServerMessage::SessionCreated { session_id } = next_message(&mut client).await else {
        panic!("expected session_created");
    };

    // Both frames are on the wire before the first turn has ended.
    send_query(&mut client, "第一題").await;
    send_query(&mut client, "第二題").await;

    for count in 1..=2 {
        let turn = read_turn(&mut client).await;
        assert_eq!(
            turn[0],
            ServerMessage::Info {
                conversation_count: count,
                session_id: session_id.clone()
            }
        );
        assert_eq!(turn[1], ServerMessage::start());
        assert!(turn[2..turn.len() - 1].iter().all(|m| matches!(
            m,
            ServerMessage::Partial { .. } | ServerMessage::Complete { .. }
        )));
        assert_eq!(streamed_text(&turn), "您好，歡迎使用！");
        assert_eq!(turn.last(), Some(&ServerMessage::end()));
    }
}

#[tokio::test]
async fn test_ws_invalid_frames_keep_connection_open() {
    let addr = spawn_server(scripted_state()).await;
    let mut client = connect(addr, "user_id=bob").await;
    next_message(&mut client).await;
    next_message(&mut client).await;

    client.send(Message::Text("not json".into())).await.unwrap();
    assert_eq!(
        next_message(&mut client).await,
        ServerMessage::error("無效的 JSON 格式")
    );

    send_query(&mut client, "   ").await;
    assert_eq!(
        next_message(&mut client).await,
        ServerMessage::error("請提供有效的問題")
    );

    send_query(&mut client, "還在嗎").await;
    let turn = read_turn(&mut client).await;
    assert_eq!(turn.last(), Some(&ServerMessage::end()));
}

#[tokio::test]
async fn test_ws_reconnect_reuses_session() {
    let state = scripted_state();
    let addr = spawn_server(state.clone()).await;

    let mut first = connect(addr, "user_id=carol").await;
    next_message(&mut first).await;
    let created = next_message(&mut first).await;
    first.close(None).await.unwrap();
    drop(first);

    let mut second = connect(addr, "user_id=carol").await;
    next_message(&mut second).await;
    assert_eq!(next_message(&mut second).await, created);
    assert_eq!(state.chat.sessions().len(), 1);
}

#[tokio::test]
async fn test_ws_disconnect_releases_connection() {
    let state = scripted_state();
    let addr = spawn_server(state.clone()).await;

    let mut client = connect(addr, "user_id=dave").await;
    next_message(&mut client).await;
    next_message(&mut client).await;
    client.close(None).await.unwrap();
    drop(client);

    let mut remaining = state.chat.connections().active_count();
    for _ in 0..50 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        remaining = state.chat.connections().active_count();
    }
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_ws_nearby_stamps_offline_engine() {
    let db = Arc::new(Database::in_memory().unwrap());
    let repository = StampRepository::new(Arc::clone(&db));
    let today = Local::now().date_naive();
    let activity = repository.insert_activity("港都巡禮").unwrap();
    let stamps = [
        ("市政府", "802 高雄市苓雅區四維三路2號", (22.6204, 120.3121)),
        ("駁二", "803 高雄市鹽埕區大勇路1號", (22.6200, 120.2817)),
        ("台北車站", "100 台北市中正區北平西路3號", (25.0478, 121.5170)),
    ];
    for (i, (name, address, coordinates)) in stamps.into_iter().enumerate() {
        repository
            .insert_stamp(&NewStamp {
                code: format!("S{i}"),
                activity_id: activity,
                product_id: 100 + i as i64,
                name: name.to_string(),
                location: Some(address.to_string()),
                start: today.checked_sub_days(Days::new(7)).unwrap(),
                end: today.checked_add_days(Days::new(7)).unwrap(),
                store_name: None,
                map_location: None,
                map_coordinates: None,
                gps_coordinates: Some(coordinates),
            })
            .unwrap();
    }

    let config = RoamConfig::default();
    let locator = Arc::new(FixedLocator::at(22.6203, 120.3120, "Kaohsiung"));
    let finder = StampFinder::new(Arc::new(repository), locator, config.geo.nearby_limit);
    let engine = LocalEngine::new(Arc::new(finder));
    let chat = ChatService::new(Arc::new(engine), &config.engine);
    let addr = spawn_server(AppState::new(config, chat)).await;

    let mut client = connect(addr, "user_id=erin").await;
    next_message(&mut client).await;
    next_message(&mut client).await;
    send_query(&mut client, "附近有哪些集章？").await;

    let text = streamed_text(&read_turn(&mut client).await);
    let city_hall = text.find("市政府").unwrap();
    let pier = text.find("駁二").unwrap();
    assert!(city_hall < pier);
    assert!(!text.contains("台北車站"));
}
