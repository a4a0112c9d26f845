use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;
use vidtutor_core::{ClassifierKind, VidtutorConfig};
use vidtutor_provider::ProviderType;
use vidtutor_server::{create_router, state::AppState};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> VidtutorConfig {
    let mut config = VidtutorConfig::default();
    config.llm.provider.api_key = Some("test-key".into());
    config.llm.provider.base_url = Some(server.uri());
    config.youtube.api_key = Some("yt-key".into());
    config.youtube.api_base = server.uri();
    config.youtube.timedtext_base = format!("{}/api/timedtext", server.uri());
    config
}

fn app(config: VidtutorConfig) -> Router {
    create_router(AppState::from_config(config))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

async fn mount_video(server: &MockServer, id: &str, title: &str) {
    Mock::given(method("GET"))
        .and(path("/videos"))
        .and(query_param("id", id))
        .and(query_param("part", "snippet,contentDetails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{
                "id": id,
                "snippet": {"title": title, "description": "", "channelTitle": "Cat Channel"},
                "contentDetails": {"duration": "PT3M"}
            }]
        })))
        .mount(server)
        .await;
}

fn openai_stream(parts: &[&str]) -> ResponseTemplate {
    let mut body = String::new();
    for part in parts {
        body.push_str(&format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": part}, "finish_reason": null}]})
        ));
    }
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn health_reports_configured_credentials() {
    let mut config = VidtutorConfig::default();
    config.llm.provider.provider_type = ProviderType::Stub;

    let resp = app(config).oneshot(get("/api/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["llm_configured"], true);
    assert_eq!(json["youtube_configured"], false);
}

#[tokio::test]
async fn search_cats_returns_bounded_results() {
    let server = MockServer::start().await;
    let items: Vec<serde_json::Value> = (0..30)
        .map(|i| {
            serde_json::json!({
                "id": {"videoId": format!("cat{i}")},
                "snippet": {
                    "title": format!("Cat video {i}"),
                    "channelTitle": "Cats",
                    "publishedAt": "2024-01-02T00:00:00Z",
                    "thumbnails": {"default": {"url": "https://i.ytimg.com/x.jpg"}}
                }
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "cats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": items})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .and(query_param("part", "statistics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
        .mount(&server)
        .await;

    let resp = app(config_for(&server))
        .oneshot(get("/api/videos/search?q=cats"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let results = json.as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results.len() <= 25);
    for video in results {
        assert!(!video["id"].as_str().unwrap().is_empty());
        assert!(!video["title"].as_str().unwrap().is_empty());
    }
}

#[tokio::test]
async fn unknown_video_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
        .mount(&server)
        .await;

    let resp = app(config_for(&server))
        .oneshot(get("/api/videos/nope"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transcript_lookup_at_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/timedtext"))
        .and(query_param("v", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "events": [
                {"tStartMs": 0, "dDurationMs": 2000, "segs": [{"utf8": "hello"}]},
                {"tStartMs": 4000, "dDurationMs": 2000, "segs": [{"utf8": "cats purr"}]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = app(config_for(&server));
    let resp = app
        .clone()
        .oneshot(get("/api/videos/abc/transcript/at?t=5"))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["text"], "cats purr");

    // Served from the cache.
    let resp = app
        .clone()
        .oneshot(get("/api/videos/abc/transcript/at?t=3"))
        .await
        .unwrap();
    assert!(body_json(resp).await.is_null());

    let resp = app
        .oneshot(get("/api/videos/abc/transcript"))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn frame_endpoint_maps_time_to_thumbnail() {
    let config = VidtutorConfig::default();
    let resp = app(config)
        .oneshot(get("/api/videos/abc/frame?t=100&duration=120"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["url"], "https://i.ytimg.com/vi/abc/hq3.jpg");
}

#[tokio::test]
async fn video_without_transcript_still_gets_an_answer() {
    let server = MockServer::start().await;
    mount_video(&server, "quiet", "Cats 101").await;
    Mock::given(method("GET"))
        .and(path("/api/timedtext"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Video: Cats 101"))
        .respond_with(openai_stream(&["Cats ", "purr ", "when happy."]))
        .expect(1)
        .mount(&server)
        .await;

    let app = app(config_for(&server));

    let resp = app
        .clone()
        .oneshot(post_json("/api/sessions", serde_json::json!({"videoId": "quiet"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created = body_json(resp).await;
    assert_eq!(created["videoTitle"], "Cats 101");
    assert_eq!(created["segments"], 0);
    let session_id = created["sessionId"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(post_json(
            &format!("/api/sessions/{session_id}/time"),
            serde_json::json!({"seconds": 42.0}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let resp = app
        .clone()
        .oneshot(get(&format!("/api/sessions/{session_id}")))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["currentTranscript"], "");

    let resp = app
        .oneshot(post_json(
            "/api/chat",
            serde_json::json!({
                "sessionId": session_id,
                "messages": [{"role": "user", "content": "why do cats purr?"}],
                "body": {}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    assert_eq!(resp.headers()["cache-control"].to_str().unwrap(), "no-cache");

    let body = body_text(resp).await;
    assert!(body.ends_with("data: [DONE]\n\n"));
    assert_eq!(body.matches("[DONE]").count(), 1);
    let text: String = body
        .split("\n\n")
        .filter_map(|event| event.strip_prefix("data: "))
        .filter(|data| *data != "[DONE]")
        .map(|data| {
            let json: serde_json::Value = serde_json::from_str(data).unwrap();
            json["text"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(text, "Cats purr when happy.");
}

#[tokio::test]
async fn upstream_failure_streams_error_then_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let resp = app(config_for(&server))
        .oneshot(post_json(
            "/api/chat",
            serde_json::json!({
                "messages": [{"role": "user", "content": "hi"}],
                "body": {"videoTitle": "Cats 101", "currentTime": 65}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_text(resp).await;
    let events: Vec<&str> = body
        .split("\n\n")
        .filter(|e| !e.is_empty())
        .collect();
    assert_eq!(events.len(), 2);
    let error: serde_json::Value =
        serde_json::from_str(events[0].strip_prefix("data: ").unwrap()).unwrap();
    assert_eq!(error["error"], true);
    assert!(error["text"]
        .as_str()
        .unwrap()
        .starts_with("Sorry, I encountered an error"));
    assert_eq!(events[1], "data: [DONE]");
}

#[tokio::test]
async fn simple_mode_upstream_failure_is_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let resp = app(config_for(&server))
        .oneshot(post_json(
            "/api/chat",
            serde_json::json!({
                "mode": "simple",
                "messages": [{"role": "user", "content": "hi"}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let json = body_json(resp).await;
    assert!(json["error"]
        .as_str()
        .unwrap()
        .starts_with("Sorry, I encountered an error: "));
}

#[tokio::test]
async fn simple_mode_returns_text_json() {
    let mut config = VidtutorConfig::default();
    config.llm.provider.provider_type = ProviderType::Stub;

    let resp = app(config)
        .oneshot(post_json(
            "/api/chat",
            serde_json::json!({
                "mode": "simple",
                "messages": [{"role": "user", "content": "what is ownership?"}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["text"], "[stub:gpt-4o-mini] what is ownership?");
}

#[tokio::test]
async fn history_ending_with_assistant_is_rejected() {
    let mut config = VidtutorConfig::default();
    config.llm.provider.provider_type = ProviderType::Stub;

    let resp = app(config)
        .oneshot(post_json(
            "/api/chat",
            serde_json::json!({
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"}
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let mut config = VidtutorConfig::default();
    config.llm.provider.provider_type = ProviderType::Stub;
    let app = app(config);

    let resp = app
        .clone()
        .oneshot(get("/api/sessions/missing"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(post_json(
            "/api/chat",
            serde_json::json!({
                "sessionId": "missing",
                "messages": [{"role": "user", "content": "hi"}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

const TINY_PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

#[tokio::test]
async fn session_frames_time_and_close() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/timedtext"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;
    let mut config = config_for(&server);
    config.llm.provider.provider_type = ProviderType::Stub;
    config.frame_gate.classifier = ClassifierKind::None;
    let app = app(config);

    let resp = app
        .clone()
        .oneshot(post_json(
            "/api/sessions",
            serde_json::json!({"videoId": "abc", "videoTitle": "Cats 101", "durationSeconds": 120}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let session_id = body_json(resp).await["sessionId"]
        .as_str()
        .unwrap()
        .to_string();

    let resp = app
        .clone()
        .oneshot(post_json(
            &format!("/api/sessions/{session_id}/frames"),
            serde_json::json!({"base64": TINY_PNG}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let analysis = body_json(resp).await;
    assert_eq!(analysis["shouldProcess"], true);
    assert_eq!(analysis["decision"], "first");
    assert!(analysis["imageUrl"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));

    let resp = app
        .clone()
        .oneshot(post_json(
            &format!("/api/sessions/{session_id}/frames"),
            serde_json::json!({"base64": TINY_PNG}),
        ))
        .await
        .unwrap();
    let analysis = body_json(resp).await;
    assert_eq!(analysis["shouldProcess"], false);
    assert_eq!(analysis["decision"], "rate_limited");

    let resp = app
        .clone()
        .oneshot(post_json(
            &format!("/api/sessions/{session_id}/time"),
            serde_json::json!({"seconds": -1.0}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"]
        .as_str()
        .unwrap()
        .contains("invalid playback time"));

    let delete = |id: &str| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/sessions/{id}"))
            .body(Body::empty())
            .unwrap()
    };
    let resp = app.clone().oneshot(delete(&session_id)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app.clone().oneshot(delete(&session_id)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(get(&format!("/api/sessions/{session_id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn frame_endpoint_rejects_unsafe_video_id() {
    let config = VidtutorConfig::default();
    let resp = app(config)
        .oneshot(get("/api/videos/abc%3Fsize%3D1/frame?t=1&duration=120"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert!(json["error"].as_str().unwrap().contains("invalid video id"));
}

#[tokio::test]
async fn unknown_route_is_json_not_found() {
    let resp = app(VidtutorConfig::default())
        .oneshot(get("/api/nope"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let json = body_json(resp).await;
    assert!(json["error"].as_str().unwrap().starts_with("no route for"));
}
