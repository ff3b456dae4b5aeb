use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{Value, json};
use tempfile::TempDir;

use axgate::Config;
use axgate::gateway::{MAX_BODY_SIZE, build_app, build_state};

struct Server {
    _tmp: TempDir,
    addr: SocketAddr,
    client: reqwest::Client,
}

impl Server {
    async fn start() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(Config::load_or_init_in(tmp.path()).unwrap());
        let state = build_state(Arc::clone(&config)).await.unwrap();
        let app = build_app(state, &[]);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            _tmp: tmp,
            addr,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn chat(&self, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url("/chat"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

#[tokio::test]
async fn health_is_served() {
    let server = Server::start().await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn chat_round_trip_over_http() {
    let server = Server::start().await;

    let (status, first) = server.chat(json!({"input_text": "/cli pwd"})).await;
    assert_eq!(status, 200);
    assert_eq!(first["decision"]["verdict"], "ALLOW");
    assert_eq!(first["execution"]["status"], "executed");

    let (_, second) = server.chat(json!({"input_text": "/cli pwd"})).await;
    assert_eq!(second["execution"]["status"], "replayed");
    assert_ne!(first["system"]["request_id"], second["system"]["request_id"]);

    let resp = server
        .client
        .post(server.url("/replay"))
        .json(&json!({"segments": 2}))
        .send()
        .await
        .unwrap();
    let replay: Value = resp.json().await.unwrap();
    assert_eq!(replay["matched"], true);
    assert_eq!(replay["records_checked"], 4);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let server = Server::start().await;
    let resp = server
        .client
        .post(server.url("/chat"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON"));
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let server = Server::start().await;
    let text = "x".repeat(MAX_BODY_SIZE + 1);
    let resp = server
        .client
        .post(server.url("/chat"))
        .json(&json!({"input_text": text}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 413);
}
