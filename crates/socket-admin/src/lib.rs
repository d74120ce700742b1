//! HTTP admin surface over the fleet registry: `GET /v1/find`,
//! `POST /v1/send`. Returns the `{code, data?, msg}` envelope verbatim,
//! never axum's default JSON-error shape.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::warn;

use event_protocol::{AdminEnvelope, Descriptor, SendRequest};
use socket_core::worker::Worker;

pub fn router(worker: Arc<Worker>) -> Router {
    Router::new()
        .route("/v1/find", get(find))
        .route("/v1/send", post(send))
        .with_state(worker)
}

#[derive(Deserialize)]
struct FindQuery {
    id: i64,
}

async fn find(
    State(worker): State<Arc<Worker>>,
    Query(query): Query<FindQuery>,
) -> Json<AdminEnvelope> {
    match worker.find(query.id).await {
        Some(conn) => Json(AdminEnvelope::ok(Descriptor {
            id: conn.id(),
            work_id: conn.work_id(),
        })),
        None => Json(AdminEnvelope::err("not online")),
    }
}

async fn send(
    State(worker): State<Arc<Worker>>,
    Json(body): Json<SendRequest>,
) -> Json<AdminEnvelope> {
    let Some(conn) = worker.find(body.id).await else {
        return Json(AdminEnvelope::err("not online"));
    };

    let data = match serde_json::to_vec(&body.data) {
        Ok(data) => data,
        Err(err) => {
            warn!(%err, "admin send payload did not serialise");
            return Json(AdminEnvelope::err("send failed"));
        }
    };

    match conn.send(&body.topic, data).await {
        Ok(()) => Json(AdminEnvelope::ok_msg()),
        Err(_) => Json(AdminEnvelope::err("not online")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use socket_core::codec::Identity;
    use socket_core::presence::{MemoryPresence, Presence};
    use socket_core::worker::WorkerOpts;
    use tokio::io::duplex;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn worker() -> Arc<Worker> {
        Worker::new(WorkerOpts {
            id: 1,
            codec: Arc::new(Identity),
            presence: Arc::new(Presence::Memory(MemoryPresence::new())),
            global_handler: None,
            parent_token: CancellationToken::new(),
        })
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !cond() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn find_reports_not_online_for_unknown_id() {
        let app = router(worker());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/find?id=404")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["code"], 1);
        assert_eq!(envelope["msg"], "not online");
    }

    #[tokio::test]
    async fn find_resolves_an_admitted_connection() {
        let worker = worker();
        let (server_io, _client_io) = duplex(4096);
        let conn = worker.admit(server_io).await;
        wait_until(|| worker.count() == 1).await;

        let app = router(Arc::clone(&worker));
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/find?id={}", conn.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["code"], 0);
        assert_eq!(envelope["data"]["ID"], conn.id());
    }

    #[tokio::test]
    async fn find_resolves_a_presence_only_connection_from_another_worker() {
        let presence = Arc::new(Presence::Memory(MemoryPresence::new()));
        presence
            .online(Descriptor {
                id: 555,
                work_id: 3,
            })
            .await
            .unwrap();
        let worker = Worker::new(WorkerOpts {
            id: 1,
            codec: Arc::new(Identity),
            presence,
            global_handler: None,
            parent_token: CancellationToken::new(),
        });

        let app = router(Arc::clone(&worker));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/find?id=555")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            envelope,
            serde_json::json!({"code": 0, "data": {"ID": 555, "WorkID": 3}, "msg": "ok"})
        );
    }

    #[tokio::test]
    async fn send_to_unknown_id_reports_not_online() {
        let app = router(worker());
        let request_body = serde_json::json!({"id": 999, "topic": "x", "data": "y"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/send")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&request_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["code"], 1);
        assert_eq!(envelope["msg"], "not online");
    }

    #[tokio::test]
    async fn send_to_an_admitted_connection_delivers_the_frame() {
        let worker = worker();
        let (server_io, mut client_io) = duplex(4096);
        let conn = worker.admit(server_io).await;
        wait_until(|| worker.count() == 1).await;
        let _ = socket_core::framing::read_frame(&mut client_io)
            .await
            .unwrap(); // __init_id__

        let app = router(Arc::clone(&worker));
        let request_body = serde_json::json!({"id": conn.id(), "topic": "demo", "data": {"n": 1}});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/send")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&request_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope, serde_json::json!({"code": 0, "msg": "ok"}));

        let frame = socket_core::framing::read_frame(&mut client_io)
            .await
            .unwrap();
        assert_eq!(frame.topic, "demo");
        let payload: serde_json::Value = serde_json::from_slice(&frame.data).unwrap();
        assert_eq!(payload, serde_json::json!({"n": 1}));
    }
}
