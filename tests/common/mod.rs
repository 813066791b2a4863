//! Fake controller API served with warp on an ephemeral port.

use serde_json::{Value, json};
use warp::{Filter, http::StatusCode};

fn success(data: Value) -> Value {
  json!({"status": "success", "data": data})
}

fn failure(detail: &str) -> Value {
  json!({"status": "failure", "errors": [{"detail": detail}]})
}

fn reply(body: Value, status: StatusCode) -> warp::reply::WithStatus<warp::reply::Json> {
  warp::reply::with_status(warp::reply::json(&body), status)
}

/// Queues: `Q1` is populated, `Q2` has a worker list with no `workers` field,
/// `boom` fails with a 200, and anything else is a 404 failure envelope.
pub async fn spawn_fake_api() -> String {
  let controllers = warp::path!("api" / "controllers").map(|| {
    reply(
      success(json!({"controllers": [
        {"id": "Q1", "time": "2024-01-01T00:00:00Z"},
        {"id": "Q2", "time": "2024-06-01T00:00:00Z", "username": "ops"}
      ]})),
      StatusCode::OK,
    )
  });

  let tasks = warp::path!("api" / "controller" / String / "tasks").map(|queue: String| match queue.as_str() {
    "Q1" => reply(
      success(json!({"tasks": [
        {"id": "t1", "queue_id": "Q1", "worker_id": "w1", "status": "RUNNING",
         "submit_time": "2024-03-01T09:00:00Z", "start_time": "2024-03-01T09:01:00Z", "complete_time": null},
        {"id": "t2", "queue_id": "Q1", "worker_id": null, "status": "PENDING",
         "submit_time": "2024-03-02T09:00:00Z", "start_time": null, "complete_time": null},
        {"id": "t3", "queue_id": "Q1", "worker_id": "w2", "status": "COMPLETE",
         "submit_time": "2024-03-01T08:00:00Z", "start_time": "2024-03-01T10:00:00Z",
         "complete_time": "2024-03-01T10:30:00Z"}
      ]})),
      StatusCode::OK,
    ),
    "boom" => reply(failure("boom"), StatusCode::OK),
    other => reply(failure(&format!("controller {} not found", other)), StatusCode::NOT_FOUND),
  });

  let workers = warp::path!("api" / "controller" / String / "workers").map(|queue: String| match queue.as_str() {
    "Q1" => reply(
      success(json!({"workers": [
        {"id": "w1", "start_time": "2024-03-01T08:00:00Z", "status": "BUSY", "hostname": "node-1"},
        {"id": "w2", "start_time": "2024-03-01T09:00:00Z", "status": "IDLE", "hostname": "node-2"}
      ]})),
      StatusCode::OK,
    ),
    _ => reply(success(json!({"note": "no workers key"})), StatusCode::OK),
  });

  let events = warp::path!("api" / "controller" / String / "worker" / String / "events").map(
    |_queue: String, worker: String| {
      reply(
        success(json!({"events": [
          {"time": "2024-03-01T08:00:00Z", "message": format!("{} started", worker)},
          {"time": "2024-03-01T08:05:00Z", "message": format!("{} picked up t1", worker)}
        ]})),
        StatusCode::OK,
      )
    },
  );

  let gateway = warp::path!("api" / "gateway").map(|| reply(success(json!({})), StatusCode::BAD_GATEWAY));

  let routes = warp::get().and(controllers.or(tasks).or(workers).or(events).or(gateway));
  let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  format!("http://{}/api", addr)
}
