use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use backend::config::{BackendConfig, ScheduleBootstrapConfig, StaticWorkProfilesConfig};
use backend::handlers::build_router;
use backend::leader::LeaderStore;
use backend::schedule::WorkAssignmentSchedule;
use backend::state::AppState;
use backend::work_fetch::StaticWorkFetcher;
use bytes::BytesMut;
use common::proto::{RecordingHeader, WorkAssignment as WireAssignment};
use common::wire;
use common::{
    AssociationRequest, LeaderInfo, LeaderUpdateRequest, PollRequest, PollResponse, ProcessGroup,
    ProcessGroupStatus, ProfileIngestResponse, ProfileOutcome, RecorderIdentifier, RecorderInfo,
    Work, WorkAssignment, WorkId, WorkProfile,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::ServiceExt;

fn profile() -> WorkProfile {
    WorkProfile {
        work: vec![Work::CpuSample {
            frequency: 100,
            max_frames: 64,
        }],
        duration: 60,
        coverage_pct: 100,
        description: "cpu".to_string(),
    }
}

fn test_state() -> AppState {
    let mut config = BackendConfig::default();
    config.ip_address = "10.1.1.1".to_string();
    config.work_profiles = StaticWorkProfilesConfig {
        default: Some(profile()),
        overrides: vec![],
    };
    let leader = Arc::new(LeaderStore::new(config.ip_address.clone(), None));
    let fetcher = Arc::new(StaticWorkFetcher::new(&config.work_profiles));
    AppState::with_fetcher(config, leader, fetcher)
}

fn pg() -> ProcessGroup {
    ProcessGroup::new("shop", "prod", "api")
}

fn recorder_info() -> RecorderInfo {
    RecorderInfo {
        identifier: RecorderIdentifier {
            ip: "10.0.0.9".to_string(),
            hostname: "host-9".to_string(),
            instance_id: "i-9".to_string(),
            process_group: pg(),
        },
        recorder_version: 2,
        recorder_uptime_secs: 10,
        recorder_tick: 1,
        is_defunct: false,
    }
}

async fn send_json<T: Serialize>(app: &Router, method: &str, uri: &str, body: &T) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    send(app, req).await
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn get_json<T: DeserializeOwned>(app: &Router, uri: &str) -> T {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn health_answers_ok() {
    let app = build_router(test_state());
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn poll_for_unassociated_group_gets_nothing() {
    let app = build_router(test_state());
    let (status, body) = send_json(
        &app,
        "POST",
        "/api/v1/poll",
        &PollRequest {
            recorder: recorder_info(),
        },
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let resp: PollResponse = parse(&body);
    assert!(resp.assignment.is_none());
    assert_eq!(resp.controller_id, BackendConfig::default().controller_id);
}

#[tokio::test]
async fn leader_can_be_read_and_updated() {
    let app = build_router(test_state());
    let info: LeaderInfo = get_json(&app, "/api/v1/leader").await;
    assert_eq!(info.address, None);
    assert!(!info.is_leader);

    // sin ser líder no se reparte trabajo
    let (status, _) = send_json(&app, "POST", "/leader/work", &pg()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send_json(
        &app,
        "PUT",
        "/api/v1/leader",
        &LeaderUpdateRequest {
            address: Some("10.1.1.1".to_string()),
        },
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let info: LeaderInfo = parse(&body);
    assert!(info.is_leader);

    let (status, body) = send_json(&app, "POST", "/leader/work", &pg()).await;
    assert_eq!(status, StatusCode::OK);
    let served: WorkProfile = parse(&body);
    assert_eq!(served, profile());
}

#[tokio::test]
async fn garbage_profile_stream_is_rejected() {
    let app = build_router(test_state());
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/profile")
        .body(Body::from(vec![0x09u8, 0x01, 0x02]))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_profile_stream_is_incomplete() {
    let app = build_router(test_state());
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/profile")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let resp: ProfileIngestResponse = parse(&body);
    assert_eq!(resp.outcome, ProfileOutcome::Incomplete);
    assert_eq!(resp.work_id, None);
}

#[tokio::test(start_paused = true)]
async fn associate_poll_and_ingest_end_to_end() {
    let state = test_state();
    let app = build_router(state.clone());

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/v1/associations",
        &AssociationRequest { process_group: pg() },
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // el primer poll registra al recorder; la primera ventana no lo conocía
    let poll = PollRequest {
        recorder: recorder_info(),
    };
    let (_, body) = send_json(&app, "POST", "/api/v1/poll", &poll).await;
    let resp: PollResponse = parse(&body);
    assert!(resp.assignment.is_none());

    // la ventana siguiente ya lo cuenta
    tokio::time::sleep(state.config.aggregation_window_duration + Duration::from_millis(10)).await;
    let (_, body) = send_json(&app, "POST", "/api/v1/poll", &poll).await;
    let resp: PollResponse = parse(&body);
    let assignment = resp.assignment.expect("asignación para el único recorder");
    assert!(assignment.delay <= state.config.schedule.max_acceptable_delay_secs);

    let groups: Vec<ProcessGroupStatus> = get_json(&app, "/api/v1/process-groups").await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].healthy_recorders, 1);
    assert!(groups[0].has_active_schedule);
    assert_eq!(groups[0].occupied_slots, 1);

    let mut stream = BytesMut::new();
    wire::encode_header(
        &RecordingHeader {
            recorder_version: 2,
            controller_version: 1,
            controller_id: resp.controller_id,
            work_assignment: Some(WireAssignment::from(&assignment)),
            work_description: assignment.description.clone(),
        },
        &mut stream,
    );
    wire::encode_end_marker(&mut stream);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/profile")
        .body(Body::from(stream.freeze()))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let ingest: ProfileIngestResponse = parse(&body);
    assert_eq!(ingest.outcome, ProfileOutcome::Completed);
    assert_eq!(ingest.work_id, Some(assignment.work_id.0));

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/v1/associations/remove",
        &AssociationRequest { process_group: pg() },
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(
        &app,
        "POST",
        "/api/v1/associations/remove",
        &AssociationRequest { process_group: pg() },
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    state.associations.shutdown_all().await;
    let groups: Vec<ProcessGroupStatus> = get_json(&app, "/api/v1/process-groups").await;
    assert!(groups.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_polls_share_one_schedule_without_blocking_the_server() {
    let state = test_state();
    let app = build_router(state.clone());

    let bootstrap = ScheduleBootstrapConfig {
        scheduling_buffer_secs: 5,
        window_duration_secs: 600,
        window_end_tolerance_secs: 30,
        min_acceptable_delay_secs: 0,
        max_acceptable_delay_secs: 60,
    };
    // 8 en serie por slot; con 2 slots arrancan dos juntas en el offset 10s
    let assignments: Vec<WorkAssignment> = (0..16)
        .map(|i| WorkAssignment::new(WorkId::from_parts(9, i), profile().work, "cpu".to_string(), 60))
        .collect();
    let schedule = WorkAssignmentSchedule::new(&bootstrap, assignments, 60, 2).unwrap();
    let (ctx, _) = state.contexts.get_or_create(&pg());
    ctx.set_schedule(Some(Arc::new(schedule)));

    let mut polls = Vec::new();
    for i in 0..6 {
        let app = app.clone();
        polls.push(tokio::spawn(async move {
            let mut info = recorder_info();
            info.identifier.hostname = format!("host-{i}");
            info.identifier.instance_id = format!("i-{i}");
            let (status, body) =
                send_json(&app, "POST", "/api/v1/poll", &PollRequest { recorder: info }).await;
            assert_eq!(status, StatusCode::OK);
            parse::<PollResponse>(&body).assignment
        }));
    }
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let mut handed_out = Vec::new();
    for poll in polls {
        if let Some(a) = poll.await.unwrap() {
            handed_out.push(a.work_id);
        }
    }
    handed_out.sort();
    assert_eq!(handed_out, vec![WorkId::from_parts(9, 0), WorkId::from_parts(9, 8)]);
}
