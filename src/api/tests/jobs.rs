use super::*;
use crate::db::NewJob;
use crate::types::{CampaignId, JobId, JobKind};

async fn enqueue(engine: &DispatchEngine, campaign: i64) -> JobId {
    let id = JobId::schedule(CampaignId(campaign));
    engine
        .db
        .enqueue_job(&NewJob {
            id: id.clone(),
            kind: JobKind::CampaignSchedule,
            payload: format!(r#"{{"campaign_id":{}}}"#, campaign),
            retry: Default::default(),
            timeout: Duration::from_secs(60),
            delay: Duration::ZERO,
        })
        .await
        .unwrap();
    id
}

/// Claim the next job and fail it permanently
async fn kill_next(engine: &DispatchEngine) -> JobId {
    let job = engine
        .db
        .claim_next_job("api-test-worker", Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    engine
        .db
        .fail_job(&job, "api-test-worker", "brand 9 not found", false)
        .await
        .unwrap();
    job.id
}

#[tokio::test]
async fn list_jobs_filters_by_state() {
    let (engine, _temp) = create_test_engine().await;
    enqueue(&engine, 1).await;
    enqueue(&engine, 2).await;
    let dead = kill_next(&engine).await;
    let app = router_for(&engine);

    let body = json_body(send(app.clone(), "GET", "/jobs").await).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let response = send(app.clone(), "GET", "/jobs?state=dead").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let jobs = body.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], dead.as_str());
    assert_eq!(jobs[0]["state"], "dead");
    assert_eq!(jobs[0]["last_error"], "brand 9 not found");

    let body = json_body(send(app, "GET", "/jobs?limit=1").await).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_state_filter_is_400() {
    let (engine, _temp) = create_test_engine().await;

    let response = send(router_for(&engine), "GET", "/jobs?state=zombie").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn get_job_by_id() {
    let (engine, _temp) = create_test_engine().await;
    let id = enqueue(&engine, 3).await;
    let app = router_for(&engine);

    let response = send(app.clone(), "GET", &format!("/jobs/{}", id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "campaign-schedule");
    assert_eq!(body["state"], "waiting");

    let response = send(app, "GET", "/jobs/campaign-send:404").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retry_dead_job() {
    let (engine, _temp) = create_test_engine().await;
    let first = enqueue(&engine, 4).await;
    let second = enqueue(&engine, 5).await;
    let dead = kill_next(&engine).await;
    let waiting = if dead == first { second } else { first };
    let app = router_for(&engine);

    let response = send(app.clone(), "POST", &format!("/jobs/{}/retry", dead)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let job = engine.get_job(&dead).await.unwrap().unwrap();
    assert_eq!(job.state, crate::types::JobState::Waiting);
    assert_eq!(job.attempts_made, 0);

    let response = send(app.clone(), "POST", &format!("/jobs/{}/retry", waiting)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_job_state");

    let response = send(app, "POST", "/jobs/campaign-send:404/retry").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
