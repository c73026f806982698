use super::*;
use crate::test_helpers::{insert_brand, insert_campaign, insert_lists};
use crate::types::{CampaignId, CampaignStatus, JobId};

async fn campaign_in(engine: &DispatchEngine, status: CampaignStatus) -> CampaignId {
    let brand = insert_brand(&engine.db).await;
    let lists = insert_lists(&engine.db, &[20, 5]).await;
    insert_campaign(&engine.db, brand, lists, status).await
}

#[tokio::test]
async fn get_campaign_reports_progress() {
    let (engine, _temp) = create_test_engine().await;
    let id = campaign_in(&engine, CampaignStatus::Sending).await;
    engine
        .db
        .reset_checkpoint_for_new_send(id, chrono::Utc::now().timestamp())
        .await
        .unwrap();
    engine.db.commit_checkpoint_position(id, 0, 10).await.unwrap();

    let response = send(router_for(&engine), "GET", &format!("/campaigns/{}", id.0)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["id"], id.0);
    assert_eq!(body["status"], "sending");
    assert_eq!(body["total_contacts"], 25);
    assert_eq!(body["percent"], 40.0);
    assert_eq!(body["checkpoint"]["contact_index"], 10);
    assert_eq!(body["checkpoint"]["has_more_to_process"], true);
    assert_eq!(body["stats"]["processed"], 0);
}

#[tokio::test]
async fn get_unknown_campaign_is_404() {
    let (engine, _temp) = create_test_engine().await;

    let response = send(router_for(&engine), "GET", "/campaigns/77").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "campaign_not_found");
    assert_eq!(body["error"]["details"]["campaign_id"], 77);
}

#[tokio::test]
async fn send_enqueues_schedule_job() {
    let (engine, _temp) = create_test_engine().await;
    let id = campaign_in(&engine, CampaignStatus::Draft).await;

    let response = send(
        router_for(&engine),
        "POST",
        &format!("/campaigns/{}/send", id.0),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["job_id"], format!("campaign-schedule:{}", id.0));

    assert!(
        engine
            .get_job(&JobId::schedule(id))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn pause_then_resume() {
    let (engine, _temp) = create_test_engine().await;
    let id = campaign_in(&engine, CampaignStatus::Sending).await;
    let app = router_for(&engine);

    let response = send(app.clone(), "POST", &format!("/campaigns/{}/pause", id.0)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        engine.db.get_campaign_status(id).await.unwrap(),
        Some(CampaignStatus::Paused)
    );

    let response = send(app, "POST", &format!("/campaigns/{}/resume", id.0)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn invalid_transitions_are_409() {
    let (engine, _temp) = create_test_engine().await;
    let id = campaign_in(&engine, CampaignStatus::Sent).await;
    let app = router_for(&engine);

    for action in ["send", "pause", "resume"] {
        let response = send(
            app.clone(),
            "POST",
            &format!("/campaigns/{}/{}", id.0, action),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT, "{action}");
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "invalid_state");
        assert_eq!(body["error"]["details"]["current_state"], "sent");
    }
}

#[tokio::test]
async fn actions_refused_after_shutdown() {
    let (engine, _temp) = create_test_engine().await;
    let id = campaign_in(&engine, CampaignStatus::Draft).await;
    engine.shutdown().await.unwrap();

    let response = send(
        router_for(&engine),
        "POST",
        &format!("/campaigns/{}/send", id.0),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
