use crate::db::*;
use crate::error::{CampaignError, Error};
use crate::types::{CampaignId, CampaignStatus, ContactListId};
use tempfile::NamedTempFile;

use super::seed_campaign;

#[tokio::test]
async fn test_insert_and_get_campaign() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = seed_campaign(&db, vec![ContactListId(4), ContactListId(7)]).await;
    let campaign = db.get_campaign(id).await.unwrap().unwrap();

    assert_eq!(campaign.id, id);
    assert_eq!(campaign.status, CampaignStatus::Draft);
    assert_eq!(
        campaign.contact_list_ids,
        vec![ContactListId(4), ContactListId(7)]
    );
    assert_eq!(campaign.stats.processed, 0);
    assert!(!campaign.checkpoint.has_more_to_process);
    assert!(campaign.sent_at.is_none());

    assert!(db.get_campaign(CampaignId(999)).await.unwrap().is_none());

    db.close().await;
}

#[tokio::test]
async fn test_require_campaign_not_found() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let err = db.require_campaign(CampaignId(42)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Campaign(CampaignError::NotFound { id }) if id == CampaignId(42)
    ));

    db.close().await;
}

#[tokio::test]
async fn test_transition_only_from_allowed_states() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = seed_campaign(&db, vec![]).await;

    // draft -> sending is not allowed by this call
    let moved = db
        .transition_campaign_status(id, &[CampaignStatus::Queued], CampaignStatus::Sending)
        .await
        .unwrap();
    assert!(!moved);
    assert_eq!(
        db.get_campaign_status(id).await.unwrap(),
        Some(CampaignStatus::Draft)
    );

    let moved = db
        .transition_campaign_status(id, &[CampaignStatus::Draft], CampaignStatus::Queued)
        .await
        .unwrap();
    assert!(moved);
    assert_eq!(
        db.get_campaign_status(id).await.unwrap(),
        Some(CampaignStatus::Queued)
    );

    // Empty source set never matches
    assert!(
        !db.transition_campaign_status(id, &[], CampaignStatus::Sent)
            .await
            .unwrap()
    );

    db.close().await;
}

#[tokio::test]
async fn test_record_batch_advances_cursor_and_counters_together() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = seed_campaign(&db, vec![ContactListId(1)]).await;

    db.reset_checkpoint_for_new_send(id, 1_700_000_000)
        .await
        .unwrap();
    assert!(db.commit_checkpoint_position(id, 0, 0).await.unwrap());

    let outcome = BatchOutcome {
        processed: 28,
        sent: 27,
        bounced: 1,
    };
    db.record_batch(id, 0, 28, &outcome).await.unwrap();
    db.record_batch(id, 0, 56, &outcome).await.unwrap();

    let campaign = db.require_campaign(id).await.unwrap();
    assert_eq!(campaign.checkpoint.list_index, 0);
    assert_eq!(campaign.checkpoint.contact_index, 56);
    assert_eq!(campaign.checkpoint.processed_batches, 2);
    assert!(campaign.checkpoint.has_more_to_process);
    assert_eq!(campaign.stats.processed, 56);
    assert_eq!(campaign.stats.sent, 54);
    assert_eq!(campaign.stats.bounces, 2);
    assert!(campaign.checkpoint.started_at.is_some());

    db.close().await;
}

#[tokio::test]
async fn test_checkpoint_never_moves_backwards() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = seed_campaign(&db, vec![ContactListId(1), ContactListId(2)]).await;

    db.reset_checkpoint_for_new_send(id, 0).await.unwrap();
    assert!(db.commit_checkpoint_position(id, 0, 100).await.unwrap());
    assert!(!db.commit_checkpoint_position(id, 0, 50).await.unwrap());

    db.advance_to_list(id, 1).await.unwrap();
    assert!(!db.commit_checkpoint_position(id, 0, 500).await.unwrap());
    // Re-committing the same position is allowed
    assert!(db.commit_checkpoint_position(id, 1, 0).await.unwrap());

    // advance_to_list is guarded as well
    db.advance_to_list(id, 0).await.unwrap();

    let campaign = db.require_campaign(id).await.unwrap();
    assert_eq!(campaign.checkpoint.list_index, 1);
    assert_eq!(campaign.checkpoint.contact_index, 0);

    db.close().await;
}

#[tokio::test]
async fn test_reset_keeps_failed_counter() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = seed_campaign(&db, vec![ContactListId(1)]).await;

    sqlx::query("UPDATE campaigns SET stat_failed = 3, stat_sent = 9 WHERE id = ?")
        .bind(id)
        .execute(db.pool())
        .await
        .unwrap();

    db.reset_checkpoint_for_new_send(id, 0).await.unwrap();

    let campaign = db.require_campaign(id).await.unwrap();
    assert_eq!(campaign.stats.sent, 0);
    assert_eq!(campaign.stats.failed, 3);

    db.close().await;
}

#[tokio::test]
async fn test_mark_sent_and_failed() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = seed_campaign(&db, vec![ContactListId(1)]).await;

    // Draft campaigns are not failed by the dispatcher
    assert!(!db.mark_campaign_failed(id, "boom").await.unwrap());

    db.transition_campaign_status(id, &[CampaignStatus::Draft], CampaignStatus::Sending)
        .await
        .unwrap();
    assert!(db.mark_campaign_failed(id, "boom").await.unwrap());

    let campaign = db.require_campaign(id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);
    assert_eq!(campaign.error_message.as_deref(), Some("boom"));
    assert!(campaign.checkpoint.has_more_to_process);

    db.mark_campaign_sent(id).await.unwrap();
    let campaign = db.require_campaign(id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Sent);
    assert!(campaign.sent_at.is_some());
    assert!(campaign.error_message.is_none());
    assert!(!campaign.checkpoint.has_more_to_process);

    db.close().await;
}

#[tokio::test]
async fn test_list_due_campaigns() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let due = seed_campaign(&db, vec![]).await;
    let later = seed_campaign(&db, vec![]).await;
    let unscheduled = seed_campaign(&db, vec![]).await;
    let already_queued = seed_campaign(&db, vec![]).await;

    for (id, at) in [(due, 1_000), (later, 5_000), (already_queued, 500)] {
        sqlx::query("UPDATE campaigns SET scheduled_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
    }
    db.transition_campaign_status(
        already_queued,
        &[CampaignStatus::Draft],
        CampaignStatus::Queued,
    )
    .await
    .unwrap();

    let ids = db.list_due_campaigns(2_000).await.unwrap();
    assert_eq!(ids, vec![due]);
    assert!(!ids.contains(&unscheduled));

    db.close().await;
}
