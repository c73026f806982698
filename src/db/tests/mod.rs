mod campaigns;

use crate::db::{Database, NewBrand};
use crate::types::{BrandId, CampaignId, ContactListId, NewCampaign, ProviderCredentials};

/// Insert a brand plus a draft campaign targeting `lists`
pub(super) async fn seed_campaign(db: &Database, lists: Vec<ContactListId>) -> CampaignId {
    let brand = seed_brand(db).await;
    db.insert_campaign(&NewCampaign {
        brand_id: brand,
        name: "October newsletter".into(),
        subject: "News".into(),
        html_body: "<p>Hello {{name}}</p>".into(),
        contact_list_ids: lists,
        ..Default::default()
    })
    .await
    .unwrap()
}

pub(super) async fn seed_brand(db: &Database) -> BrandId {
    db.insert_brand(&NewBrand {
        name: "Acme".into(),
        from_name: "Acme News".into(),
        from_email: "news@acme.test".into(),
        reply_to: Some("support@acme.test".into()),
        credentials: ProviderCredentials {
            access_key: "AKIA123".into(),
            secret_key: "plain-secret".into(),
            region: "eu-west-1".into(),
        },
    })
    .await
    .unwrap()
}
