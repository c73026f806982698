//! Shared fixtures for engine-level tests: an in-memory mail transport and
//! database seeding.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;

use crate::db::{Database, NewBrand};
use crate::error::{ProviderError, Result};
use crate::provider::{MailTransport, MessageId, OutgoingMessage, SendQuota, TransportFactory};
use crate::types::{
    BrandId, CampaignId, CampaignStatus, ContactId, ContactListId, ContactStatus, NewCampaign,
    ProviderCredentials, SendJobPayload,
};

/// Transport that records messages and can be scripted to fail
pub(crate) struct MockTransport {
    pub quota: Mutex<std::result::Result<SendQuota, ProviderError>>,
    pub attempts: Mutex<Vec<String>>,
    pub delivered: Mutex<Vec<OutgoingMessage>>,
    pub reject: Mutex<HashSet<String>>,
    /// Fail the send with this zero-based attempt index, once
    pub fail_at: Mutex<Option<(usize, ProviderError)>>,
    /// Pause the campaign while sending this zero-based attempt index
    pub pause_at: Mutex<Option<(usize, Arc<Database>, CampaignId)>>,
    /// Change contact statuses while sending this zero-based attempt index
    pub suppress_at: Mutex<Option<(usize, Arc<Database>, Vec<(ContactId, ContactStatus)>)>>,
}

impl MockTransport {
    pub fn new(max_send_rate: f64) -> Arc<Self> {
        Arc::new(Self {
            quota: Mutex::new(Ok(SendQuota {
                max_send_rate,
                max_24_hour_send: 1_000_000.0,
                sent_last_24_hours: 0.0,
            })),
            attempts: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            reject: Mutex::new(HashSet::new()),
            fail_at: Mutex::new(None),
            pause_at: Mutex::new(None),
            suppress_at: Mutex::new(None),
        })
    }

    pub fn attempted(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn delivered_to(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.to.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl MailTransport for MockTransport {
    async fn get_send_quota(&self) -> std::result::Result<SendQuota, ProviderError> {
        self.quota.lock().unwrap().clone()
    }

    async fn send(&self, message: &OutgoingMessage) -> std::result::Result<MessageId, ProviderError> {
        let index = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(message.to.clone());
            attempts.len() - 1
        };

        let pause = {
            let mut pause_at = self.pause_at.lock().unwrap();
            match pause_at.as_ref() {
                Some((at, _, _)) if *at == index => pause_at.take(),
                _ => None,
            }
        };
        if let Some((_, db, campaign_id)) = pause {
            db.transition_campaign_status(
                campaign_id,
                &[CampaignStatus::Sending],
                CampaignStatus::Paused,
            )
            .await
            .unwrap();
        }

        let suppress = {
            let mut suppress_at = self.suppress_at.lock().unwrap();
            match suppress_at.as_ref() {
                Some((at, _, _)) if *at == index => suppress_at.take(),
                _ => None,
            }
        };
        if let Some((_, db, changes)) = suppress {
            for (id, status) in changes {
                db.set_contact_status(id, status).await.unwrap();
            }
        }

        {
            let mut fail_at = self.fail_at.lock().unwrap();
            if matches!(fail_at.as_ref(), Some((at, _)) if *at == index) {
                let (_, error) = fail_at.take().unwrap();
                return Err(error);
            }
        }

        if self.reject.lock().unwrap().contains(&message.to) {
            return Err(ProviderError::Rejected {
                recipient: message.to.clone(),
                reason: "mailbox unavailable".into(),
            });
        }

        self.delivered.lock().unwrap().push(message.clone());
        Ok(MessageId(format!("msg-{}", index)))
    }
}

/// Factory handing out one shared [`MockTransport`]
pub(crate) struct MockTransportFactory {
    pub transport: Arc<MockTransport>,
    pub credentials: Mutex<Vec<ProviderCredentials>>,
}

impl MockTransportFactory {
    pub fn new(transport: Arc<MockTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            credentials: Mutex::new(Vec::new()),
        })
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, credentials: &ProviderCredentials) -> Result<Arc<dyn MailTransport>> {
        self.credentials.lock().unwrap().push(credentials.clone());
        Ok(self.transport.clone())
    }
}

pub(crate) async fn temp_db() -> (NamedTempFile, Arc<Database>) {
    let temp = NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(temp.path()).await.unwrap());
    (temp, db)
}

pub(crate) fn test_credentials() -> ProviderCredentials {
    ProviderCredentials {
        access_key: "AKIATEST".into(),
        secret_key: "secret".into(),
        region: "eu-west-1".into(),
    }
}

pub(crate) async fn insert_brand(db: &Database) -> BrandId {
    db.insert_brand(&NewBrand {
        name: "Acme".into(),
        from_name: "Acme News".into(),
        from_email: "news@acme.test".into(),
        reply_to: Some("reply@acme.test".into()),
        credentials: test_credentials(),
    })
    .await
    .unwrap()
}

/// Create one list per entry of `sizes`, with contacts `l<list>-c<n>@example.test`
pub(crate) async fn insert_lists(db: &Database, sizes: &[usize]) -> Vec<ContactListId> {
    let mut lists = Vec::with_capacity(sizes.len());
    for (l, size) in sizes.iter().enumerate() {
        let list = db.insert_contact_list(&format!("list {}", l)).await.unwrap();
        let contacts: Vec<(String, Option<String>)> = (0..*size)
            .map(|n| (format!("l{}-c{}@example.test", l, n), Some(format!("Contact {}", n))))
            .collect();
        db.insert_contacts(list, &contacts).await.unwrap();
        lists.push(list);
    }
    lists
}

/// Id of the member at `position` in `list`
pub(crate) async fn member_id(db: &Database, list: ContactListId, position: u64) -> ContactId {
    db.fetch_list_contacts(list, position, 1).await.unwrap()[0].id
}

/// Insert a campaign in `status` targeting `lists`
pub(crate) async fn insert_campaign(
    db: &Database,
    brand: BrandId,
    lists: Vec<ContactListId>,
    status: CampaignStatus,
) -> CampaignId {
    let id = db
        .insert_campaign(&NewCampaign {
            brand_id: brand,
            name: "Launch".into(),
            subject: "Hello {{name}}".into(),
            html_body: "<p>Hi {{name}}, this went to {{email}}</p>".into(),
            text_body: Some("Hi {{name}}".into()),
            contact_list_ids: lists,
            ..Default::default()
        })
        .await
        .unwrap();

    if status != CampaignStatus::Draft {
        db.transition_campaign_status(id, &[CampaignStatus::Draft], status)
            .await
            .unwrap();
    }
    id
}

pub(crate) fn send_payload(campaign_id: CampaignId, brand: BrandId, lists: Vec<ContactListId>) -> SendJobPayload {
    SendJobPayload {
        campaign_id,
        brand_id: brand,
        user_id: None,
        contact_list_ids: lists,
        from_name: "Acme News".into(),
        from_email: "news@acme.test".into(),
        reply_to: None,
        subject: "Hello {{name}}".into(),
        provider_credentials: test_credentials(),
    }
}
