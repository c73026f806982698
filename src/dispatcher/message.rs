//! Per-contact message rendering.

use crate::provider::OutgoingMessage;
use crate::types::{Campaign, Contact, SendJobPayload};

/// Sender, subject and bodies shared by every message of a send
#[derive(Clone, Debug)]
pub struct MessageTemplate {
    from_name: String,
    from_email: String,
    reply_to: Option<String>,
    subject: String,
    html_body: String,
    text_body: Option<String>,
}

impl MessageTemplate {
    /// Sender fields from the job payload, bodies from the campaign
    pub fn new(payload: &SendJobPayload, campaign: &Campaign) -> Self {
        Self {
            from_name: payload.from_name.clone(),
            from_email: payload.from_email.clone(),
            reply_to: payload.reply_to.clone(),
            subject: payload.subject.clone(),
            html_body: campaign.html_body.clone(),
            text_body: campaign.text_body.clone(),
        }
    }

    /// Render the message for one contact
    pub fn render(&self, contact: &Contact) -> OutgoingMessage {
        let name = contact.name.as_deref().unwrap_or("");
        let fill = |text: &str| substitute(text, name, &contact.email);

        OutgoingMessage {
            from_name: self.from_name.clone(),
            from_email: self.from_email.clone(),
            to: contact.email.clone(),
            subject: fill(&self.subject),
            html_body: fill(&self.html_body),
            text_body: self.text_body.as_deref().map(fill),
            reply_to: self.reply_to.clone(),
        }
    }
}

fn substitute(text: &str, name: &str, email: &str) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }
    text.replace("{{name}}", name).replace("{{email}}", email)
}
