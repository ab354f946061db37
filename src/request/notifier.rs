//! Request notifications
//!
//! Messages are rendered from explicit data only; there is no ambient page or
//! renderer. Delivery goes through the [`MessageSink`] port, and a failed delivery
//! is reported back rather than raised, since it must never undo a completed request.

use crate::error::PrivacyError;
use crate::privacy::archive::DownloadLink;
use crate::request::model::{DataRequest, RequestType};
use crate::types::UserId;
use crate::users::{Authority, UserDirectory, UserRecord};
use async_trait::async_trait;
use chrono::TimeZone;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Message kind for processing results
pub const RESULTS_MESSAGE: &str = "datarequestprocessingresults";
/// Message kind for new requests awaiting a DPO
pub const DPO_MESSAGE: &str = "contactdataprotectionofficer";

/// A rendered message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    pub to: UserId,
    pub from: Option<UserId>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub context_url: Option<String>,
    /// Notifications are shown as alerts rather than conversations
    pub notification: bool,
}

/// Delivery port
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_in_app(&self, message: &Message) -> anyhow::Result<()>;

    /// Email goes straight to the address, even if the account is about to be removed.
    async fn send_email(&self, recipient: &UserRecord, message: &Message) -> anyhow::Result<()>;
}

/// Sink that writes messages to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl MessageSink for TracingSink {
    async fn send_in_app(&self, message: &Message) -> anyhow::Result<()> {
        info!(to = %message.to, kind = %message.name, subject = %message.subject, "In-app message");
        Ok(())
    }

    async fn send_email(&self, recipient: &UserRecord, message: &Message) -> anyhow::Result<()> {
        info!(to = %recipient.email, kind = %message.name, subject = %message.subject, "Email message");
        Ok(())
    }
}

/// Site-level values used in rendered messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub site_name: String,
    /// Page listing the user's data requests
    pub requests_url: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            site_name: "Learning Platform".to_string(),
            requests_url: "http://localhost/admin/tool/dataprivacy/mydatarequests.php".to_string(),
        }
    }
}

/// Everything the results message shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsMessageData<'a> {
    pub recipient_name: &'a str,
    pub message: String,
    pub download_link: Option<&'a DownloadLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub html: String,
}

pub fn render_results(data: &ResultsMessageData<'_>) -> RenderedMessage {
    let mut text = format!("Hi {},\n\n{}\n", data.recipient_name, data.message);
    let mut html = format!(
        "<p>Hi {},</p>\n<p>{}</p>\n",
        escape_html(data.recipient_name),
        escape_html(&data.message)
    );
    if let Some(link) = data.download_link {
        let expires = link.expires_at.format("%Y-%m-%d %H:%M UTC");
        text.push_str(&format!("\nDownload: {}\n(available until {})\n", link.url, expires));
        html.push_str(&format!(
            "<p><a href=\"{}\">Download</a></p>\n<p>Available until {}.</p>\n",
            escape_html(&link.url),
            expires
        ));
    }
    RenderedMessage { text, html }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn format_millis(ms: u64) -> String {
    chrono::Utc
        .timestamp_millis_opt(ms as i64)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn type_label(request_type: RequestType) -> &'static str {
    match request_type {
        RequestType::Export => "Export all of my personal data",
        RequestType::Delete => "Delete all of my personal data",
    }
}

/// Who received the results message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub subject_notified: bool,
    pub requester_notified: bool,
    pub errors: Vec<String>,
}

pub struct Notifier {
    sink: Arc<dyn MessageSink>,
    users: Arc<dyn UserDirectory>,
    authority: Arc<dyn Authority>,
    settings: NotificationSettings,
}

impl Notifier {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        users: Arc<dyn UserDirectory>,
        authority: Arc<dyn Authority>,
        settings: NotificationSettings,
    ) -> Self {
        Self {
            sink,
            users,
            authority,
            settings,
        }
    }

    /// Tell the subject, and possibly the requester, that the request was processed.
    ///
    /// The requester gets a copy only when they are neither the subject nor a site
    /// DPO and may still file requests for the subject at send time.
    pub async fn notify_result(
        &self,
        request: &DataRequest,
        subject: &UserRecord,
        download_link: Option<&DownloadLink>,
        email_only: bool,
    ) -> NotifyReport {
        let mut report = NotifyReport::default();
        let sender = request
            .dpo
            .or_else(|| self.authority.site_dpos().first().copied())
            .and_then(|id| self.users.get_user(id));

        let message_body = match request.request_type {
            RequestType::Export => format!(
                "Your copy of your personal data in {} that you recently requested is now available for download.",
                self.settings.site_name
            ),
            RequestType::Delete => format!(
                "The request you made to have your account and personal data in {} deleted has now been processed.",
                self.settings.site_name
            ),
        };
        let subject_line = format!("Data request: {}", type_label(request.request_type));

        let build = |recipient: &UserRecord| -> Message {
            let rendered = render_results(&ResultsMessageData {
                recipient_name: &recipient.fullname,
                message: message_body.clone(),
                download_link,
            });
            Message {
                name: RESULTS_MESSAGE.to_string(),
                to: recipient.id,
                from: sender.as_ref().map(|s| s.id),
                reply_to: sender.as_ref().map(|s| s.email.clone()),
                subject: subject_line.clone(),
                text: rendered.text,
                html: rendered.html,
                context_url: (!email_only).then(|| self.settings.requests_url.clone()),
                notification: request.request_type == RequestType::Export,
            }
        };

        match self.deliver(subject, &build(subject), email_only).await {
            Ok(()) => {
                report.subject_notified = true;
                info!(request_id = %request.id, user_id = %subject.id, email_only, "Results sent to subject");
            }
            Err(e) => {
                warn!(request_id = %request.id, user_id = %subject.id, error = %e, "Failed to notify subject");
                report.errors.push(e.to_string());
            }
        }

        let requester_id = request.requested_by;
        if requester_id != subject.id
            && !self.authority.is_site_dpo(requester_id)
            && self.authority.can_request_for(requester_id, subject.id)
        {
            match self.users.get_user(requester_id) {
                Some(requester) => match self.deliver(&requester, &build(&requester), email_only).await {
                    Ok(()) => {
                        report.requester_notified = true;
                        info!(request_id = %request.id, user_id = %requester.id, "Results sent to requester");
                    }
                    Err(e) => {
                        warn!(request_id = %request.id, user_id = %requester.id, error = %e, "Failed to notify requester");
                        report.errors.push(e.to_string());
                    }
                },
                None => report
                    .errors
                    .push(format!("requester {} no longer exists", requester_id)),
            }
        }

        report
    }

    /// Tell one DPO that a request awaits approval.
    pub async fn notify_dpo(&self, dpo: &UserRecord, request: &DataRequest) -> Result<(), PrivacyError> {
        let requester = self.users.get_user(request.requested_by);
        let requester_name = requester
            .as_ref()
            .map(|u| u.fullname.clone())
            .unwrap_or_else(|| format!("User {}", request.requested_by));
        let subject_name = if request.requested_by == request.subject {
            requester_name.clone()
        } else {
            self.users
                .get_user(request.subject)
                .map(|u| u.fullname)
                .unwrap_or_else(|| format!("User {}", request.subject))
        };
        let type_text = type_label(request.request_type);
        let date = format_millis(request.created_at_ms);

        let mut text = format!(
            "Hi {},\n\n{} has made the following data request:\n\nType: {}\nRequested for: {}\nDate: {}\n",
            dpo.fullname, requester_name, type_text, subject_name, date
        );
        let mut html = format!(
            "<p>Hi {},</p>\n<p>{} has made the following data request:</p>\n<ul>\n<li>Type: {}</li>\n<li>Requested for: {}</li>\n<li>Date: {}</li>\n",
            escape_html(&dpo.fullname),
            escape_html(&requester_name),
            type_text,
            escape_html(&subject_name),
            date
        );
        if !request.comments.trim().is_empty() {
            text.push_str(&format!("Comments: {}\n", request.comments));
            html.push_str(&format!("<li>Comments: {}</li>\n", escape_html(&request.comments)));
        }
        html.push_str("</ul>\n");
        text.push_str(&format!("\nReview data requests: {}\n", self.settings.requests_url));
        html.push_str(&format!(
            "<p><a href=\"{}\">Review data requests</a></p>\n",
            escape_html(&self.settings.requests_url)
        ));

        let message = Message {
            name: DPO_MESSAGE.to_string(),
            to: dpo.id,
            from: Some(request.requested_by),
            reply_to: requester.map(|u| u.email),
            subject: format!("Data request: {}", type_text),
            text,
            html,
            context_url: Some(self.settings.requests_url.clone()),
            notification: true,
        };
        self.sink
            .send_in_app(&message)
            .await
            .map_err(|e| PrivacyError::Notification(e.to_string()))
    }

    /// Notify every site DPO; returns how many were reached.
    pub async fn notify_dpos(&self, request: &DataRequest) -> usize {
        let mut sent = 0;
        for dpo_id in self.authority.site_dpos() {
            let Some(dpo) = self.users.get_user(dpo_id) else {
                continue;
            };
            match self.notify_dpo(&dpo, request).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(request_id = %request.id, dpo = %dpo_id, error = %e, "Failed to notify DPO"),
            }
        }
        sent
    }

    async fn deliver(&self, recipient: &UserRecord, message: &Message, email_only: bool) -> anyhow::Result<()> {
        if email_only {
            self.sink.send_email(recipient, message).await
        } else {
            self.sink.send_in_app(message).await
        }
    }
}
