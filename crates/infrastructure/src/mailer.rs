use application::{MailError, Mailer};
use async_trait::async_trait;
use uuid::Uuid;

/// 只把邮件写入日志的发送器，未接入 SMTP 时使用。
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl LogMailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<String, MailError> {
        if to.trim().is_empty() {
            return Err(MailError::Delivery("empty recipient".into()));
        }
        let message_id = format!("<{}@chatgpt-web.local>", Uuid::new_v4());
        tracing::info!(%to, %subject, %message_id, body_len = html_body.len(), "mail queued");
        tracing::debug!(%message_id, body = %html_body, "mail body");
        Ok(message_id)
    }
}
