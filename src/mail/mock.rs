//! 记录型邮件传输（用于测试与离线演示，不联网）
//!
//! 发送的邮件被记录下来；收件箱可预置；设置 failure 后所有操作都返回该错误。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::mail::{EmailMessage, MailError, MailTransport};

/// 一封被「发送」的邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct Mailbox {
    sent: Vec<SentMail>,
    /// (邮件, 是否未读)
    inbox: Vec<(EmailMessage, bool)>,
}

#[derive(Debug, Default)]
pub struct RecordingMailTransport {
    mailbox: Mutex<Mailbox>,
    failure: Option<MailError>,
}

impl RecordingMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有操作都失败的传输（模拟未鉴权 / 连不上）
    pub fn failing(error: MailError) -> Self {
        Self {
            mailbox: Mutex::default(),
            failure: Some(error),
        }
    }

    /// 预置一封未读邮件
    pub fn with_unread(self, message: EmailMessage) -> Self {
        self.mailbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .inbox
            .push((message, true));
        self
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.mailbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sent
            .clone()
    }

    pub fn unread_ids(&self) -> Vec<String> {
        self.mailbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .inbox
            .iter()
            .filter(|(_, unread)| *unread)
            .map(|(m, _)| m.id.clone())
            .collect()
    }

    fn check(&self) -> Result<(), MailError> {
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MailTransport for RecordingMailTransport {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, MailError> {
        self.check()?;
        let mut mailbox = self.mailbox.lock().unwrap_or_else(|e| e.into_inner());
        mailbox.sent.push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(format!("recorded message #{} to {}", mailbox.sent.len(), to))
    }

    /// 查询语句被忽略，返回全部未读
    async fn search(&self, _query: &str) -> Result<Vec<String>, MailError> {
        self.check()?;
        Ok(self.unread_ids())
    }

    async fn get(&self, message_id: &str) -> Result<EmailMessage, MailError> {
        self.check()?;
        self.mailbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .inbox
            .iter()
            .find(|(m, _)| m.id == message_id)
            .map(|(m, _)| m.clone())
            .ok_or_else(|| MailError::Tool {
                tool: "get".to_string(),
                message: format!("no message {message_id}"),
            })
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), MailError> {
        self.check()?;
        let mut mailbox = self.mailbox.lock().unwrap_or_else(|e| e.into_inner());
        for (m, unread) in mailbox.inbox.iter_mut() {
            if m.id == message_id {
                *unread = false;
            }
        }
        Ok(())
    }
}
