//! MCP 邮件工具进程客户端
//!
//! 用 rmcp 的子进程传输启动邮件工具进程；一次会话 = 握手（initialize）→ tools/call → cancel。
//! 进程设置 kill_on_drop，提前返回或 panic 时也不会残留子进程。

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::RunningService;
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use serde_json::{json, Value};

use crate::config::MailSection;
use crate::mail::{
    parse_message_response, parse_search_response, EmailMessage, MailError, MailTransport,
};

/// 单个工具进程会话
pub struct McpSession {
    service: RunningService<RoleClient, ()>,
}

impl McpSession {
    /// 启动工具进程并完成握手
    pub async fn connect(command: &str, args: &[String]) -> Result<Self, MailError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args).stderr(Stdio::null()).kill_on_drop(true);

        let transport = TokioChildProcess::new(&mut cmd)
            .map_err(|e| MailError::Connection(format!("spawn '{command}': {e}")))?;

        let service = ()
            .serve(transport)
            .await
            .map_err(|e| MailError::Connection(format!("initialize: {e}")))?;

        Ok(Self { service })
    }

    /// 调用工具，返回 content[0].text
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, MailError> {
        let result = self
            .service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: arguments.as_object().cloned(),
            })
            .await
            .map_err(|e| service_error(name, &e.to_string()))?;

        let text = result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default();
        if result.is_error == Some(true) {
            return Err(MailError::Tool {
                tool: name.to_string(),
                message: text,
            });
        }
        Ok(text)
    }

    /// 释放会话：通知服务结束并回收子进程
    pub async fn close(self) {
        if let Err(e) = self.service.cancel().await {
            tracing::warn!("failed to stop mail server session: {}", e);
        }
    }
}

const AUTH_PHRASES: [&str; 8] = [
    "invalid token",
    "expired token",
    "access token",
    "oauth",
    "unauthorized",
    "unauthenticated",
    "credential",
    "permission denied",
];

/// 服务端错误 → MailError；明确指向鉴权的归为 Auth，会话断开归为 Connection
fn service_error(tool: &str, message: &str) -> MailError {
    let lower = message.to_lowercase();
    if AUTH_PHRASES.iter().any(|k| lower.contains(k)) {
        MailError::Auth(message.to_string())
    } else if lower.contains("transport") || lower.contains("closed") {
        MailError::Connection(format!("'{tool}': {message}"))
    } else {
        MailError::Protocol(format!("'{tool}' failed: {message}"))
    }
}

/// 每次操作一个会话的邮件传输
pub struct McpMailTransport {
    command: String,
    args: Vec<String>,
    send_tool: String,
    search_tool: String,
    get_tool: String,
    modify_tool: String,
    timeout: Duration,
}

impl McpMailTransport {
    pub fn from_config(section: &MailSection) -> Self {
        Self {
            command: section.command.clone(),
            args: section.args.clone(),
            send_tool: section.send_tool.clone(),
            search_tool: section.search_tool.clone(),
            get_tool: section.get_tool.clone(),
            modify_tool: section.modify_tool.clone(),
            timeout: Duration::from_secs(section.timeout_secs),
        }
    }

    /// 获取会话（含握手）→ 调用，两段各自限时；会话无论成败都释放；输出 JSON 审计日志
    async fn call(&self, tool: &str, arguments: Value) -> Result<String, MailError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(
            self.timeout,
            McpSession::connect(&self.command, &self.args),
        )
        .await
        {
            Ok(Ok(session)) => {
                let outcome = tokio::time::timeout(self.timeout, session.call_tool(tool, arguments))
                    .await
                    .unwrap_or_else(|_| Err(MailError::Timeout(self.timeout.as_secs())));
                session.close().await;
                outcome
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MailError::Timeout(self.timeout.as_secs())),
        };

        let audit = json!({
            "event": "mail_tool_audit",
            "tool": tool,
            "ok": result.is_ok(),
            "outcome": match &result {
                Ok(_) => "ok",
                Err(MailError::Timeout(_)) => "timeout",
                Err(_) => "error",
            },
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit, "mail");
        result
    }
}

#[async_trait]
impl MailTransport for McpMailTransport {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String, MailError> {
        self.call(
            &self.send_tool,
            json!({ "to": to, "subject": subject, "body": body }),
        )
        .await
    }

    async fn search(&self, query: &str) -> Result<Vec<String>, MailError> {
        let text = self.call(&self.search_tool, json!({ "query": query })).await?;
        parse_search_response(&text)
    }

    async fn get(&self, message_id: &str) -> Result<EmailMessage, MailError> {
        let text = self
            .call(&self.get_tool, json!({ "message_id": message_id }))
            .await?;
        parse_message_response(message_id, &text)
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), MailError> {
        self.call(
            &self.modify_tool,
            json!({ "message_id": message_id, "remove_labels": ["UNREAD"] }),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INIT_REPLY: &str = r#"{"jsonrpc":"2.0","id":__ID__,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}"#;

    /// 用 sh 脚本扮演工具进程：回应 initialize，吞掉 initialized 通知，再用调用的 id 输出 call_reply
    fn fake_server(call_reply: &str) -> MailSection {
        let reply = |tmpl: &str| {
            format!(
                "id=$(printf '%s' \"$l\" | sed -n 's/.*\"id\":\\([0-9][0-9]*\\).*/\\1/p'); printf '%s\\n' '{tmpl}' | sed \"s/__ID__/$id/\""
            )
        };
        MailSection {
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                format!(
                    "read l; {}; read l; read l; {}; read l",
                    reply(INIT_REPLY),
                    reply(call_reply)
                ),
            ],
            timeout_secs: 5,
            ..MailSection::default()
        }
    }

    #[test]
    fn test_service_error_classification() {
        let auth = service_error("send_email", "Mcp error: -32000: Invalid OAuth token");
        assert!(matches!(auth, MailError::Auth(_)));
        let denied = service_error("send_email", "permission denied for mailbox");
        assert!(matches!(denied, MailError::Auth(_)));
        let other = service_error("send_email", "Mcp error: -32601: Method not found");
        assert!(matches!(other, MailError::Protocol(m) if m.contains("-32601")));
    }

    #[test]
    fn test_parse_failures_mentioning_token_are_not_auth() {
        let err = service_error("search_emails", "Unexpected token in JSON at position 4");
        assert!(matches!(err, MailError::Protocol(_)));
        let err = service_error("search_emails", "max tokens exceeded");
        assert!(matches!(err, MailError::Protocol(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_through_session() {
        let transport = McpMailTransport::from_config(&fake_server(
            r#"{"jsonrpc":"2.0","id":__ID__,"result":{"content":[{"type":"text","text":"sent id=abc"}]}}"#,
        ));
        let receipt = transport
            .send("bob@example.com", "Purchase Order Request", "Dear Bob")
            .await
            .unwrap();
        assert_eq!(receipt, "sent id=abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_search_parses_message_ids() {
        let transport = McpMailTransport::from_config(&fake_server(
            r#"{"jsonrpc":"2.0","id":__ID__,"result":{"content":[{"type":"text","text":"{\"messages\":[{\"id\":\"m1\"}]}"}]}}"#,
        ));
        assert_eq!(transport.search("is:unread").await.unwrap(), vec!["m1"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_auth_error_is_typed() {
        let transport = McpMailTransport::from_config(&fake_server(
            r#"{"jsonrpc":"2.0","id":__ID__,"error":{"code":-32000,"message":"Missing credentials"}}"#,
        ));
        let err = transport.send("a@b.com", "s", "b").await.unwrap_err();
        assert!(matches!(err, MailError::Auth(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_exit_is_connection_error() {
        let section = MailSection {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "exit 0".to_string()],
            timeout_secs: 5,
            ..MailSection::default()
        };
        let err = McpMailTransport::from_config(&section)
            .search("is:unread")
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Connection(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_connection_error() {
        let section = MailSection {
            command: "procure-no-such-mail-server".to_string(),
            args: vec![],
            ..MailSection::default()
        };
        let err = McpMailTransport::from_config(&section)
            .send("a@b.com", "s", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Connection(_)));
    }
}
