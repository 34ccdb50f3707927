//! 消息工具：通知用户、询问用户、发送邮件
//!
//! 具体的交互通道与邮件投递是外部协作者：UserChannel（控制台实现为 ConsoleChannel）、
//! Mailer（SMTP 实现为 SmtpMailer）。询问用户会阻塞运行直到收到回复，不设超时。

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::core::ToolError;
use crate::tools::{ToolContext, TypedTool};

/// 与用户交互的通道
#[async_trait]
pub trait UserChannel: Send + Sync {
    /// 展示一条消息（不等待回复）
    async fn notify(&self, text: &str, attachments: &[String]);

    /// 提问并等待一行回复
    async fn ask(&self, prompt: &str, attachments: &[String]) -> Result<String, ToolError>;
}

/// 控制台通道：stdout 输出，回复从同一个带缓冲的输入流逐行读取
pub struct ConsoleChannel {
    input: Mutex<BufReader<Pin<Box<dyn AsyncRead + Send>>>>,
}

impl ConsoleChannel {
    /// 读取 stdin
    pub fn new() -> Self {
        Self::with_input(tokio::io::stdin())
    }

    pub fn with_input(input: impl AsyncRead + Send + 'static) -> Self {
        let input: Pin<Box<dyn AsyncRead + Send>> = Box::pin(input);
        Self {
            input: Mutex::new(BufReader::new(input)),
        }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserChannel for ConsoleChannel {
    async fn notify(&self, text: &str, attachments: &[String]) {
        println!("[Notify] {text}");
        if !attachments.is_empty() {
            println!("[Notify] Attachments: {}", attachments.join(", "));
        }
    }

    async fn ask(&self, prompt: &str, attachments: &[String]) -> Result<String, ToolError> {
        if !attachments.is_empty() {
            println!("[Ask] Attachments: {}", attachments.join(", "));
        }
        let mut stdout = tokio::io::stdout();
        stdout.write_all(format!("[Ask] {prompt}").as_bytes()).await?;
        stdout.flush().await?;

        let mut line = String::new();
        if self.input.lock().await.read_line(&mut line).await? == 0 {
            return Err(ToolError::Io("input closed before a reply was read".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NotifyArgs {
    pub text: String,
    /// 附件绝对路径，按重要性降序
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
}

/// message_notify_user：单向通知
pub struct NotifyUserTool {
    channel: Arc<dyn UserChannel>,
}

impl NotifyUserTool {
    pub fn new(channel: Arc<dyn UserChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl TypedTool for NotifyUserTool {
    type Args = NotifyArgs;
    const NAME: &'static str = "message_notify_user";

    fn description(&self) -> &str {
        "Send an informative message to the user (no reply expected). Use it to acknowledge requests, \
         report milestones and deliver results; attach all relevant files by absolute path."
    }

    fn describe(&self, _args: &NotifyArgs) -> String {
        "Sending notification to user".to_string()
    }

    async fn call(&self, _ctx: &ToolContext, args: NotifyArgs) -> Result<String, ToolError> {
        let attachments = args.attachments.unwrap_or_default();
        self.channel.notify(&args.text, &attachments).await;
        Ok("Message sent to user".to_string())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AskArgs {
    pub text: String,
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
    /// 可选答案；提供时不能为空列表
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

/// 拼接提问文本：有选项时以 " / " 列出
pub fn ask_prompt(text: &str, options: Option<&[String]>) -> Result<String, ToolError> {
    match options {
        Some([]) => Err(ToolError::InvalidOptions),
        Some(opts) => Ok(format!("{text}\n{}\n> ", opts.join(" / "))),
        None => Ok(format!("{text}\n> ")),
    }
}

/// message_ask_user：提问并阻塞等待回复
pub struct AskUserTool {
    channel: Arc<dyn UserChannel>,
}

impl AskUserTool {
    pub fn new(channel: Arc<dyn UserChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl TypedTool for AskUserTool {
    type Args = AskArgs;
    const NAME: &'static str = "message_ask_user";

    fn description(&self) -> &str {
        "Ask the user a question and wait for the reply. Only use when user input is necessary; \
         if options exist, list all of them in `options`."
    }

    fn describe(&self, _args: &AskArgs) -> String {
        "Asking user for input".to_string()
    }

    fn waits_for_user(&self) -> bool {
        true
    }

    async fn call(&self, _ctx: &ToolContext, args: AskArgs) -> Result<String, ToolError> {
        let prompt = ask_prompt(&args.text, args.options.as_deref())?;
        let attachments = args.attachments.unwrap_or_default();
        self.channel.ask(&prompt, &attachments).await
    }
}

/// 待发送邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    /// 含换行的头部字段名（会被拼进 SMTP 命令与邮件头）
    pub fn field_with_line_break(&self) -> Option<&'static str> {
        [("from", &self.from), ("recipient", &self.to), ("subject", &self.subject)]
            .into_iter()
            .find(|(_, value)| value.contains(['\r', '\n']))
            .map(|(field, _)| field)
    }
}

/// 邮件投递
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), String>;
}

/// 最简 SMTP 投递（无认证、无 TLS，对应本地 relay）
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    host: String,
    port: u16,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(10),
        }
    }

    async fn deliver(&self, email: &Email) -> Result<(), String> {
        if let Some(field) = email.field_with_line_break() {
            return Err(format!("{field} contains a line break"));
        }
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| format!("connect {}:{}: {}", self.host, self.port, e))?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        expect_reply(&mut reader, 220).await?;
        let steps = [
            ("EHLO localhost".to_string(), 250),
            (format!("MAIL FROM:<{}>", email.from), 250),
            (format!("RCPT TO:<{}>", email.to), 250),
            ("DATA".to_string(), 354),
        ];
        for (command, code) in steps {
            send_line(&mut writer, &command).await?;
            expect_reply(&mut reader, code).await?;
        }
        send_line(&mut writer, &format_message(email)).await?;
        send_line(&mut writer, ".").await?;
        expect_reply(&mut reader, 250).await?;
        send_line(&mut writer, "QUIT").await?;
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<(), String> {
        tokio::time::timeout(self.timeout, self.deliver(email))
            .await
            .map_err(|_| "SMTP timeout".to_string())?
    }
}

async fn send_line<W: AsyncWriteExt + Unpin>(writer: &mut W, line: &str) -> Result<(), String> {
    writer
        .write_all(format!("{line}\r\n").as_bytes())
        .await
        .map_err(|e| e.to_string())
}

/// 读取一条（可能多行的）SMTP 回复并检查状态码
async fn expect_reply<R: AsyncBufReadExt + Unpin>(reader: &mut R, code: u16) -> Result<(), String> {
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(|e| e.to_string())?;
        if n == 0 {
            return Err("SMTP connection closed".to_string());
        }
        let status: u16 = line
            .get(..3)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| format!("bad SMTP reply: {}", line.trim_end()))?;
        if status != code {
            return Err(format!("SMTP {}: {}", status, line.trim_end()));
        }
        // "250-..." 为续行，"250 ..." 为最后一行
        if line.as_bytes().get(3) != Some(&b'-') {
            return Ok(());
        }
    }
}

/// 生成 DATA 段：头部 + 正文，行首 "." 按 SMTP 规则转义
pub fn format_message(email: &Email) -> String {
    let body = email
        .body
        .lines()
        .map(|l| if l.starts_with('.') { format!(".{l}") } else { l.to_string() })
        .collect::<Vec<_>>()
        .join("\r\n");
    format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
        email.from, email.to, email.subject, body
    )
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EmailArgs {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// message_email_user：尽力投递，失败只记日志
pub struct EmailUserTool {
    mailer: Arc<dyn Mailer>,
    from: String,
}

impl EmailUserTool {
    pub fn new(mailer: Arc<dyn Mailer>, from: impl Into<String>) -> Self {
        Self {
            mailer,
            from: from.into(),
        }
    }
}

#[async_trait]
impl TypedTool for EmailUserTool {
    type Args = EmailArgs;
    const NAME: &'static str = "message_email_user";

    fn description(&self) -> &str {
        "Send an email to the recipient."
    }

    fn describe(&self, args: &EmailArgs) -> String {
        format!("Sending email to {}", args.recipient)
    }

    async fn call(&self, _ctx: &ToolContext, args: EmailArgs) -> Result<String, ToolError> {
        let email = Email {
            from: self.from.clone(),
            to: args.recipient,
            subject: args.subject,
            body: args.body,
        };
        if let Some(field) = email.field_with_line_break() {
            return Err(ToolError::ArgumentDecode {
                tool: Self::NAME.to_string(),
                message: format!("{field} must not contain line breaks"),
            });
        }
        match self.mailer.send(&email).await {
            Ok(()) => {
                tracing::info!(to = %email.to, subject = %email.subject, "email sent");
                Ok(format!("Email sent to {}", email.to))
            }
            Err(e) => {
                tracing::warn!(to = %email.to, error = %e, "email delivery failed");
                Ok(format!("Email to {} could not be delivered", email.to))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        notes: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UserChannel for RecordingChannel {
        async fn notify(&self, text: &str, _attachments: &[String]) {
            self.notes.lock().unwrap().push(text.to_string());
        }

        async fn ask(&self, prompt: &str, _attachments: &[String]) -> Result<String, ToolError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("yes".to_string())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _email: &Email) -> Result<(), String> {
            Err("relay down".to_string())
        }
    }

    #[test]
    fn test_ask_prompt_options() {
        assert_eq!(ask_prompt("Go?", None).unwrap(), "Go?\n> ");
        let opts = vec!["yes".to_string(), "no".to_string()];
        assert_eq!(ask_prompt("Go?", Some(opts.as_slice())).unwrap(), "Go?\nyes / no\n> ");
        assert_eq!(ask_prompt("Go?", Some(&[][..])).unwrap_err(), ToolError::InvalidOptions);
    }

    #[tokio::test]
    async fn test_notify_and_ask_use_channel() {
        let channel = Arc::new(RecordingChannel::default());
        let ctx = ToolContext::default();
        NotifyUserTool::new(channel.clone())
            .call(&ctx, NotifyArgs { text: "done".into(), attachments: None })
            .await
            .unwrap();
        let reply = AskUserTool::new(channel.clone())
            .call(
                &ctx,
                AskArgs {
                    text: "Continue?".into(),
                    attachments: None,
                    options: Some(vec!["yes".into(), "no".into()]),
                },
            )
            .await
            .unwrap();
        assert_eq!(reply, "yes");
        assert_eq!(*channel.notes.lock().unwrap(), vec!["done".to_string()]);
        assert!(channel.prompts.lock().unwrap()[0].contains("yes / no"));
    }

    #[tokio::test]
    async fn test_ask_rejects_empty_options() {
        let channel = Arc::new(RecordingChannel::default());
        let err = AskUserTool::new(channel.clone())
            .call(
                &ToolContext::default(),
                AskArgs { text: "?".into(), attachments: None, options: Some(vec![]) },
            )
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::InvalidOptions);
        assert!(channel.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_email_failure_is_not_propagated() {
        let tool = EmailUserTool::new(Arc::new(FailingMailer), "noreply@example.com");
        let out = tool
            .call(
                &ToolContext::default(),
                EmailArgs {
                    recipient: "a@b.c".into(),
                    subject: "s".into(),
                    body: "b".into(),
                },
            )
            .await
            .unwrap();
        assert!(out.contains("could not be delivered"));
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<Email>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &Email) -> Result<(), String> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_email_rejects_header_line_breaks() {
        let mailer = Arc::new(RecordingMailer::default());
        let tool = EmailUserTool::new(mailer.clone(), "f@x");
        let cases = [
            ("a@b>\r\nRCPT TO:<evil@x", "report"),
            ("a@b", "Hi\r\nBcc: victim@evil"),
            ("a@b", "Hi\nthere"),
        ];
        for (recipient, subject) in cases {
            let err = tool
                .call(
                    &ToolContext::default(),
                    EmailArgs {
                        recipient: recipient.into(),
                        subject: subject.into(),
                        body: "b".into(),
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::ArgumentDecode { .. }), "{recipient:?} {subject:?}");
        }
        assert!(mailer.sent.lock().unwrap().is_empty());

        tool.call(
            &ToolContext::default(),
            EmailArgs {
                recipient: "a@b".into(),
                subject: "Hi".into(),
                body: "line one\nline two".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_smtp_mailer_refuses_line_breaks_before_connecting() {
        let email = Email {
            from: "f@x".into(),
            to: "a@b>\r\nRCPT TO:<evil@x".into(),
            subject: "s".into(),
            body: "b".into(),
        };
        assert_eq!(email.field_with_line_break(), Some("recipient"));
        let err = SmtpMailer::new("127.0.0.1", 1).send(&email).await.unwrap_err();
        assert!(err.contains("line break"), "{err}");
    }

    #[tokio::test]
    async fn test_console_channel_reads_successive_replies() {
        let channel = ConsoleChannel::with_input(&b"yes\r\nno\n"[..]);
        assert_eq!(channel.ask("first?", &[]).await.unwrap(), "yes");
        assert_eq!(channel.ask("second?", &[]).await.unwrap(), "no");
        assert!(matches!(channel.ask("third?", &[]).await, Err(ToolError::Io(_))));
    }

    #[test]
    fn test_format_message_dot_stuffing() {
        let email = Email {
            from: "f@x".into(),
            to: "t@x".into(),
            subject: "Hi".into(),
            body: "line\n.hidden".into(),
        };
        let data = format_message(&email);
        assert!(data.starts_with("From: f@x\r\nTo: t@x\r\nSubject: Hi\r\n"));
        assert!(data.ends_with("line\r\n..hidden"));
    }
}
