//! SMTP email delivery through lettre.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use freerange_core::config::EmailProviderConfig;
use freerange_core::{Application, Channel, Notification, User};

use super::{Provider, ProviderErrorKind, ProviderResponse};

const PROVIDER_NAME: &str = "smtp";

pub struct EmailProvider {
    config: EmailProviderConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailProvider {
    pub fn new(config: EmailProviderConfig) -> Self {
        let transport = if config.enabled {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            let builder = if config.use_tls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                    &config.smtp_host,
                ))
            };
            match builder {
                Ok(builder) => Some(
                    builder
                        .credentials(creds)
                        .port(config.smtp_port)
                        .timeout(Some(std::time::Duration::from_secs(config.timeout_secs)))
                        .build(),
                ),
                Err(e) => {
                    tracing::error!(error = %e, "failed to build SMTP transport");
                    None
                }
            }
        } else {
            None
        };
        Self { config, transport }
    }
}

#[async_trait::async_trait]
impl Provider for EmailProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn healthy(&self) -> bool {
        self.config.enabled && self.transport.is_some()
    }

    async fn send(
        &self,
        notification: &Notification,
        user: &User,
        _app: &Application,
    ) -> ProviderResponse {
        let Some(transport) = &self.transport else {
            return ProviderResponse::failure(
                PROVIDER_NAME,
                ProviderErrorKind::Permanent,
                "email provider disabled",
            );
        };

        let Some(to_addr) = user.email.as_deref() else {
            return ProviderResponse::failure(
                PROVIDER_NAME,
                ProviderErrorKind::Invalid,
                "user has no email address",
            );
        };

        let from: Mailbox = match format!("{} <{}>", self.config.from_name, self.config.from_address)
            .parse()
        {
            Ok(mailbox) => mailbox,
            Err(e) => {
                return ProviderResponse::failure(
                    PROVIDER_NAME,
                    ProviderErrorKind::Permanent,
                    format!("invalid from address: {}", e),
                )
            }
        };
        let to: Mailbox = match to_addr.parse() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                return ProviderResponse::failure(
                    PROVIDER_NAME,
                    ProviderErrorKind::Invalid,
                    format!("invalid recipient address {:?}: {}", to_addr, e),
                )
            }
        };

        let message = match Message::builder()
            .from(from)
            .to(to)
            .subject(&notification.content.title)
            .body(notification.content.body.clone())
        {
            Ok(message) => message,
            Err(e) => {
                return ProviderResponse::failure(
                    PROVIDER_NAME,
                    ProviderErrorKind::Invalid,
                    format!("failed to build message: {}", e),
                )
            }
        };

        match transport.send(message).await {
            Ok(response) => {
                debug!(
                    notification_id = %notification.notification_id,
                    code = ?response.code(),
                    "email accepted by relay"
                );
                ProviderResponse::ok(PROVIDER_NAME)
            }
            Err(e) => {
                let kind = if e.is_permanent() {
                    ProviderErrorKind::Permanent
                } else {
                    ProviderErrorKind::Transient
                };
                ProviderResponse::failure(PROVIDER_NAME, kind, e.to_string())
            }
        }
    }
}
