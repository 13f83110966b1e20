//! IMAP implementation of [`Mailbox`].

use std::time::Duration;

use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{AuthType, MailboxConfig};
use crate::secrets::resolve_secret;

use super::error::{EmailError, Result};
use super::{FetchedMessage, Mailbox, SearchCriteria};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type AsyncTcpStream = async_io::Async<std::net::TcpStream>;
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

struct XOAuth2Authenticator {
    response: String,
}

impl async_imap::Authenticator for XOAuth2Authenticator {
    type Response = String;

    fn process(&mut self, _data: &[u8]) -> Self::Response {
        std::mem::take(&mut self.response)
    }
}

/// `user=<user>^Aauth=Bearer <token>^A^A`, base64 encoded.
fn xoauth2_response(username: &str, access_token: &SecretString) -> String {
    let auth_string = format!(
        "user={}\x01auth=Bearer {}\x01\x01",
        username,
        access_token.expose_secret()
    );
    base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        auth_string.as_bytes(),
    )
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// One TLS IMAP session on the configured folder.
pub struct ImapMailbox {
    session: Option<Session<TlsStream>>,
    config: MailboxConfig,
    uid_validity: Option<u32>,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            session: None,
            config,
            uid_validity: None,
        }
    }

    fn session(&mut self) -> Result<&mut Session<TlsStream>> {
        self.session.as_mut().ok_or(EmailError::NotConnected)
    }

    async fn open_session(&self) -> Result<Session<TlsStream>> {
        if !self.config.use_tls {
            return Err(EmailError::ConfigError(
                "TLS is required for secure email connections".to_string(),
            ));
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to IMAP server at {}", addr);

        let tcp_stream = AsyncTcpStream::connect(
            std::net::ToSocketAddrs::to_socket_addrs(&addr)
                .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?
                .next()
                .ok_or_else(|| {
                    EmailError::ConnectionFailed(format!("No address found for {}", addr))
                })?,
        )
        .await
        .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;

        let tls_stream = TlsConnector::new()
            .connect(&self.config.host, tcp_stream)
            .await?;
        let client = async_imap::Client::new(tls_stream);

        match self.config.auth.auth_type {
            AuthType::Password => {
                let auth = &self.config.auth;
                if auth.password.is_some() {
                    warn!("Using a direct password value; prefer password_env_var or password_file");
                }
                let password = resolve_secret(
                    auth.password.as_deref(),
                    auth.password_file.as_deref(),
                    auth.password_env_var.as_deref(),
                )?;
                client
                    .login(&self.config.username, password.expose_secret())
                    .await
                    .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))
            }
            AuthType::OAuth2 => {
                let auth = &self.config.auth;
                let token = resolve_secret(
                    auth.access_token.as_deref(),
                    auth.access_token_file.as_deref(),
                    auth.access_token_env_var.as_deref(),
                )?;
                let response = xoauth2_response(&self.config.username, &token);
                client
                    .authenticate("XOAUTH2", XOAuth2Authenticator { response })
                    .await
                    .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Reusing IMAP session");
            return Ok(());
        }

        let mut session = tokio::time::timeout(CONNECT_TIMEOUT, self.open_session())
            .await
            .map_err(|_| EmailError::Timeout(format!("connect to {}", self.config.host)))??;

        let folder = self.config.folder.clone();
        let mailbox = session.select(&folder).await.map_err(|e| {
            let message = e.to_string();
            if message.contains("doesn't exist") || message.contains("NO") {
                EmailError::FolderNotFound(folder.clone())
            } else {
                EmailError::ProtocolError(message)
            }
        })?;

        self.uid_validity = mailbox.uid_validity;
        debug!(
            "Selected '{}' (UIDVALIDITY={:?}, {} messages)",
            folder, mailbox.uid_validity, mailbox.exists
        );
        self.session = Some(session);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn folder(&self) -> &str {
        &self.config.folder
    }

    fn uid_validity(&self) -> Option<u32> {
        self.uid_validity
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        let query = criteria.to_imap_query();
        debug!("Searching with query: {}", query);

        let uids = self
            .session()?
            .uid_search(&query)
            .await
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<Result<FetchedMessage>>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let set = uid_set(uids);
        debug!("Fetching {} messages", uids.len());

        let session = self.session()?;
        let mut stream = session
            .uid_fetch(&set, "(UID BODY.PEEK[])")
            .await
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        let mut results = Vec::with_capacity(uids.len());
        while let Some(item) = stream.next().await {
            results.push(match item {
                Ok(message) => match (message.uid, message.body()) {
                    (Some(uid), Some(body)) => Ok(FetchedMessage {
                        uid,
                        raw: body.to_vec(),
                    }),
                    (uid, _) => Err(EmailError::MessageError {
                        uid: uid.unwrap_or_default(),
                        reason: "response without UID or body".to_string(),
                    }),
                },
                Err(e) => Err(EmailError::MessageError {
                    uid: 0,
                    reason: e.to_string(),
                }),
            });
        }
        Ok(results)
    }

    async fn move_or_flag(&mut self, uids: &[u32], destination: Option<&str>) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }

        let set = uid_set(uids);
        let session = self.session()?;
        match destination {
            Some(folder) => {
                info!("Moving {} messages to '{}'", uids.len(), folder);
                session
                    .uid_mv(&set, folder)
                    .await
                    .map_err(|e| EmailError::ProtocolError(e.to_string()))?;
            }
            None => {
                info!("Marking {} messages as seen", uids.len());
                let updates: Vec<_> = session
                    .uid_store(&set, "+FLAGS (\\Seen)")
                    .await
                    .map_err(|e| EmailError::ProtocolError(e.to_string()))?
                    .collect()
                    .await;
                if let Some(Err(e)) = updates.into_iter().find(|u| u.is_err()) {
                    return Err(EmailError::ProtocolError(e.to_string()));
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting from IMAP server");
            session
                .logout()
                .await
                .map_err(|e| EmailError::ProtocolError(e.to_string()))?;
        }
        self.uid_validity = None;
        Ok(())
    }

    fn invalidate(&mut self) {
        if self.session.take().is_some() {
            warn!("Dropping IMAP session for {}", self.config.host);
        }
        self.uid_validity = None;
    }
}

impl Drop for ImapMailbox {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapMailbox dropped without explicit disconnect");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailboxAuth;

    fn config() -> MailboxConfig {
        MailboxConfig {
            host: "imap.example.com".to_string(),
            port: 993,
            use_tls: true,
            username: "investor@example.com".to_string(),
            auth: MailboxAuth {
                password_env_var: Some("BROKERMAIL_TEST_IMAP_PASSWORD".to_string()),
                ..MailboxAuth::default()
            },
            folder: "INBOX".to_string(),
            archive_folder: None,
            since_date: None,
        }
    }

    #[test]
    fn test_new_mailbox_is_disconnected() {
        let mailbox = ImapMailbox::new(config());
        assert!(!mailbox.is_connected());
        assert_eq!(mailbox.uid_validity(), None);
    }

    #[tokio::test]
    async fn test_tls_required() {
        let mut config = config();
        config.use_tls = false;

        let mut mailbox = ImapMailbox::new(config);
        let err = mailbox.connect().await.unwrap_err();
        assert!(matches!(err, EmailError::ConfigError(_)));
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_operations_require_a_session() {
        let mut mailbox = ImapMailbox::new(config());
        assert!(matches!(
            mailbox.search(&SearchCriteria::All).await,
            Err(EmailError::NotConnected)
        ));
        assert!(matches!(
            mailbox.move_or_flag(&[1], None).await,
            Err(EmailError::NotConnected)
        ));
        // Nothing to fetch never touches the session.
        assert!(mailbox.fetch(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_xoauth2_response_format() {
        let token = SecretString::from("tok".to_string());
        let encoded = xoauth2_response("me@example.com", &token);
        let decoded = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            encoded.as_bytes(),
        )
        .unwrap();
        assert_eq!(decoded, b"user=me@example.com\x01auth=Bearer tok\x01\x01");
    }

    #[test]
    fn test_uid_set() {
        assert_eq!(uid_set(&[3, 1, 20]), "3,1,20");
    }
}
