use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::{Credentials, Settings};
use crate::platforms::ChatConnection;

const TWITCH_IRC_URL: &str = "wss://irc-ws.chat.twitch.tv:443";
const REPLY_BUFFER: usize = 256;

/// NOTICE ids that confirm a `/ban` reached its goal
const BAN_ACCEPTED_NOTICES: &[&str] = &["ban_success", "already_banned"];

/// NOTICE ids that confirm an `/unban` reached its goal
const UNBAN_ACCEPTED_NOTICES: &[&str] = &["unban_success", "bad_unban_no_ban"];

/// NOTICE ids that mean a message or command was refused
const REJECTED_NOTICES: &[&str] = &[
    "msg_ratelimit",
    "msg_banned",
    "msg_suspended",
    "msg_channel_suspended",
    "msg_channel_blocked",
    "msg_duplicate",
    "msg_timedout",
    "msg_verified_email",
    "msg_requires_verified_phone_number",
    "no_permission",
    "unrecognized_cmd",
    "invalid_user",
];

/// Id prefixes covering the per-command refusal families
const REJECTED_NOTICE_PREFIXES: &[&str] = &["bad_ban_", "bad_unban_", "usage_"];

// Type aliases for cleaner code
type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WebSocketWriter = Arc<RwLock<SplitSink<WebSocket, Message>>>;
type WebSocketReader = SplitStream<WebSocket>;

/// Configuration for the Twitch connection
#[derive(Clone)]
pub struct TwitchConfig {
    pub username: String,
    pub oauth_token: String,
    pub channel: String,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl TwitchConfig {
    pub fn new(credentials: &Credentials, settings: &Settings) -> Self {
        Self {
            username: credentials.username.trim().to_lowercase(),
            oauth_token: credentials.oauth_token.trim().to_string(),
            channel: normalize_channel(&credentials.channel),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            response_timeout: Duration::from_millis(settings.response_timeout_ms),
        }
    }

    /// Token in the form Twitch expects after PASS
    fn password(&self) -> String {
        if self.oauth_token.starts_with("oauth:") {
            self.oauth_token.clone()
        } else {
            format!("oauth:{}", self.oauth_token)
        }
    }
}

impl std::fmt::Debug for TwitchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitchConfig")
            .field("username", &self.username)
            .field("channel", &self.channel)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

/// Strip a leading `#` and lowercase, the way Twitch names channels
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

/// Server lines the connection cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    Welcome,
    Joined { nick: String, channel: String },
    Notice { msg_id: Option<String>, channel: Option<String>, text: String },
    UserState { channel: String },
    /// A ban, or a timeout when `ban_duration` is set
    ClearChat { channel: String, target: Option<String>, ban_duration: Option<u64> },
    Ping(String),
    Reconnect,
    /// Emitted by the reader once the socket is gone
    Closed,
    Other,
}

/// Parse one IRC line: `[@tags] [:prefix] COMMAND params [:trailing]`
pub fn parse_server_line(line: &str) -> ServerReply {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    let mut msg_id = None;
    let mut ban_duration = None;
    let mut nick = String::new();

    if let Some(tagged) = rest.strip_prefix('@') {
        let (tags, tail) = tagged.split_once(' ').unwrap_or((tagged, ""));
        for tag in tags.split(';') {
            match tag.split_once('=') {
                Some(("msg-id", value)) => msg_id = Some(value.to_string()),
                Some(("ban-duration", value)) => ban_duration = value.parse().ok(),
                _ => {}
            }
        }
        rest = tail;
    }

    if let Some(prefixed) = rest.strip_prefix(':') {
        let (prefix, tail) = prefixed.split_once(' ').unwrap_or((prefixed, ""));
        nick = prefix.split('!').next().unwrap_or_default().to_lowercase();
        rest = tail;
    }

    let (head, trailing) = match rest.split_once(" :") {
        Some((head, trailing)) => (head, Some(trailing)),
        None => (rest, None),
    };
    let mut params = head.split_whitespace();
    let command = params.next().unwrap_or_default();
    let channel = params.next().map(normalize_channel);

    match command {
        "001" => ServerReply::Welcome,
        "JOIN" => match channel {
            Some(channel) => ServerReply::Joined { nick, channel },
            None => ServerReply::Other,
        },
        "NOTICE" => ServerReply::Notice {
            msg_id,
            channel: channel.filter(|c| c != "*"),
            text: trailing.unwrap_or_default().to_string(),
        },
        "USERSTATE" => match channel {
            Some(channel) => ServerReply::UserState { channel },
            None => ServerReply::Other,
        },
        "CLEARCHAT" => match channel {
            Some(channel) => ServerReply::ClearChat {
                channel,
                target: trailing.map(|t| t.to_lowercase()),
                ban_duration,
            },
            None => ServerReply::Other,
        },
        "PING" => ServerReply::Ping(trailing.unwrap_or("tmi.twitch.tv").to_string()),
        "RECONNECT" => ServerReply::Reconnect,
        _ => ServerReply::Other,
    }
}

fn is_rejection(msg_id: &str) -> bool {
    REJECTED_NOTICES.contains(&msg_id)
        || REJECTED_NOTICE_PREFIXES.iter().any(|prefix| msg_id.starts_with(prefix))
}

/// NOTICE ids that acknowledge `message`, by command verb
fn accepted_notices(message: &str) -> &'static [&'static str] {
    match message.split_whitespace().next() {
        Some("/ban") => BAN_ACCEPTED_NOTICES,
        Some("/unban") => UNBAN_ACCEPTED_NOTICES,
        _ => &[],
    }
}

fn is_login_failure(text: &str) -> bool {
    let text = text.to_lowercase();
    text.contains("login authentication failed") || text.contains("improperly formatted auth")
}

/// Decide whether `reply` settles the fate of `message` sent to `channel`.
///
/// `None` means the reply is unrelated and waiting continues.
pub fn classify_ack(reply: &ServerReply, channel: &str, message: &str) -> Option<Result<()>> {
    let is_command = message.starts_with('/');

    match reply {
        ServerReply::Notice { msg_id: Some(id), channel: notice_channel, text }
            if notice_channel.as_deref().map_or(true, |c| c == channel) =>
        {
            if accepted_notices(message).contains(&id.as_str()) {
                Some(Ok(()))
            } else if is_rejection(id) {
                Some(Err(anyhow!("Twitch refused '{}': {} ({})", message, text, id)))
            } else {
                None
            }
        }
        ServerReply::Notice { msg_id: None, text, .. } if is_login_failure(text) => {
            Some(Err(anyhow!("Twitch refused '{}': {}", message, text)))
        }
        // A timeout also clears chat but is not a ban
        ServerReply::ClearChat {
            channel: cleared,
            target: Some(target),
            ban_duration: None,
        } if cleared == channel => {
            let banned = message
                .strip_prefix("/ban ")
                .and_then(|args| args.split_whitespace().next())
                .map(str::to_lowercase);
            (banned.as_deref() == Some(target.as_str())).then_some(Ok(()))
        }
        ServerReply::UserState { channel: state_channel } if !is_command && state_channel == channel => Some(Ok(())),
        ServerReply::Closed => Some(Err(anyhow!("Twitch connection closed before '{}' was acknowledged", message))),
        _ => None,
    }
}

async fn send_line(writer: &WebSocketWriter, line: &str) -> Result<()> {
    writer
        .write()
        .await
        .send(Message::Text(format!("{}\r\n", line)))
        .await
        .map_err(Into::into)
}

/// Twitch IRC connection over WebSocket, bound to a single channel
pub struct TwitchConnection {
    config: TwitchConfig,
    reply_sender: Option<broadcast::Sender<ServerReply>>,
    websocket_writer: Option<WebSocketWriter>,
    is_connected: Arc<RwLock<bool>>,
}

impl TwitchConnection {
    pub fn new(config: TwitchConfig) -> Self {
        Self {
            config,
            reply_sender: None,
            websocket_writer: None,
            is_connected: Arc::new(RwLock::new(false)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    /// Read frames until the socket closes, answering PINGs and
    /// broadcasting every parsed line
    fn spawn_reader(
        read: WebSocketReader,
        writer: WebSocketWriter,
        replies: broadcast::Sender<ServerReply>,
        is_connected: Arc<RwLock<bool>>,
    ) {
        tokio::spawn(async move {
            let mut read = read;
            debug!("Twitch reader started");

            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        for line in text.split("\r\n").filter(|l| !l.is_empty()) {
                            debug!("< {}", line);

                            let reply = parse_server_line(line);
                            match &reply {
                                ServerReply::Ping(payload) => {
                                    if let Err(e) = send_line(&writer, &format!("PONG :{}", payload)).await {
                                        error!("Failed to send PONG: {}", e);
                                    }
                                    continue;
                                }
                                ServerReply::Reconnect => {
                                    warn!("Twitch asked us to reconnect; reconnecting is disabled");
                                }
                                _ => {}
                            }

                            // No subscribers simply means nobody is waiting
                            let _ = replies.send(reply);
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = writer.write().await.send(Message::Pong(payload)).await {
                            error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(close_frame))) => {
                        info!("WebSocket connection closed: {:?}", close_frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            *is_connected.write().await = false;
            let _ = replies.send(ServerReply::Closed);
        });
    }
}

#[async_trait]
impl ChatConnection for TwitchConnection {
    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to Twitch IRC...");

        let url = Url::parse(TWITCH_IRC_URL).context("Failed to parse Twitch WebSocket URL")?;
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Twitch WebSocket")?;
        let (write, read) = ws_stream.split();

        let writer = Arc::new(RwLock::new(write));
        let (tx, _) = broadcast::channel(REPLY_BUFFER);
        let mut replies = tx.subscribe();

        Self::spawn_reader(read, Arc::clone(&writer), tx.clone(), Arc::clone(&self.is_connected));
        self.websocket_writer = Some(Arc::clone(&writer));
        self.reply_sender = Some(tx);

        send_line(&writer, "CAP REQ :twitch.tv/tags twitch.tv/commands")
            .await
            .context("Failed to request capabilities")?;
        send_line(&writer, &format!("PASS {}", self.config.password()))
            .await
            .context("Failed to send PASS command")?;
        send_line(&writer, &format!("NICK {}", self.config.username))
            .await
            .context("Failed to send NICK command")?;
        send_line(&writer, &format!("JOIN #{}", self.config.channel))
            .await
            .with_context(|| format!("Failed to join channel: {}", self.config.channel))?;

        let username = self.config.username.clone();
        let channel = self.config.channel.clone();
        let handshake = async {
            loop {
                match replies.recv().await {
                    Ok(ServerReply::Welcome) => debug!("Login accepted"),
                    Ok(ServerReply::Joined { nick, channel: joined }) if nick == username && joined == channel => {
                        return Ok(());
                    }
                    Ok(ServerReply::Notice { msg_id: None, text, .. }) if is_login_failure(&text) => {
                        return Err(anyhow!("Login failed: {}", text));
                    }
                    Ok(ServerReply::Notice { msg_id: Some(id), text, .. }) if is_rejection(&id) => {
                        return Err(anyhow!("Twitch refused the connection: {} ({})", text, id));
                    }
                    Ok(ServerReply::Closed) => return Err(anyhow!("Connection closed during login")),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} server replies during login", skipped),
                    Err(RecvError::Closed) => return Err(anyhow!("Connection closed during login")),
                }
            }
        };

        let outcome = match timeout(self.config.connect_timeout, handshake).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("Timed out waiting for Twitch to accept the login")),
        };

        if let Err(e) = outcome {
            self.disconnect().await.ok();
            return Err(e);
        }

        *self.is_connected.write().await = true;
        info!("Joined channel: #{}", self.config.channel);
        Ok(())
    }

    async fn say(&self, channel: &str, message: &str) -> Result<()> {
        // A line break would let the message smuggle in a second IRC command
        if message.contains(['\r', '\n']) {
            return Err(anyhow!("Refusing to send a message containing a line break"));
        }

        let writer = self
            .websocket_writer
            .as_ref()
            .ok_or_else(|| anyhow!("Not connected to Twitch"))?;
        let sender = self
            .reply_sender
            .as_ref()
            .ok_or_else(|| anyhow!("Not connected to Twitch"))?;

        let channel = normalize_channel(channel);
        let mut replies = sender.subscribe();

        send_line(writer, &format!("PRIVMSG #{} :{}", channel, message))
            .await
            .with_context(|| format!("Failed to send message to #{}", channel))?;
        debug!("Sent to #{}: {}", channel, message);

        let acknowledgement = async {
            loop {
                match replies.recv().await {
                    Ok(reply) => {
                        if let Some(outcome) = classify_ack(&reply, &channel, message) {
                            return outcome;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} server replies while waiting for an acknowledgement", skipped);
                    }
                    Err(RecvError::Closed) => return Err(anyhow!("Twitch connection closed")),
                }
            }
        };

        timeout(self.config.response_timeout, acknowledgement)
            .await
            .map_err(|_| anyhow!("No response from Twitch"))?
    }

    async fn disconnect(&mut self) -> Result<()> {
        *self.is_connected.write().await = false;
        self.reply_sender = None;

        if let Some(writer) = self.websocket_writer.take() {
            if let Err(e) = writer.write().await.close().await {
                debug!("Error while closing WebSocket: {}", e);
            }
            info!("Disconnected from Twitch");
        }

        Ok(())
    }

    fn platform_name(&self) -> &str {
        "twitch"
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }
}
