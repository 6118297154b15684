//! Streaming live-audio model backend.
//!
//! One session carries many turns: `warm_up` opens it and waits for the
//! server's `setupComplete`; each `narrate` sends the prompt as a complete
//! client turn and forwards decoded server messages until `turnComplete`.
//! A session that fails mid-turn is discarded and reopened on the next call.
//!
//! The wire is abstracted behind [`LiveTransport`]; the `live` feature adds a
//! WebSocket transport.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{NarrationBackend, NarrationResponse};
use crate::error::{NarratorError, Result};

/// Text-frame duplex channel to a live model.
pub trait LiveTransport: Send {
    fn send_text(&mut self, text: String) -> Result<()>;

    /// Next server message. `None` once the peer closed the session.
    fn recv_text(&mut self) -> Result<Option<String>>;
}

/// Configuration for [`LiveModelBackend`].
#[derive(Debug, Clone)]
pub struct LiveModelConfig {
    /// Default: the public BidiGenerateContent WebSocket endpoint.
    pub endpoint: String,
    pub api_key: String,
    /// Default: `models/gemini-2.0-flash-live-001`.
    pub model: String,
    /// Prebuilt voice. Default: `Puck`.
    pub voice: String,
    pub system_instruction: String,
    /// Max wait for a single server message. Default: 15 s.
    pub read_timeout: Duration,
    /// Server messages to skip while waiting for `setupComplete`.
    pub max_setup_messages: usize,
}

impl LiveModelConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
            api_key: api_key.into(),
            model: "models/gemini-2.0-flash-live-001".into(),
            voice: "Puck".into(),
            system_instruction: "You are a live commentator narrating what a team of \
                software agents is doing. Speak in short, vivid sentences."
                .into(),
            read_timeout: Duration::from_secs(15),
            max_setup_messages: 8,
        }
    }

    pub fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }

    fn setup_message(&self) -> Value {
        json!({
            "setup": {
                "model": self.model,
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": self.voice } }
                    }
                },
                "systemInstruction": { "parts": [{ "text": self.system_instruction }] },
                "outputAudioTranscription": {}
            }
        })
    }
}

fn turn_message(prompt: &str) -> Value {
    json!({
        "clientContent": {
            "turns": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "turnComplete": true
        }
    })
}

type Connector<T> = Box<dyn FnMut(&LiveModelConfig) -> Result<T> + Send>;

/// Primary narration backend streaming audio and transcript from a live
/// model session.
pub struct LiveModelBackend<T: LiveTransport + 'static> {
    config: LiveModelConfig,
    name: String,
    connect: Connector<T>,
    session: Option<T>,
}

impl<T: LiveTransport + 'static> LiveModelBackend<T> {
    /// `connect` opens a fresh transport; it is called on warm-up and after
    /// every failed turn.
    pub fn new(
        config: LiveModelConfig,
        connect: impl FnMut(&LiveModelConfig) -> Result<T> + Send + 'static,
    ) -> Self {
        let name = format!("live:{}", config.model.trim_start_matches("models/"));
        Self {
            config,
            name,
            connect: Box::new(connect),
            session: None,
        }
    }

    fn open_session(&mut self) -> Result<T> {
        let mut transport = (self.connect)(&self.config)?;
        transport.send_text(self.config.setup_message().to_string())?;

        for _ in 0..self.config.max_setup_messages.max(1) {
            let Some(raw) = transport.recv_text()? else {
                return Err(NarratorError::backend(&self.name, "session closed during setup"));
            };
            let message: Value = serde_json::from_str(&raw)?;
            if message.get("setupComplete").is_some() {
                info!(backend = self.name.as_str(), "live session ready");
                return Ok(transport);
            }
            if let Some(error) = message.get("error") {
                return Err(NarratorError::backend(&self.name, format!("setup rejected: {error}")));
            }
        }
        Err(NarratorError::backend(&self.name, "no setupComplete from server"))
    }

    fn run_turn(
        name: &str,
        transport: &mut T,
        prompt: &str,
        on_response: &mut dyn FnMut(NarrationResponse),
    ) -> Result<()> {
        transport.send_text(turn_message(prompt).to_string())?;
        loop {
            let Some(raw) = transport.recv_text()? else {
                return Err(NarratorError::backend(name, "session closed mid-turn"));
            };
            let message: Value = serde_json::from_str(&raw)?;
            let response = NarrationResponse::from_live_message(&message)?;
            let done = response.turn_complete;
            if !response.is_empty() {
                on_response(response);
            }
            if done {
                return Ok(());
            }
        }
    }
}

impl<T: LiveTransport + 'static> NarrationBackend for LiveModelBackend<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn warm_up(&mut self) -> Result<()> {
        if self.config.api_key.trim().is_empty() {
            return Err(NarratorError::InvalidConfig(
                "live model backend needs an API key".into(),
            ));
        }
        let session = self.open_session()?;
        self.session = Some(session);
        Ok(())
    }

    fn narrate(
        &mut self,
        prompt: &str,
        on_response: &mut dyn FnMut(NarrationResponse),
    ) -> Result<()> {
        let mut transport = match self.session.take() {
            Some(transport) => transport,
            None => {
                debug!(backend = self.name.as_str(), "reopening live session");
                self.open_session()?
            }
        };

        match Self::run_turn(&self.name, &mut transport, prompt, on_response) {
            Ok(()) => {
                self.session = Some(transport);
                Ok(())
            }
            Err(e) => {
                warn!(backend = self.name.as_str(), error = %e, "live turn failed, session dropped");
                Err(e)
            }
        }
    }
}

#[cfg(feature = "live")]
pub use websocket::WebSocketTransport;

#[cfg(feature = "live")]
mod websocket {
    use std::net::TcpStream;

    use tungstenite::{stream::MaybeTlsStream, Message, WebSocket};

    use super::{LiveModelConfig, LiveTransport};
    use crate::error::{NarratorError, Result};

    /// [`LiveTransport`] over a blocking `tungstenite` WebSocket.
    pub struct WebSocketTransport {
        socket: WebSocket<MaybeTlsStream<TcpStream>>,
    }

    impl WebSocketTransport {
        pub fn connect(config: &LiveModelConfig) -> Result<Self> {
            let (socket, _response) = tungstenite::connect(config.url().as_str())
                .map_err(|e| NarratorError::backend("live", format!("connect failed: {e}")))?;

            let timeout = Some(config.read_timeout);
            match socket.get_ref() {
                MaybeTlsStream::Plain(stream) => stream.set_read_timeout(timeout)?,
                MaybeTlsStream::NativeTls(stream) => stream.get_ref().set_read_timeout(timeout)?,
                _ => {}
            }
            Ok(Self { socket })
        }
    }

    impl LiveTransport for WebSocketTransport {
        fn send_text(&mut self, text: String) -> Result<()> {
            self.socket
                .send(Message::Text(text.into()))
                .map_err(|e| NarratorError::backend("live", format!("send failed: {e}")))
        }

        fn recv_text(&mut self) -> Result<Option<String>> {
            loop {
                match self.socket.read() {
                    Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_owned())),
                    // The server frames JSON as binary messages.
                    Ok(Message::Binary(data)) => {
                        let text = String::from_utf8(data.to_vec()).map_err(|e| {
                            NarratorError::Decode(format!("non-UTF-8 live frame: {e}"))
                        })?;
                        return Ok(Some(text));
                    }
                    Ok(Message::Close(_)) => return Ok(None),
                    Ok(_) => {}
                    Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                        return Ok(None)
                    }
                    Err(e) => {
                        return Err(NarratorError::backend("live", format!("read failed: {e}")))
                    }
                }
            }
        }
    }
}
