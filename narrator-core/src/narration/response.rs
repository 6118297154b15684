//! Tagged narration response, decoded once at the backend boundary.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;

use crate::error::{NarratorError, Result};

/// One part of a backend's streamed answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NarrationResponse {
    /// Raw PCM bytes ready for the audio sink.
    pub audio: Option<Vec<u8>>,
    /// Text of (a fragment of) the commentary.
    pub transcript: Option<String>,
    /// The backend finished its turn.
    pub turn_complete: bool,
}

impl NarrationResponse {
    pub fn audio(bytes: Vec<u8>) -> Self {
        Self {
            audio: Some(bytes),
            ..Self::default()
        }
    }

    pub fn transcript(text: impl Into<String>) -> Self {
        Self {
            transcript: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn turn_complete() -> Self {
        Self {
            turn_complete: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.transcript.is_none() && !self.turn_complete
    }

    /// Decode a streamed live-model server message.
    ///
    /// ```json
    /// { "serverContent": {
    ///     "modelTurn": { "parts": [ { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "<base64>" } } ] },
    ///     "outputTranscription": { "text": "..." },
    ///     "turnComplete": true } }
    /// ```
    ///
    /// Audio from several inline parts is concatenated in order. Messages
    /// without `serverContent` (setup acks, usage metadata) decode to an
    /// empty response.
    ///
    /// # Errors
    /// `NarratorError::Decode` on a shape mismatch or malformed base64.
    pub fn from_live_message(message: &serde_json::Value) -> Result<Self> {
        let parsed = LiveMessage::deserialize(message)
            .map_err(|e| NarratorError::Decode(format!("live message: {e}")))?;
        let Some(content) = parsed.server_content else {
            return Ok(Self::default());
        };

        let mut audio: Option<Vec<u8>> = None;
        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for inline in parts.into_iter().filter_map(|p| p.inline_data) {
            let bytes = STANDARD
                .decode(inline.data.as_bytes())
                .map_err(|e| NarratorError::Decode(format!("inline audio: {e}")))?;
            audio.get_or_insert_with(Vec::new).extend_from_slice(&bytes);
        }

        let transcript = content
            .output_transcription
            .and_then(|t| t.text)
            .filter(|t| !t.is_empty());

        Ok(Self {
            audio,
            transcript,
            turn_complete: content.turn_complete,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveMessage {
    server_content: Option<ServerContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Deserialize)]
struct Transcription {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_audio_transcript_and_turn_complete() {
        let message = json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm", "data": STANDARD.encode([1u8, 2, 3]) } },
                    { "text": "ignored" },
                    { "inlineData": { "mimeType": "audio/pcm", "data": STANDARD.encode([4u8]) } }
                ] },
                "outputTranscription": { "text": "And they're off!" },
                "turnComplete": true
            }
        });

        let response = NarrationResponse::from_live_message(&message).expect("decode");
        assert_eq!(response.audio, Some(vec![1, 2, 3, 4]));
        assert_eq!(response.transcript.as_deref(), Some("And they're off!"));
        assert!(response.turn_complete);
    }

    #[test]
    fn message_without_server_content_is_empty() {
        let response =
            NarrationResponse::from_live_message(&json!({ "setupComplete": {} })).unwrap();
        assert!(response.is_empty());
    }

    #[test]
    fn transcription_only_message_has_no_audio() {
        let message = json!({ "serverContent": { "outputTranscription": { "text": "wow" } } });
        let response = NarrationResponse::from_live_message(&message).unwrap();
        assert_eq!(response.audio, None);
        assert_eq!(response.transcript.as_deref(), Some("wow"));
        assert!(!response.turn_complete);
    }

    #[test]
    fn malformed_base64_is_a_decode_error() {
        let message = json!({ "serverContent": { "modelTurn": { "parts": [
            { "inlineData": { "data": "@@not base64@@" } }
        ] } } });
        let err = NarrationResponse::from_live_message(&message).unwrap_err();
        assert!(matches!(err, NarratorError::Decode(_)));
    }
}
