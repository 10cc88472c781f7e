//! Wire format for the live voice channel.
//!
//! Outbound: one `setup` message at connection open, then a `realtimeInput`
//! frame per captured block. Inbound JSON is decoded exactly once, here at
//! the channel boundary, into tagged [`ServerEvent`]s; consumers never
//! re-inspect raw messages. A server message may carry any combination of
//! audio, transcript fragments and a turn-complete marker, so parsing yields
//! a list of events.

use serde::{Deserialize, Serialize};

use crate::audio::codec::{self, SampleBlock};

// ======================== Outbound ========================

#[derive(Serialize)]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig,
    system_instruction: Content<'a>,
    // Empty objects enable transcript generation for both directions.
    input_audio_transcription: Empty,
    output_audio_transcription: Empty,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: [&'static str; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize, Deserialize, Debug)]
struct Empty {}

/// Build the one-time session configuration message: audio responses,
/// transcripts in both directions, and the behavioral instruction preset.
pub fn setup_message(model: &str, system_instruction: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&SetupMessage {
        setup: Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
            },
            system_instruction: Content {
                parts: [TextPart {
                    text: system_instruction,
                }],
            },
            input_audio_transcription: Empty {},
            output_audio_transcription: Empty {},
        },
    })
}

/// Wrap one transport-encoded capture frame. Base64 never needs JSON
/// escaping, so the frame is assembled with a plain template.
pub fn audio_frame(sample_rate: u32, data: &str) -> String {
    format!(
        r#"{{"realtimeInput":{{"audio":{{"mimeType":"audio/pcm;rate={sample_rate}","data":"{data}"}}}}}}"#
    )
}

// ======================== Inbound ========================

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Empty>,
    server_content: Option<ServerContent>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    turn_complete: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
struct InlineData {
    data: String,
}

#[derive(Deserialize, Debug)]
struct Transcription {
    text: Option<String>,
}

/// Everything a session consumer can receive from the channel.
#[derive(Debug)]
pub enum ServerEvent {
    /// The service accepted the session configuration.
    SetupComplete,
    /// One decoded audio block at the fixed output rate.
    Audio(SampleBlock),
    /// A partial transcript fragment; `local` is true for the user's speech.
    Transcript { text: String, local: bool },
    /// The current remote speech segment is finished.
    TurnComplete,
    /// The channel closed.
    Closed,
    /// The channel reported a failure.
    Error(String),
}

/// Decode one raw server message into events.
///
/// A malformed audio payload drops that single frame with a log line and
/// never affects its neighbors or the session; unrecognized messages decode
/// to no events.
pub fn parse_server_message(raw: &str, output_rate: u32) -> Vec<ServerEvent> {
    let msg: ServerMessage = match serde_json::from_str(raw) {
        Ok(msg) => msg,
        Err(e) => {
            log::debug!("unrecognized server message: {e}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    if msg.setup_complete.is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    let Some(content) = msg.server_content else {
        return events;
    };

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            let Some(inline) = part.inline_data else {
                continue;
            };
            match codec::from_transport(&inline.data).and_then(|bytes| codec::decode16(&bytes)) {
                Ok(samples) => {
                    events.push(ServerEvent::Audio(SampleBlock::new(samples, output_rate)));
                }
                Err(e) => log::warn!("dropping inbound audio frame: {e}"),
            }
        }
    }

    if let Some(text) = content.input_transcription.and_then(|t| t.text)
        && !text.is_empty()
    {
        events.push(ServerEvent::Transcript { text, local: true });
    }
    if let Some(text) = content.output_transcription.and_then(|t| t.text)
        && !text.is_empty()
    {
        events.push(ServerEvent::Transcript { text, local: false });
    }

    if content.turn_complete.unwrap_or(false) {
        events.push(ServerEvent::TurnComplete);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{encode16, to_transport};

    fn audio_json(samples: &[f32]) -> String {
        format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}]}}}}}}"#,
            to_transport(&encode16(samples))
        )
    }

    #[test]
    fn setup_message_carries_configuration() {
        let msg = setup_message("models/test", "be helpful").unwrap();
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(
            value["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            value["setup"]["systemInstruction"]["parts"][0]["text"],
            "be helpful"
        );
        assert!(value["setup"]["inputAudioTranscription"].is_object());
        assert!(value["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn audio_frame_is_valid_json() {
        let frame = audio_frame(16000, "AAAA");
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value["realtimeInput"]["audio"]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert_eq!(value["realtimeInput"]["audio"]["data"], "AAAA");
    }

    #[test]
    fn composite_message_yields_all_events() {
        let raw = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"data":"{}"}}}}]}},"outputTranscription":{{"text":"hello"}},"inputTranscription":{{"text":"hi"}},"turnComplete":true}}}}"#,
            to_transport(&encode16(&[0.1, 0.2]))
        );
        let events = parse_server_message(&raw, 24000);
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], ServerEvent::Audio(b) if b.len() == 2));
        assert!(matches!(&events[1], ServerEvent::Transcript { local: true, .. }));
        assert!(matches!(&events[2], ServerEvent::Transcript { local: false, .. }));
        assert!(matches!(&events[3], ServerEvent::TurnComplete));
    }

    #[test]
    fn malformed_frame_between_valid_frames_is_isolated() {
        let good = to_transport(&encode16(&[0.5; 10]));
        let raw = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"data":"{good}"}}}},{{"inlineData":{{"data":"!!!not-base64!!!"}}}},{{"inlineData":{{"data":"{good}"}}}}]}}}}}}"#
        );
        let events = parse_server_message(&raw, 24000);
        assert_eq!(events.len(), 2);
        for ev in &events {
            assert!(matches!(ev, ServerEvent::Audio(b) if b.len() == 10));
        }
    }

    #[test]
    fn truncated_pcm_payload_is_dropped() {
        // 3 bytes decode from base64 fine but are not a whole PCM16 frame
        let raw = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"data":"{}"}}}}]}}}}}}"#,
            to_transport(&[1u8, 2, 3])
        );
        assert!(parse_server_message(&raw, 24000).is_empty());
    }

    #[test]
    fn setup_complete_is_recognized() {
        let events = parse_server_message(r#"{"setupComplete":{}}"#, 24000);
        assert!(matches!(events.as_slice(), [ServerEvent::SetupComplete]));
    }

    #[test]
    fn unknown_or_invalid_messages_yield_no_events() {
        assert!(parse_server_message("not json", 24000).is_empty());
        assert!(parse_server_message(r#"{"usageMetadata":{"tokens":1}}"#, 24000).is_empty());
    }

    #[test]
    fn decoded_audio_block_matches_payload() {
        let events = parse_server_message(&audio_json(&[0.25, -0.25, 0.0]), 24000);
        let [ServerEvent::Audio(block)] = events.as_slice() else {
            panic!("expected one audio event");
        };
        assert_eq!(block.sample_rate, 24000);
        assert_eq!(block.len(), 3);
        assert!((block.samples[0] - 0.25).abs() <= 1.0 / 32768.0);
    }
}
