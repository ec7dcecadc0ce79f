use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame<'a> {
    Start {
        #[serde(rename = "userId")]
        user_id: &'a str,
        audio_format: &'a str,
    },
    Finalize,
    Close,
}

#[derive(Debug, Deserialize)]
pub struct IncomingFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_serializes_with_camel_case_user_id() {
        let frame = ControlFrame::Start {
            user_id: "session-1",
            audio_format: "opus",
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["userId"], "session-1");
        assert_eq!(json["audio_format"], "opus");
    }

    #[test]
    fn finalize_and_close_frames_carry_only_a_type_tag() {
        assert_eq!(
            serde_json::to_value(&ControlFrame::Finalize).unwrap(),
            serde_json::json!({"type": "finalize"})
        );
        assert_eq!(
            serde_json::to_value(&ControlFrame::Close).unwrap(),
            serde_json::json!({"type": "close"})
        );
    }

    #[test]
    fn incoming_partial_frame_parses_with_missing_optional_fields() {
        let frame: IncomingFrame = serde_json::from_str(r#"{"type":"partial","text":"hi"}"#).unwrap();
        assert_eq!(frame.kind, "partial");
        assert_eq!(frame.text, "hi");
        assert!(frame.confidence.is_none());
    }

    #[test]
    fn incoming_error_frame_parses_its_error_field() {
        let frame: IncomingFrame =
            serde_json::from_str(r#"{"type":"error","error":"boom"}"#).unwrap();
        assert_eq!(frame.kind, "error");
        assert_eq!(frame.error.as_deref(), Some("boom"));
    }
}
