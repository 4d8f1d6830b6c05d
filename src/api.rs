//! Remote status/control API
//!
//! Typed request dispatch for the filter's remote API. The transport (an
//! IPC window, a socket, a test harness) is an external collaborator; this
//! module only defines the message ids, the request/reply shapes and the
//! mapping onto filter state. Strings are UTF-8; numeric replies are the
//! raw API value.

use std::path::PathBuf;

use crate::constants::PAR_SCALE_FACTOR;
use crate::filter::ScriptFilter;
use crate::util::mul_div;

/// Current API version.
pub const API_VERSION: i64 = 1;

/// Delimiter for list-valued string replies.
pub const API_CSV_DELIMITER: &str = ";";

pub const API_MSG_GET_API_VERSION: u32 = 100;
pub const API_MSG_GET_VIDEO_FILTERS: u32 = 101;
pub const API_MSG_GET_INPUT_WIDTH: u32 = 200;
pub const API_MSG_GET_INPUT_HEIGHT: u32 = 201;
pub const API_MSG_GET_INPUT_PAR: u32 = 202;
pub const API_MSG_GET_CURRENT_INPUT_FPS: u32 = 203;
pub const API_MSG_GET_INPUT_SOURCE_PATH: u32 = 204;
pub const API_MSG_GET_INPUT_CODEC: u32 = 205;
pub const API_MSG_GET_INPUT_HDR_TYPE: u32 = 206;
pub const API_MSG_GET_INPUT_HDR_LUMINANCE: u32 = 207;
pub const API_MSG_GET_SOURCE_AVG_FPS: u32 = 208;
pub const API_MSG_GET_CURRENT_OUTPUT_FPS: u32 = 300;
pub const API_MSG_GET_SCRIPT_STATE: u32 = 400;
pub const API_MSG_GET_SCRIPT_ERROR: u32 = 401;
pub const API_MSG_GET_SCRIPT_FILE: u32 = 402;
pub const API_MSG_SET_SCRIPT_FILE: u32 = 403;

/// A decoded API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    GetApiVersion,
    GetVideoFilters,
    GetInputWidth,
    GetInputHeight,
    GetInputPar,
    GetCurrentInputFps,
    GetInputSourcePath,
    GetInputCodec,
    GetInputHdrType,
    GetInputHdrLuminance,
    GetSourceAvgFps,
    GetCurrentOutputFps,
    GetScriptState,
    GetScriptError,
    GetScriptFile,
    SetScriptFile(PathBuf),
}

impl ApiRequest {
    /// Decode a wire message. `payload` carries the UTF-8 argument of
    /// write requests.
    pub fn from_message(message_id: u32, payload: &[u8]) -> Option<Self> {
        match message_id {
            API_MSG_GET_API_VERSION => Some(Self::GetApiVersion),
            API_MSG_GET_VIDEO_FILTERS => Some(Self::GetVideoFilters),
            API_MSG_GET_INPUT_WIDTH => Some(Self::GetInputWidth),
            API_MSG_GET_INPUT_HEIGHT => Some(Self::GetInputHeight),
            API_MSG_GET_INPUT_PAR => Some(Self::GetInputPar),
            API_MSG_GET_CURRENT_INPUT_FPS => Some(Self::GetCurrentInputFps),
            API_MSG_GET_INPUT_SOURCE_PATH => Some(Self::GetInputSourcePath),
            API_MSG_GET_INPUT_CODEC => Some(Self::GetInputCodec),
            API_MSG_GET_INPUT_HDR_TYPE => Some(Self::GetInputHdrType),
            API_MSG_GET_INPUT_HDR_LUMINANCE => Some(Self::GetInputHdrLuminance),
            API_MSG_GET_SOURCE_AVG_FPS => Some(Self::GetSourceAvgFps),
            API_MSG_GET_CURRENT_OUTPUT_FPS => Some(Self::GetCurrentOutputFps),
            API_MSG_GET_SCRIPT_STATE => Some(Self::GetScriptState),
            API_MSG_GET_SCRIPT_ERROR => Some(Self::GetScriptError),
            API_MSG_GET_SCRIPT_FILE => Some(Self::GetScriptFile),
            API_MSG_SET_SCRIPT_FILE => Some(Self::SetScriptFile(PathBuf::from(
                String::from_utf8_lossy(payload).into_owned(),
            ))),
            _ => None,
        }
    }
}

/// A reply on the wire: either a numeric return value or a UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiReply {
    Number(i64),
    Text(String),
    /// The queried value is unavailable (e.g. no script error).
    Unavailable,
}

/// Serve one request against the filter.
pub fn handle_request(filter: &ScriptFilter, request: &ApiRequest) -> ApiReply {
    match request {
        ApiRequest::GetApiVersion => ApiReply::Number(API_VERSION),

        ApiRequest::GetVideoFilters => {
            // the graph walk that collected upstream filter names lives in
            // the embedder; the filter itself only knows the source path
            ApiReply::Text(String::new())
        }

        ApiRequest::GetInputWidth => match filter.input_format() {
            Some(format) => ApiReply::Number(format.width as i64),
            None => ApiReply::Unavailable,
        },

        ApiRequest::GetInputHeight => match filter.input_format() {
            Some(format) => ApiReply::Number(format.height as i64),
            None => ApiReply::Unavailable,
        },

        ApiRequest::GetInputPar => match filter.input_format() {
            Some(format) => ApiReply::Number(mul_div(
                format.pixel_aspect_ratio_num,
                PAR_SCALE_FACTOR,
                format.pixel_aspect_ratio_den,
            )),
            None => ApiReply::Unavailable,
        },

        ApiRequest::GetCurrentInputFps => {
            ApiReply::Number(filter.frame_handler().current_input_frame_rate() as i64)
        }

        ApiRequest::GetInputSourcePath => {
            let path = filter.video_source_path();
            if path.as_os_str().is_empty() {
                ApiReply::Unavailable
            } else {
                ApiReply::Text(path.to_string_lossy().into_owned())
            }
        }

        ApiRequest::GetInputCodec => match filter.input_format() {
            Some(format) => ApiReply::Number(format.codec_fourcc() as i64),
            None => ApiReply::Unavailable,
        },

        ApiRequest::GetInputHdrType => match filter.input_format() {
            Some(format) => ApiReply::Number(format.hdr_type as i64),
            None => ApiReply::Unavailable,
        },

        ApiRequest::GetInputHdrLuminance => match filter.input_format() {
            Some(format) => ApiReply::Number(format.hdr_luminance as i64),
            None => ApiReply::Unavailable,
        },

        ApiRequest::GetSourceAvgFps => {
            ApiReply::Number(filter.main_processor().source_avg_frame_rate() as i64)
        }

        ApiRequest::GetCurrentOutputFps => {
            ApiReply::Number(filter.frame_handler().current_output_frame_rate() as i64)
        }

        ApiRequest::GetScriptState => ApiReply::Number(filter.script_state() as i64),

        ApiRequest::GetScriptError => match filter.script_error_text() {
            Some(text) => ApiReply::Text(text),
            None => ApiReply::Unavailable,
        },

        ApiRequest::GetScriptFile => {
            let path = filter.environment().script_path();
            if path.as_os_str().is_empty() {
                ApiReply::Unavailable
            } else {
                ApiReply::Text(path.to_string_lossy().into_owned())
            }
        }

        ApiRequest::SetScriptFile(path) => {
            filter.reload_script(path.clone());
            ApiReply::Number(1)
        }
    }
}
