//! Media type negotiation
//!
//! The graph may probe only a subset of the upstream's media types before
//! settling on a transform pair whose output the downstream then rejects.
//! To keep the choice with the downstream, the engine enumerates *all*
//! upstream candidates up front, probes the checking script instance with
//! each to learn the output layout it would produce, and records every
//! workable (input, output) pairing. Offers and transform checks then come
//! from this compatibility set, and when the graph initially wires an
//! incompatible pair, the engine drives input-pin reconnection through a
//! rising watermark until a compatible pairing sticks or the candidates
//! are exhausted.

use thiserror::Error;
use tracing::debug;

use crate::environment::Environment;
use crate::format::{lookup_media_subtype, lookup_script_pixel_type, PixelFormat};
use crate::media::media_type::{Compression, FourCc, MediaType, RectL, VideoInfo};
use crate::processor::{FrameProcessor, ProcessorError, ReloadStatus, ScriptVideoInfo};
use crate::util::{mul_div, reduce_ratio};

/// One workable pairing of upstream input type and synthesized output type.
#[derive(Debug, Clone)]
pub struct MediaTypePair {
    pub input_media_type: MediaType,
    pub input_pixel_format: &'static PixelFormat,
    pub output_media_type: MediaType,
    pub output_pixel_format: &'static PixelFormat,
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("script requested disconnect; filter is disconnected")]
    Disconnected,

    #[error("script pixel type {script_pixel_type} has no media subtype in the format table")]
    NoCompatibleOutput { script_pixel_type: i32 },

    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Outcome of validating the connected pair once both pins are wired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectDecision {
    /// The connected input/output pair is a valid transform.
    Compatible,
    /// Reconnect the input pin with this candidate media type, then
    /// re-validate.
    Reconnect(MediaType),
    /// No candidate remains; fail the connection.
    Exhausted,
    /// One of the connected types has no table entry.
    UnexpectedFormat,
}

/// Per-connection negotiation state.
#[derive(Default)]
pub struct NegotiationEngine {
    compatible_media_types: Vec<MediaTypePair>,
    reconnection_watermark: usize,
    filter_disconnected: bool,
}

/// The table entry for a media type, provided it is a well-formed video
/// type.
pub fn media_type_to_pixel_format(media_type: &MediaType) -> Option<&'static PixelFormat> {
    if !media_type.is_video() {
        return None;
    }
    lookup_media_subtype(&media_type.subtype)
}

impl NegotiationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a probed script has requested the filter to stay
    /// disconnected. Latched until [`NegotiationEngine::clear`].
    pub fn is_disconnected(&self) -> bool {
        self.filter_disconnected
    }

    /// Drop all per-connection state (on pin disconnect).
    pub fn clear(&mut self) {
        self.compatible_media_types.clear();
        self.reconnection_watermark = 0;
        self.filter_disconnected = false;
    }

    pub fn compatible_media_types(&self) -> &[MediaTypePair] {
        &self.compatible_media_types
    }

    /// Probe every upstream candidate type and build the compatibility set.
    ///
    /// Each enabled input pixel format is probed at most once: the checking
    /// instance reloads the script against the candidate, and every table
    /// entry sharing the script output's pixel type yields one pairing. A
    /// script output with no table counterpart is a typed error rather than
    /// a silent empty offer.
    pub fn enumerate_upstream_types<'a>(
        &mut self,
        candidates: impl IntoIterator<Item = &'a MediaType>,
        checking: &dyn FrameProcessor,
        environment: &Environment,
    ) -> Result<(), NegotiationError> {
        for candidate in candidates {
            let Some(input_pixel_format) = media_type_to_pixel_format(candidate) else {
                continue;
            };
            if !environment.is_input_format_enabled(input_pixel_format.name) {
                debug!(format = input_pixel_format.name, "Input format disabled by settings");
                continue;
            }
            if self
                .compatible_media_types
                .iter()
                .any(|pair| std::ptr::eq(pair.input_pixel_format, input_pixel_format))
            {
                continue;
            }

            // observe what the script would output for this input type
            match checking.reload(candidate, environment.is_remote_control_enabled())? {
                ReloadStatus::Disconnect => {
                    debug!("Disconnect filter by script request");
                    self.filter_disconnected = true;
                    return Err(NegotiationError::Disconnected);
                }
                ReloadStatus::Loaded => {}
            }

            let script_info = checking.script_video_info();
            let mut any_output = false;
            for output_pixel_format in lookup_script_pixel_type(script_info.pixel_type) {
                let output_media_type =
                    generate_media_type(output_pixel_format, candidate, &script_info);
                debug!(
                    input = input_pixel_format.name,
                    output = output_pixel_format.name,
                    "Add compatible formats"
                );
                self.compatible_media_types.push(MediaTypePair {
                    input_media_type: candidate.clone(),
                    input_pixel_format,
                    output_media_type,
                    output_pixel_format,
                });
                any_output = true;
            }

            if !any_output {
                return Err(NegotiationError::NoCompatibleOutput {
                    script_pixel_type: script_info.pixel_type,
                });
            }
        }

        Ok(())
    }

    /// Accept an input type iff its pixel format appears as some pairing's
    /// input.
    pub fn check_input_type(&self, media_type: &MediaType) -> bool {
        let Some(pixel_format) = media_type_to_pixel_format(media_type) else {
            return false;
        };
        self.compatible_media_types
            .iter()
            .any(|pair| std::ptr::eq(pair.input_pixel_format, pixel_format))
    }

    /// The output media type offered at `position`, in compatibility-set
    /// order.
    pub fn output_media_type(&self, position: usize) -> Option<&MediaType> {
        self.compatible_media_types
            .get(position)
            .map(|pair| &pair.output_media_type)
    }

    /// Accept a transform iff it is the currently connected pair or some
    /// pairing matches both sides.
    pub fn check_transform(
        &self,
        input: &MediaType,
        output: &MediaType,
        current: Option<(&MediaType, &MediaType)>,
    ) -> bool {
        if let Some((current_input, current_output)) = current {
            if input == current_input && output == current_output {
                return true;
            }
        }

        let (Some(input_pixel_format), Some(output_pixel_format)) =
            (media_type_to_pixel_format(input), media_type_to_pixel_format(output))
        else {
            return false;
        };

        self.compatible_media_types.iter().any(|pair| {
            std::ptr::eq(pair.input_pixel_format, input_pixel_format)
                && std::ptr::eq(pair.output_pixel_format, output_pixel_format)
        })
    }

    /// All output media types the loaded script can produce for `input`,
    /// in offer order. Used when a runtime format change needs to find an
    /// output type the downstream will take.
    pub fn input_to_output_media_types<'a>(
        &'a self,
        input: &MediaType,
    ) -> impl Iterator<Item = &'a MediaType> + 'a {
        let input_pixel_format = media_type_to_pixel_format(input);
        self.compatible_media_types
            .iter()
            .filter(move |pair| {
                input_pixel_format
                    .is_some_and(|format| std::ptr::eq(pair.input_pixel_format, format))
            })
            .map(|pair| &pair.output_media_type)
    }

    /// Validate the wired pair once both pins are connected.
    ///
    /// Walks pairings whose input pixel format matches the connected
    /// *output* side, skipping the first `watermark` mismatches; each
    /// reconnection attempt raises the watermark so a failed reconnect
    /// advances to the next candidate instead of looping. Intermediate
    /// failures are not fatal; exhaustion is.
    pub fn complete_connect(
        &mut self,
        connected_input: &MediaType,
        connected_output: &MediaType,
    ) -> ConnectDecision {
        let (Some(input_pixel_format), Some(output_pixel_format)) = (
            media_type_to_pixel_format(connected_input),
            media_type_to_pixel_format(connected_output),
        ) else {
            return ConnectDecision::UnexpectedFormat;
        };

        let mut reconnection_index = 0;
        for pair in &self.compatible_media_types {
            if std::ptr::eq(output_pixel_format, pair.input_pixel_format) {
                if std::ptr::eq(input_pixel_format, pair.output_pixel_format) {
                    debug!(
                        input = input_pixel_format.name,
                        output = output_pixel_format.name,
                        "Connected with compatible types"
                    );
                    return ConnectDecision::Compatible;
                }

                if reconnection_index >= self.reconnection_watermark {
                    self.reconnection_watermark += 1;
                    return ConnectDecision::Reconnect(pair.input_media_type.clone());
                }

                reconnection_index += 1;
            }
        }

        debug!(
            watermark = self.reconnection_watermark,
            "No remaining candidate input media type"
        );
        ConnectDecision::Exhausted
    }
}

/// Synthesize an output media type from an input template.
///
/// The subtype, rectangles, frame duration and bitmap geometry are rewritten
/// for the script's output; when the script changed the picture shape and
/// the template carries a display aspect ratio, the ratio is rescaled so
/// pixel aspect is preserved.
pub fn generate_media_type(
    pixel_format: &'static PixelFormat,
    template: &MediaType,
    script_info: &ScriptVideoInfo,
) -> MediaType {
    let mut media_type = template.clone();
    media_type.subtype = pixel_format.media_subtype;

    if let VideoInfo::Header2(header) = &mut media_type.format {
        let template_width = header.bmi.width as i64;
        let template_height = header.bmi.height.abs() as i64;
        // rescale the display aspect ratio with the ratio between the new
        // and old storage aspect, keeping pixel aspect constant
        if script_info.width as i64 * template_height != script_info.height as i64 * template_width
        {
            let (x, y) = reduce_ratio(
                header.pict_aspect_ratio_x as i64 * script_info.width as i64 * template_height,
                header.pict_aspect_ratio_y as i64 * script_info.height as i64 * template_width,
            );
            header.pict_aspect_ratio_x = x as u32;
            header.pict_aspect_ratio_y = y as u32;
        }
    }

    media_type.set_source_target(RectL::new(0, 0, script_info.width, script_info.height));
    media_type.set_avg_time_per_frame(mul_div(
        crate::constants::UNITS,
        script_info.fps_den,
        script_info.fps_num,
    ));

    let subtype = media_type.subtype;
    let bmi = media_type.bitmap_info_mut();
    bmi.width = script_info.width;
    bmi.height = script_info.height;
    bmi.bit_count = pixel_format.bit_count as u16;
    bmi.compression = match FourCc::from_subtype(&subtype) {
        Some(fourcc) => Compression::FourCc(fourcc),
        // uncompressed formats (such as RGB32) have dedicated GUIDs
        None => Compression::Rgb,
    };
    bmi.size_image = bmi.bitmap_size();
    media_type.sample_size = bmi.size_image;

    media_type
}
