//! Filter shell
//!
//! The outward face of the filter: receives samples from the upstream,
//! exposes the negotiation callbacks the graph drives during pin
//! connection, owns the shared connection state, and reports status to the
//! remote API. The pin/allocator plumbing itself belongs to the embedding
//! graph; the shell only needs the [`OutputPin`] capability to talk
//! downstream.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

use crate::environment::Environment;
use crate::format::{get_video_format, FormatError, VideoFormat};
use crate::frame_handler::{FrameHandler, SampleOutcome};
use crate::media::allocator::{AllocatorError, AllocatorProperties, SampleAllocator};
use crate::media::media_type::MediaType;
use crate::media::sample::MediaSample;
use crate::negotiation::{ConnectDecision, NegotiationEngine, NegotiationError};
use crate::processor::{FrameProcessor, ProcessorError, ScriptState};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("media type not accepted")]
    TypeNotAccepted,

    #[error("pins are not connected")]
    NotConnected,

    #[error("downstream rejected the sample")]
    DeliveryFailed,

    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Graph-side filter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Stopped,
    Paused,
    Running,
}

/// The downstream connection: a delivery-buffer source and sample sink
/// that may counter-propose media types.
pub trait OutputPin: Send + Sync {
    /// Obtain a buffer for a sample covering `[start_time, stop_time)`.
    /// The returned sample may carry an attached media type when the
    /// downstream proposes a format change.
    fn delivery_buffer(&self, start_time: i64, stop_time: i64)
        -> Result<MediaSample, FilterError>;

    /// Push a finished sample downstream.
    fn deliver(&self, sample: MediaSample) -> Result<(), FilterError>;

    /// Offer a new media type on the live connection. Unlike a bare accept
    /// query, the downstream may counter-propose on the next delivery
    /// buffer.
    fn receive_connection(&self, media_type: &MediaType) -> bool;

    fn current_media_type(&self) -> MediaType;

    fn set_media_type(&self, media_type: &MediaType);
}

/// Connection state shared between the shell, the frame handler and the
/// status API.
#[derive(Default)]
pub struct FilterShared {
    input_media_type: RwLock<Option<MediaType>>,
    input_format: RwLock<Option<VideoFormat>>,
    output_format: RwLock<Option<VideoFormat>>,
    negotiation: Mutex<NegotiationEngine>,
    change_output_media_type: AtomicBool,
    reload_script: AtomicBool,
    is_streaming: AtomicBool,
    playback_error: Mutex<Option<FilterError>>,
}

impl FilterShared {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_media_type(&self) -> Option<MediaType> {
        self.input_media_type.read().clone()
    }

    pub fn set_input_media_type(&self, media_type: Option<MediaType>) {
        *self.input_media_type.write() = media_type;
    }

    pub fn input_format(&self) -> Option<VideoFormat> {
        self.input_format.read().clone()
    }

    pub fn set_input_format(&self, format: Option<VideoFormat>) {
        *self.input_format.write() = format;
    }

    /// Record that HDR metadata was observed on the connection.
    pub fn set_input_hdr(&self, hdr_type: i32, hdr_luminance: i32) {
        if let Some(format) = self.input_format.write().as_mut() {
            format.hdr_type = hdr_type;
            format.hdr_luminance = hdr_luminance;
        }
    }

    pub fn output_format(&self) -> Option<VideoFormat> {
        self.output_format.read().clone()
    }

    pub fn set_output_format(&self, format: VideoFormat) {
        *self.output_format.write() = Some(format);
    }

    pub fn negotiation(&self) -> &Mutex<NegotiationEngine> {
        &self.negotiation
    }

    /// The next received sample must renegotiate the output format first.
    pub fn request_output_media_type_change(&self) {
        self.change_output_media_type.store(true, Ordering::Release);
    }

    /// The next received sample must reload the script first.
    pub fn request_script_reload(&self) {
        self.reload_script.store(true, Ordering::Release);
    }

    pub fn has_pending_format_change(&self) -> bool {
        self.change_output_media_type.load(Ordering::Acquire)
            || self.reload_script.load(Ordering::Acquire)
    }

    pub fn clear_pending_format_change(&self) {
        self.change_output_media_type.store(false, Ordering::Release);
        self.reload_script.store(false, Ordering::Release);
    }

    pub fn set_streaming(&self, streaming: bool) {
        self.is_streaming.store(streaming, Ordering::Release);
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming.load(Ordering::Acquire)
    }

    /// Record an unrecoverable playback failure; the graph embedder polls
    /// this to tear the stream down.
    pub fn abort_playback(&self, error: FilterError) {
        *self.playback_error.lock() = Some(error);
    }

    pub fn playback_error(&self) -> Option<String> {
        self.playback_error.lock().as_ref().map(|error| error.to_string())
    }
}

/// The filter: glue between the graph's pin callbacks, the negotiation
/// engine and the frame pipeline.
pub struct ScriptFilter {
    environment: Arc<Environment>,
    main_processor: Arc<dyn FrameProcessor>,
    checking_processor: Arc<dyn FrameProcessor>,
    shared: Arc<FilterShared>,
    frame_handler: Arc<FrameHandler>,
    state: Mutex<FilterState>,
    video_source_path: RwLock<PathBuf>,
}

impl ScriptFilter {
    /// Wire up a filter around the two processor instances and the
    /// downstream connection, and link the main instance back to the frame
    /// pipeline for source frame requests.
    pub fn new(
        environment: Arc<Environment>,
        main_processor: Arc<dyn FrameProcessor>,
        checking_processor: Arc<dyn FrameProcessor>,
        output_pin: Arc<dyn OutputPin>,
    ) -> Arc<Self> {
        let shared = Arc::new(FilterShared::new());
        let frame_handler = FrameHandler::new(
            Arc::clone(&shared),
            Arc::clone(&environment),
            Arc::clone(&main_processor),
            Arc::clone(&checking_processor),
            output_pin,
        );
        main_processor.link_source_supplier(frame_handler.as_source_supplier());

        Arc::new(Self {
            environment,
            main_processor,
            checking_processor,
            shared,
            frame_handler,
            state: Mutex::new(FilterState::Stopped),
            video_source_path: RwLock::new(PathBuf::new()),
        })
    }

    pub fn shared(&self) -> &Arc<FilterShared> {
        &self.shared
    }

    pub fn frame_handler(&self) -> &Arc<FrameHandler> {
        &self.frame_handler
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    // -------------------------------------------------------------------
    // Negotiation callbacks (driven by the graph during pin connection)
    // -------------------------------------------------------------------

    /// Input-direction connect: enumerate the upstream's media types and
    /// build the compatibility set by probing the checking script
    /// instance.
    pub fn check_connect_input(&self, candidates: &[MediaType]) -> Result<(), NegotiationError> {
        let mut negotiation = self.shared.negotiation.lock();
        if negotiation.is_disconnected() {
            return Err(NegotiationError::Disconnected);
        }
        negotiation.enumerate_upstream_types(
            candidates.iter(),
            self.checking_processor.as_ref(),
            &self.environment,
        )
    }

    pub fn check_input_type(&self, media_type: &MediaType) -> bool {
        self.shared.negotiation.lock().check_input_type(media_type)
    }

    /// The output media type offered at `position`.
    pub fn output_media_type(&self, position: usize) -> Option<MediaType> {
        self.shared.negotiation.lock().output_media_type(position).cloned()
    }

    pub fn check_transform(&self, input: &MediaType, output: &MediaType) -> bool {
        let current_input = self.shared.input_media_type();
        let current_output = self
            .shared
            .output_format
            .read()
            .is_some()
            .then(|| self.output_pin_current_media_type());
        let negotiation = self.shared.negotiation.lock();
        match (&current_input, &current_output) {
            (Some(current_in), Some(current_out)) => {
                negotiation.check_transform(input, output, Some((current_in, current_out)))
            }
            _ => negotiation.check_transform(input, output, None),
        }
    }

    fn output_pin_current_media_type(&self) -> MediaType {
        self.frame_handler.output_pin().current_media_type()
    }

    /// Validate (and on success adopt) the wired pair once both pins are
    /// connected. On [`ConnectDecision::Reconnect`] the embedder reconnects
    /// the input pin with the returned type and calls again; intermediate
    /// failures do not fail the connection, exhaustion does.
    pub fn complete_connect(
        &self,
        connected_input: &MediaType,
        connected_output: &MediaType,
    ) -> Result<ConnectDecision, FilterError> {
        let decision = self
            .shared
            .negotiation
            .lock()
            .complete_connect(connected_input, connected_output);

        if decision == ConnectDecision::Compatible {
            self.adopt_connection(connected_input, connected_output)?;
        }

        Ok(decision)
    }

    fn adopt_connection(
        &self,
        input: &MediaType,
        output: &MediaType,
    ) -> Result<(), FilterError> {
        self.shared.set_input_media_type(Some(input.clone()));
        self.shared.set_input_format(Some(get_video_format(input)?));
        self.shared.set_output_format(get_video_format(output)?);
        self.frame_handler.output_pin().set_media_type(output);
        Ok(())
    }

    /// Drop all per-connection state on pin disconnect.
    pub fn disconnect(&self) {
        self.shared.negotiation.lock().clear();
        self.shared.set_input_media_type(None);
        self.shared.set_input_format(None);
        *self.shared.output_format.write() = None;
    }

    /// Grow the upstream-facing allocator so samples carry the conversion
    /// padding. Call on initial connection and when an already-connected
    /// input renegotiates to a larger frame.
    pub fn configure_input_allocator(
        &self,
        allocator: &SampleAllocator,
        media_type: &MediaType,
    ) -> Result<(), FilterError> {
        let minimum =
            media_type.bitmap_info().size_image as usize + crate::format::simd::input_buffer_padding();
        allocator.ensure_minimum_size(minimum)?;
        Ok(())
    }

    /// Size the downstream-facing allocator: at least two buffers, each
    /// covering the output bitmap plus conversion padding.
    pub fn decide_output_buffer_size(
        &self,
        allocator: &SampleAllocator,
    ) -> Result<AllocatorProperties, FilterError> {
        let output_format = self.shared.output_format().ok_or(FilterError::NotConnected)?;
        let mut request = allocator.properties();
        request.count = request.count.max(2);
        request.size = request.size.max(
            output_format.bmi.size_image as usize + crate::format::simd::output_buffer_padding(),
        );
        Ok(allocator.set_properties(request)?)
    }

    // -------------------------------------------------------------------
    // Streaming
    // -------------------------------------------------------------------

    /// Transition out of Stopped: reload the main script against the
    /// connected input type and start the delivery worker.
    pub fn active(&self) -> Result<(), FilterError> {
        let input_media_type = self.shared.input_media_type().ok_or(FilterError::NotConnected)?;

        // reload here rather than at connect time so that switching the
        // video mid-graph picks up the new source clip
        self.main_processor.reload(&input_media_type, true)?;
        self.frame_handler.start();
        self.shared.set_streaming(true);
        *self.state.lock() = FilterState::Paused;

        debug!("Filter activated");
        Ok(())
    }

    /// Transition to Stopped: flush and join the worker.
    pub fn inactive(&self) {
        self.frame_handler.stop();
        self.shared.set_streaming(false);
        *self.state.lock() = FilterState::Stopped;
        debug!("Filter deactivated");
    }

    pub fn run(&self) {
        *self.state.lock() = FilterState::Running;
    }

    pub fn pause(&self) {
        *self.state.lock() = FilterState::Paused;
    }

    pub fn state(&self) -> FilterState {
        *self.state.lock()
    }

    /// One upstream sample. An attached media type switches the input
    /// format and defers the downstream renegotiation to the frame
    /// handler's receive path.
    pub fn receive(&self, mut sample: MediaSample) -> Result<SampleOutcome, FilterError> {
        if let Some(media_type) = sample.take_media_type() {
            let input_format = get_video_format(&media_type)?;
            debug!(
                format = input_format.pixel_format.name,
                width = input_format.width,
                height = input_format.height,
                "Upstream switched input media type"
            );
            self.shared.set_input_media_type(Some(media_type));
            self.shared.set_input_format(Some(input_format));
            self.shared.request_output_media_type_change();
        }

        Ok(self.frame_handler.add_input_sample(&sample))
    }

    pub fn begin_flush(&self) {
        if self.state() != FilterState::Stopped {
            self.frame_handler.begin_flush();
        }
    }

    /// End a flush; the interim reloads the main script so the next
    /// session starts from a fresh clip.
    pub fn end_flush(&self) {
        if self.state() != FilterState::Stopped {
            self.frame_handler.end_flush(|| {
                if let Some(media_type) = self.shared.input_media_type() {
                    let _ = self.main_processor.reload(&media_type, true);
                }
            });
        }
    }

    // -------------------------------------------------------------------
    // Script control and status
    // -------------------------------------------------------------------

    /// Switch to a new script file; takes effect on the next received
    /// sample.
    pub fn reload_script(&self, script_path: PathBuf) {
        self.environment.set_script_path(script_path);
        self.shared.request_script_reload();
    }

    pub fn script_state(&self) -> ScriptState {
        if self.main_processor.error_text().is_some() {
            return ScriptState::Error;
        }

        match self.state() {
            FilterState::Running => ScriptState::Running,
            FilterState::Stopped => ScriptState::Stopped,
            FilterState::Paused => ScriptState::Paused,
        }
    }

    pub fn script_error_text(&self) -> Option<String> {
        self.main_processor.error_text()
    }

    pub fn main_processor(&self) -> &Arc<dyn FrameProcessor> {
        &self.main_processor
    }

    pub fn input_format(&self) -> Option<VideoFormat> {
        self.shared.input_format()
    }

    pub fn set_video_source_path(&self, path: PathBuf) {
        *self.video_source_path.write() = path;
    }

    pub fn video_source_path(&self) -> PathBuf {
        self.video_source_path.read().clone()
    }
}
