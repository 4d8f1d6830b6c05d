//! Shared test fixtures: a scriptable mock frame processor and an
//! in-memory downstream pin.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use framescript::environment::{Environment, Settings};
use framescript::filter::{FilterError, OutputPin, ScriptFilter};
use framescript::format::simd::{input_buffer_padding, output_buffer_padding};
use framescript::format::{get_video_format, lookup_media_subtype};
use framescript::media::media_type::{
    BitmapInfoHeader, Compression, FourCc, MediaType, RectL, VideoInfoHeader,
};
use framescript::media::sample::MediaSample;
use framescript::media::side_data::SideDataStore;
use framescript::processor::frame::{PlanarFrame, ScriptFormat};
use framescript::processor::{
    FrameProcessor, FrameReadyCallback, ProcessorError, ReloadStatus, ScriptVideoInfo,
    SourceFrameSupplier,
};

pub const UNITS: i64 = 10_000_000;

/// Build a `VIDEOINFOHEADER` media type for any table subtype.
pub fn media_type_for(subtype: uuid::Uuid, width: i32, height: i32, avg_time_per_frame: i64) -> MediaType {
    let pixel_format = lookup_media_subtype(&subtype).expect("subtype must be in the table");
    let compression = match FourCc::from_subtype(&subtype) {
        Some(fourcc) => Compression::FourCc(fourcc),
        None => Compression::Rgb,
    };
    let mut bmi = BitmapInfoHeader {
        width,
        height,
        planes: 1,
        bit_count: pixel_format.bit_count as u16,
        compression,
        size_image: 0,
    };
    bmi.size_image = bmi.bitmap_size();
    MediaType::video(
        subtype,
        VideoInfoHeader {
            source: RectL::new(0, 0, width, height.abs()),
            target: RectL::new(0, 0, width, height.abs()),
            bit_rate: 0,
            avg_time_per_frame,
            bmi,
        },
    )
}

/// Wrap pixel bytes in a padded, timed media sample.
pub fn make_sample(payload: &[u8], start: i64, stop: i64) -> MediaSample {
    let mut buffer = payload.to_vec();
    buffer.resize(payload.len() + input_buffer_padding().max(32), 0);
    let mut sample = MediaSample::new(buffer, payload.len());
    sample.set_time(start, stop);
    sample
}

/// Behaviour knobs for the mock script.
#[derive(Clone)]
pub struct ScriptBehavior {
    /// Output pixel type; `None` keeps the source layout.
    pub output_pixel_type: Option<i32>,
    /// Output dimensions; `None` keeps the source dimensions.
    pub output_size: Option<(i32, i32)>,
    /// Output fps; `None` keeps the source rate.
    pub output_fps: Option<(i64, i64)>,
    /// Per-output-frame processing delay.
    pub frame_delay: Duration,
    /// Offset added to every source frame request; a large value starves
    /// the script on purpose.
    pub source_lookahead: i32,
    /// Script asks the filter to disconnect from any media type.
    pub disconnect: bool,
}

impl Default for ScriptBehavior {
    fn default() -> Self {
        Self {
            output_pixel_type: None,
            output_size: None,
            output_fps: None,
            frame_delay: Duration::ZERO,
            source_lookahead: 0,
            disconnect: false,
        }
    }
}

struct LoadedScript {
    source_fps: (i64, i64),
    source_script_format: &'static ScriptFormat,
    source_size: (i32, i32),
    info: ScriptVideoInfo,
}

/// A deterministic in-process stand-in for the script runtime.
pub struct MockProcessor {
    behavior: Mutex<ScriptBehavior>,
    loaded: Mutex<Option<LoadedScript>>,
    supplier: Mutex<Weak<dyn SourceFrameSupplier>>,
    drain_frame: Mutex<Option<Arc<PlanarFrame>>>,
    reload_count: AtomicUsize,
    stopped: AtomicBool,
    error: Mutex<Option<String>>,
}

impl MockProcessor {
    pub fn new(behavior: ScriptBehavior) -> Arc<Self> {
        let dangling: Weak<dyn SourceFrameSupplier> = Weak::<NoSupplier>::new();
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            loaded: Mutex::new(None),
            supplier: Mutex::new(dangling),
            drain_frame: Mutex::new(None),
            reload_count: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            error: Mutex::new(None),
        })
    }

    pub fn identity() -> Arc<Self> {
        Self::new(ScriptBehavior::default())
    }

    pub fn reload_count(&self) -> usize {
        self.reload_count.load(Ordering::Acquire)
    }

    pub fn set_behavior(&self, behavior: ScriptBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_error(&self, error: Option<String>) {
        *self.error.lock() = error;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

struct NoSupplier;

impl SourceFrameSupplier for NoSupplier {
    fn source_frame(&self, _frame_nb: i32) -> Arc<PlanarFrame> {
        unreachable!("no supplier linked")
    }
}

impl FrameProcessor for MockProcessor {
    fn reload(
        &self,
        media_type: &MediaType,
        ignore_disconnect: bool,
    ) -> Result<ReloadStatus, ProcessorError> {
        let source_format = get_video_format(media_type)?;
        let behavior = self.behavior.lock().clone();

        self.reload_count.fetch_add(1, Ordering::AcqRel);

        if behavior.disconnect && !ignore_disconnect {
            return Ok(ReloadStatus::Disconnect);
        }

        let (width, height) = behavior
            .output_size
            .unwrap_or((source_format.width, source_format.height));
        let (fps_num, fps_den) = behavior
            .output_fps
            .unwrap_or((source_format.fps_num, source_format.fps_den));
        let pixel_type = behavior
            .output_pixel_type
            .unwrap_or(source_format.pixel_format.script_format.id);

        let drain = PlanarFrame::alloc(
            source_format.pixel_format.script_format,
            source_format.width,
            source_format.height,
        );
        *self.drain_frame.lock() = Some(Arc::new(drain));

        *self.loaded.lock() = Some(LoadedScript {
            source_fps: (source_format.fps_num, source_format.fps_den),
            source_script_format: source_format.pixel_format.script_format,
            source_size: (source_format.width, source_format.height),
            info: ScriptVideoInfo { pixel_type, width, height, fps_num, fps_den },
        });
        self.stopped.store(false, Ordering::Release);

        Ok(ReloadStatus::Loaded)
    }

    fn script_video_info(&self) -> ScriptVideoInfo {
        self.loaded.lock().as_ref().expect("script not loaded").info
    }

    fn source_avg_frame_duration(&self) -> i64 {
        let loaded = self.loaded.lock();
        let (num, den) = loaded.as_ref().expect("script not loaded").source_fps;
        UNITS * den / num
    }

    fn script_avg_frame_duration(&self) -> i64 {
        self.script_video_info().avg_frame_duration()
    }

    fn source_avg_frame_rate(&self) -> i32 {
        let loaded = self.loaded.lock();
        let (num, den) = loaded.as_ref().expect("script not loaded").source_fps;
        (num * 1000 / den) as i32
    }

    fn get_frame_async(&self, output_frame_nb: i32, callback: FrameReadyCallback) {
        let behavior = self.behavior.lock().clone();
        let supplier = self.supplier.lock().clone();
        let (source_duration, script_duration, info, identity, source_format) = {
            let loaded = self.loaded.lock();
            let loaded = loaded.as_ref().expect("script not loaded");
            let source_duration = UNITS * loaded.source_fps.1 / loaded.source_fps.0;
            let script_duration = loaded.info.avg_frame_duration();
            let identity = loaded.info.pixel_type == loaded.source_script_format.id
                && (loaded.info.width, loaded.info.height) == loaded.source_size;
            (source_duration, script_duration, loaded.info, identity, loaded.source_script_format)
        };

        std::thread::spawn(move || {
            if !behavior.frame_delay.is_zero() {
                std::thread::sleep(behavior.frame_delay);
            }

            let Some(supplier) = supplier.upgrade() else {
                callback(output_frame_nb, Err("source supplier is gone".to_owned()));
                return;
            };

            let source_index = (output_frame_nb as i64 * script_duration / source_duration) as i32
                + behavior.source_lookahead;
            let source = supplier.source_frame(source_index);

            let frame = if identity {
                source
            } else {
                let format = ScriptFormat::from_id(info.pixel_type)
                    .unwrap_or(source_format);
                let mut frame = PlanarFrame::alloc(format, info.width, info.height);
                *frame.props_mut() = source.props().clone();
                Arc::new(frame)
            };

            callback(output_frame_nb, Ok(frame));
        });
    }

    fn source_drain_frame(&self) -> Arc<PlanarFrame> {
        Arc::clone(self.drain_frame.lock().as_ref().expect("script not loaded"))
    }

    fn stop_script(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn error_text(&self) -> Option<String> {
        self.error.lock().clone()
    }

    fn link_source_supplier(&self, supplier: Weak<dyn SourceFrameSupplier>) {
        *self.supplier.lock() = supplier;
    }
}

/// One sample as seen by the downstream.
#[derive(Clone)]
pub struct DeliveredSample {
    pub data: Vec<u8>,
    pub start_time: i64,
    pub stop_time: i64,
    pub discontinuity: bool,
    pub side_data: SideDataStore,
    pub attached_media_type: Option<MediaType>,
}

/// In-memory downstream connection collecting delivered samples.
pub struct MockOutputPin {
    current_media_type: Mutex<Option<MediaType>>,
    delivered: Mutex<Vec<DeliveredSample>>,
    delivered_cv: Condvar,
    accept_reconnection: AtomicBool,
}

impl MockOutputPin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current_media_type: Mutex::new(None),
            delivered: Mutex::new(Vec::new()),
            delivered_cv: Condvar::new(),
            accept_reconnection: AtomicBool::new(true),
        })
    }

    pub fn set_accept_reconnection(&self, accept: bool) {
        self.accept_reconnection.store(accept, Ordering::Release);
    }

    pub fn delivered(&self) -> Vec<DeliveredSample> {
        self.delivered.lock().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Block until at least `count` samples have arrived.
    pub fn wait_for_delivered(&self, count: usize, timeout: Duration) -> bool {
        let mut delivered = self.delivered.lock();
        while delivered.len() < count {
            if self
                .delivered_cv
                .wait_for(&mut delivered, timeout)
                .timed_out()
            {
                return delivered.len() >= count;
            }
        }
        true
    }
}

impl OutputPin for MockOutputPin {
    fn delivery_buffer(&self, _start_time: i64, _stop_time: i64) -> Result<MediaSample, FilterError> {
        let media_type = self.current_media_type.lock();
        let media_type = media_type.as_ref().ok_or(FilterError::NotConnected)?;
        let size = media_type.bitmap_info().size_image as usize + output_buffer_padding();
        Ok(MediaSample::new(vec![0u8; size], size))
    }

    fn deliver(&self, sample: MediaSample) -> Result<(), FilterError> {
        let delivered = DeliveredSample {
            data: sample.data().to_vec(),
            start_time: sample.time().map(|(start, _)| start).unwrap_or(-1),
            stop_time: sample.time().map(|(_, stop)| stop).unwrap_or(-1),
            discontinuity: sample.is_discontinuity(),
            side_data: sample.side_data().clone(),
            attached_media_type: sample.media_type().cloned(),
        };
        let mut queue = self.delivered.lock();
        queue.push(delivered);
        self.delivered_cv.notify_all();
        Ok(())
    }

    fn receive_connection(&self, media_type: &MediaType) -> bool {
        if self.accept_reconnection.load(Ordering::Acquire) {
            *self.current_media_type.lock() = Some(media_type.clone());
            true
        } else {
            false
        }
    }

    fn current_media_type(&self) -> MediaType {
        self.current_media_type
            .lock()
            .clone()
            .expect("output pin is not connected")
    }

    fn set_media_type(&self, media_type: &MediaType) {
        *self.current_media_type.lock() = Some(media_type.clone());
    }
}

/// A fully wired filter with identity-like mock processors: returns the
/// filter, the main mock, the checking mock and the downstream pin.
pub fn wired_filter(
    behavior: ScriptBehavior,
    settings: Settings,
    input_media_type: &MediaType,
) -> (Arc<ScriptFilter>, Arc<MockProcessor>, Arc<MockProcessor>, Arc<MockOutputPin>) {
    let environment = Arc::new(Environment::new(settings));
    let main = MockProcessor::new(behavior.clone());
    let checking = MockProcessor::new(behavior);
    let output_pin = MockOutputPin::new();

    let main_processor: Arc<dyn FrameProcessor> = main.clone();
    let checking_processor: Arc<dyn FrameProcessor> = checking.clone();
    let downstream: Arc<dyn OutputPin> = output_pin.clone();
    let filter = ScriptFilter::new(environment, main_processor, checking_processor, downstream);

    filter
        .check_connect_input(std::slice::from_ref(input_media_type))
        .expect("enumeration must succeed");

    // prefer the offered output that keeps the wire format, like a
    // passthrough-friendly downstream would
    let mut position = 0;
    let mut output_media_type = None;
    while let Some(candidate) = filter.output_media_type(position) {
        if candidate.subtype == input_media_type.subtype {
            output_media_type = Some(candidate);
            break;
        }
        if output_media_type.is_none() {
            output_media_type = Some(candidate);
        }
        position += 1;
    }
    let output_media_type = output_media_type.expect("an output type is offered");

    // follow the reconnection protocol until the pairing settles
    let mut connected_input = input_media_type.clone();
    let mut rounds = 0;
    loop {
        match filter
            .complete_connect(&connected_input, &output_media_type)
            .expect("connect must succeed")
        {
            framescript::negotiation::ConnectDecision::Compatible => break,
            framescript::negotiation::ConnectDecision::Reconnect(media_type) => {
                connected_input = media_type;
            }
            other => panic!("connection failed: {other:?}"),
        }
        rounds += 1;
        assert!(rounds < 8, "reconnection did not settle");
    }

    (filter, main, checking, output_pin)
}
