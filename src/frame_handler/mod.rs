//! Frame pipeline
//!
//! The frame handler owns the two maps at the heart of the filter: source
//! frames keyed by a strictly increasing source frame number, fed by the
//! graph's receive thread under back-pressure, and output samples keyed by
//! output frame number, filled in asynchronously by the script processor
//! and drained in order by the delivery worker thread.
//!
//! Three parties touch this state concurrently: the receive thread
//! (AddInputSample and format changes), the delivery worker, and script
//! threads calling back in for source frames or completing output frames.
//! Maps take reader-writer locks so concurrent source-frame reads never
//! block each other; every blocking wait is a [`Signal`] predicate checked
//! against flush/stop flags.

pub mod rates;
pub mod signal;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use crate::constants::{
    MAX_OUTPUT_FRAME_DURATION_PADDING, NUM_SRC_FRAMES_PER_PROCESSING, UNITS,
};
use crate::environment::Environment;
use crate::filter::{FilterError, FilterShared, OutputPin};
use crate::format::convert;
use crate::format::get_video_format;
use crate::media::sample::MediaSample;
use crate::media::side_data::SideDataStore;
use crate::negotiation::generate_media_type;
use crate::processor::frame::PlanarFrame;
use crate::processor::{FrameProcessor, SourceFrameSupplier};
use crate::util::mul_div;
use rates::FrameRates;
use signal::Signal;

/// Outcome of feeding one upstream sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// The sample was converted and queued.
    Stored,
    /// The sample was dropped without error (flushing, stopping, failed
    /// format change, or non-monotonic start time).
    Skipped,
}

/// A decoded source frame waiting for the script to consume it.
struct SourceFrameInfo {
    frame: Arc<PlanarFrame>,
    start_time: i64,
    hdr_side_data: Arc<SideDataStore>,
}

/// An output frame slot: requested from the script, completed by its
/// callback, consumed by the delivery worker.
struct OutputSampleData {
    source_frame_nb: i32,
    hdr_side_data: Arc<SideDataStore>,
    frame: Option<Arc<PlanarFrame>>,
    errored: bool,
}

/// The frame pipeline. See the module docs for the threading model.
pub struct FrameHandler {
    /// Back-reference for worker spawning and async callbacks; set once at
    /// construction.
    self_weak: Weak<FrameHandler>,

    shared: Arc<FilterShared>,
    environment: Arc<Environment>,
    main_processor: Arc<dyn FrameProcessor>,
    checking_processor: Arc<dyn FrameProcessor>,
    output_pin: Arc<dyn OutputPin>,

    source_frames: RwLock<BTreeMap<i32, SourceFrameInfo>>,
    output_samples: RwLock<BTreeMap<i32, OutputSampleData>>,

    add_input_signal: Signal,
    new_source_signal: Signal,
    deliver_signal: Signal,
    flush_output_signal: Signal,
    flush_state_signal: Signal,

    next_source_frame_nb: AtomicI32,
    next_process_source_frame_nb: AtomicI32,
    next_output_frame_nb: AtomicI32,
    next_delivery_frame_nb: AtomicI32,
    next_output_source_frame_nb: AtomicI32,
    max_requested_frame_nb: AtomicI32,
    notify_changed_output_media_type: AtomicBool,

    is_flushing: AtomicBool,
    is_stopping: AtomicBool,
    is_worker_latched: AtomicBool,

    input_rates: FrameRates,
    output_rates: FrameRates,
    delivery_rates: FrameRates,

    worker_thread: Mutex<Option<JoinHandle<()>>>,
}

impl FrameHandler {
    pub fn new(
        shared: Arc<FilterShared>,
        environment: Arc<Environment>,
        main_processor: Arc<dyn FrameProcessor>,
        checking_processor: Arc<dyn FrameProcessor>,
        output_pin: Arc<dyn OutputPin>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            shared,
            environment,
            main_processor,
            checking_processor,
            output_pin,
            source_frames: RwLock::new(BTreeMap::new()),
            output_samples: RwLock::new(BTreeMap::new()),
            add_input_signal: Signal::new(),
            new_source_signal: Signal::new(),
            deliver_signal: Signal::new(),
            flush_output_signal: Signal::new(),
            flush_state_signal: Signal::new(),
            next_source_frame_nb: AtomicI32::new(0),
            next_process_source_frame_nb: AtomicI32::new(0),
            next_output_frame_nb: AtomicI32::new(0),
            next_delivery_frame_nb: AtomicI32::new(0),
            next_output_source_frame_nb: AtomicI32::new(0),
            max_requested_frame_nb: AtomicI32::new(0),
            notify_changed_output_media_type: AtomicBool::new(false),
            is_flushing: AtomicBool::new(false),
            is_stopping: AtomicBool::new(false),
            is_worker_latched: AtomicBool::new(false),
            input_rates: FrameRates::new(),
            output_rates: FrameRates::new(),
            delivery_rates: FrameRates::new(),
            worker_thread: Mutex::new(None),
        })
    }

    /// Feed one upstream sample. Called from the graph's receive thread.
    ///
    /// Blocks while the source queue is full and the script is not
    /// starving; converts the sample into a script frame, records its HDR
    /// side data, and pre-schedules every output frame whose index falls
    /// within the source time covered so far.
    pub fn add_input_sample(&self, sample: &MediaSample) -> SampleOutcome {
        let extra_source_buffer = self.environment.extra_source_buffer();
        self.add_input_signal.wait_until(|| {
            if self.is_flushing.load(Ordering::Acquire) {
                return true;
            }

            // keep enough frames queued for stop-time derivation, with
            // configurable headroom before blocking the receive thread
            if self.source_frames.read().len()
                < NUM_SRC_FRAMES_PER_PROCESSING + extra_source_buffer
            {
                return true;
            }

            // the script is ahead of us; let the sample through no matter
            // the queue depth
            self.max_requested_frame_nb.load(Ordering::Acquire)
                >= self.next_source_frame_nb.load(Ordering::Acquire)
        });

        if self.is_flushing.load(Ordering::Acquire) || self.is_stopping.load(Ordering::Acquire) {
            return SampleOutcome::Skipped;
        }

        if self.shared.has_pending_format_change() && !self.change_output_format() {
            return SampleOutcome::Skipped;
        }

        let Some(input_format) = self.shared.input_format() else {
            return SampleOutcome::Skipped;
        };

        let frame_nb = self.next_source_frame_nb.load(Ordering::Acquire);
        let start_time = match sample.time() {
            Some((start, _)) => start,
            // samples without a start time are treated as fixed frame rate
            None => frame_nb as i64 * self.main_processor.source_avg_frame_duration(),
        };

        {
            let frames = self.source_frames.read();
            let last_start_time =
                frames.last_key_value().map(|(_, info)| info.start_time).unwrap_or(-1);
            if start_time <= last_start_time {
                warn!(
                    current = start_time,
                    last = last_start_time,
                    "Rejecting source sample due to start time going backward"
                );
                return SampleOutcome::Skipped;
            }
        }

        self.input_rates.refresh(frame_nb, start_time);

        let mut frame = convert::create_frame(&input_format, sample.buffer());
        let props = frame.props_mut();
        props.field_based = 0;
        props.abs_time = Some(start_time as f64 / UNITS as f64);
        props.sar_num = input_format.pixel_aspect_ratio_num;
        props.sar_den = input_format.pixel_aspect_ratio_den;
        let frame = Arc::new(frame);

        let mut hdr_side_data = SideDataStore::new();
        hdr_side_data.read_from(sample.side_data());
        if let Some(hdr) = hdr_side_data.hdr() {
            let luminance = match hdr_side_data.hdr_content_light_level() {
                Some(light_level) => light_level.max_cll as i32,
                None => hdr.max_display_mastering_luminance as i32,
            };
            self.shared.set_input_hdr(1, luminance);
        }
        let hdr_side_data = Arc::new(hdr_side_data);

        {
            let mut frames = self.source_frames.write();
            frames.insert(
                frame_nb,
                SourceFrameInfo { frame, start_time, hdr_side_data: Arc::clone(&hdr_side_data) },
            );
        }
        self.new_source_signal.notify_all();

        trace!(frame_nb, start_time, "Stored source frame");

        self.next_source_frame_nb.store(frame_nb + 1, Ordering::Release);
        self.next_process_source_frame_nb.store(frame_nb, Ordering::Release);

        // every output index covered by the source time so far gets queued
        // and requested right away; a single-sample session still delivers
        let max_request_output_frame_nb = mul_div(
            frame_nb as i64,
            self.main_processor.source_avg_frame_duration(),
            self.main_processor.script_avg_frame_duration(),
        ) as i32;

        let mut output_frame_nb = self.next_output_frame_nb.load(Ordering::Acquire);
        while output_frame_nb <= max_request_output_frame_nb {
            {
                let mut outputs = self.output_samples.write();
                outputs.insert(
                    output_frame_nb,
                    OutputSampleData {
                        source_frame_nb: frame_nb,
                        hdr_side_data: Arc::clone(&hdr_side_data),
                        frame: None,
                        errored: false,
                    },
                );
            }

            let handler = self.self_weak.clone();
            self.main_processor.get_frame_async(
                output_frame_nb,
                Box::new(move |nb, result| {
                    if let Some(handler) = handler.upgrade() {
                        handler.complete_output_frame(nb, result);
                    }
                }),
            );

            output_frame_nb += 1;
        }
        self.next_output_frame_nb.store(output_frame_nb, Ordering::Release);

        SampleOutcome::Stored
    }

    /// Completion callback for asynchronous output frame requests. Runs on
    /// script processor threads.
    fn complete_output_frame(&self, frame_nb: i32, result: Result<Arc<PlanarFrame>, String>) {
        match result {
            Err(message) => {
                warn!(frame_nb, %message, "Failed to generate output frame");
                if self.is_flushing.load(Ordering::Acquire) {
                    self.output_samples.write().remove(&frame_nb);
                } else if let Some(data) = self.output_samples.write().get_mut(&frame_nb) {
                    data.errored = true;
                }
                self.flush_output_signal.notify_all();
            }
            Ok(frame) => {
                if self.is_flushing.load(Ordering::Acquire) {
                    self.output_samples.write().remove(&frame_nb);
                    self.flush_output_signal.notify_all();
                } else {
                    trace!(frame_nb, "Output frame is ready");
                    if let Some(data) = self.output_samples.write().get_mut(&frame_nb) {
                        data.frame = Some(frame);
                    }
                    self.deliver_signal.notify_all();
                    self.flush_output_signal.notify_all();
                }
            }
        }
    }

    /// Spawn the delivery worker.
    pub fn start(&self) {
        self.is_stopping.store(false, Ordering::Release);
        let Some(handler) = self.self_weak.upgrade() else {
            return;
        };
        match std::thread::Builder::new()
            .name("framescript-worker".to_owned())
            .spawn(move || handler.worker_proc())
        {
            Ok(handle) => *self.worker_thread.lock() = Some(handle),
            Err(source) => error!(%source, "Failed to spawn delivery worker"),
        }
    }

    /// Flush, stop the script so in-flight requests drain, and join the
    /// worker.
    pub fn stop(&self) {
        self.is_stopping.store(true, Ordering::Release);

        self.begin_flush();
        self.end_flush(|| {
            // stopping the script here, while the worker is latched and
            // flushing is still on, guarantees pending source-frame
            // requests drain instead of blocking forever
            self.main_processor.stop_script();
        });

        if let Some(handle) = self.worker_thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Enter the flush state and wake every blocked wait. At most one
    /// flush session is active at a time.
    pub fn begin_flush(&self) {
        debug!("FrameHandler start BeginFlush()");

        loop {
            self.flush_state_signal.wait_until(|| !self.is_flushing.load(Ordering::Acquire));
            if self
                .is_flushing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        self.add_input_signal.notify_all();
        self.new_source_signal.notify_all();
        self.deliver_signal.notify_all();

        debug!("FrameHandler finish BeginFlush()");
    }

    /// Finish a flush: wait for the worker to latch and every outstanding
    /// async output frame to resolve, run `interim` (typically a script
    /// reload), clear both maps and reset the input side.
    pub fn end_flush(&self, interim: impl FnOnce()) {
        debug!("FrameHandler start EndFlush()");

        self.flush_state_signal.wait_until(|| self.is_worker_latched.load(Ordering::Acquire));

        self.flush_output_signal.wait_until(|| {
            self.output_samples
                .read()
                .values()
                .all(|data| data.frame.is_some() || data.errored)
        });

        interim();

        self.source_frames.write().clear();
        self.output_samples.write().clear();
        self.reset_input();

        self.is_flushing.store(false, Ordering::Release);
        self.flush_state_signal.notify_all();

        debug!("FrameHandler finish EndFlush()");
    }

    pub fn is_flushing(&self) -> bool {
        self.is_flushing.load(Ordering::Acquire)
    }

    /// Number of source frames currently queued.
    pub fn input_buffer_size(&self) -> usize {
        self.source_frames.read().len()
    }

    pub fn source_frame_nb(&self) -> i32 {
        self.next_source_frame_nb.load(Ordering::Acquire)
    }

    pub fn output_frame_nb(&self) -> i32 {
        self.next_output_frame_nb.load(Ordering::Acquire)
    }

    pub fn delivery_frame_nb(&self) -> i32 {
        self.next_delivery_frame_nb.load(Ordering::Acquire)
    }

    /// The source frame outputs are currently being linked against.
    pub fn process_source_frame_nb(&self) -> i32 {
        self.next_process_source_frame_nb.load(Ordering::Acquire)
    }

    /// The source frame backing the most recently delivered output.
    pub fn output_source_frame_nb(&self) -> i32 {
        self.next_output_source_frame_nb.load(Ordering::Acquire)
    }

    pub fn current_input_frame_rate(&self) -> i32 {
        self.input_rates.current()
    }

    pub fn current_output_frame_rate(&self) -> i32 {
        self.output_rates.current()
    }

    pub fn current_delivery_frame_rate(&self) -> i32 {
        self.delivery_rates.current()
    }

    fn reset_input(&self) {
        self.next_source_frame_nb.store(0, Ordering::Release);
        self.next_process_source_frame_nb.store(0, Ordering::Release);
        self.next_output_frame_nb.store(0, Ordering::Release);
        self.max_requested_frame_nb.store(0, Ordering::Release);
        self.notify_changed_output_media_type.store(false, Ordering::Release);
        self.input_rates.reset();
        self.output_rates.reset();
    }

    /// Drop every source frame up to and including `up_to`. Frames can be
    /// skipped entirely by rate-decreasing scripts, so this sweeps from the
    /// front rather than erasing one key.
    fn garbage_collect(&self, up_to: i32) {
        {
            let mut frames = self.source_frames.write();
            let before = frames.len();
            while let Some((&key, _)) = frames.first_key_value() {
                if key > up_to {
                    break;
                }
                frames.pop_first();
            }
            trace!(up_to, before, after = frames.len(), "GarbageCollect source frames");
        }
        self.add_input_signal.notify_all();
    }

    /// Runtime format change: stop streaming, flush, reload the script
    /// against the new input type, then re-propose output types until the
    /// downstream takes one. `ReceiveConnection` rather than `QueryAccept`,
    /// because the downstream must be allowed to counter-propose.
    fn change_output_format(&self) -> bool {
        let Some(input_media_type) = self.shared.input_media_type() else {
            return false;
        };

        debug!("Input format change pending; renegotiating output");

        self.shared.set_streaming(false);

        self.begin_flush();
        self.end_flush(|| {
            let _ = self.main_processor.reload(&input_media_type, true);
        });

        self.shared.clear_pending_format_change();

        let mut accepted = false;
        if self.checking_processor.reload(&input_media_type, true).is_ok() {
            let script_info = self.checking_processor.script_video_info();
            for output_pixel_format in
                crate::format::lookup_script_pixel_type(script_info.pixel_type)
            {
                if self.is_flushing.load(Ordering::Acquire) {
                    break;
                }

                let output_media_type =
                    generate_media_type(output_pixel_format, &input_media_type, &script_info);
                let result = self.output_pin.receive_connection(&output_media_type);
                debug!(
                    output = output_pixel_format.name,
                    result, "Attempt to reconnect output pin with media type"
                );

                if result {
                    self.output_pin.set_media_type(&output_media_type);
                    if let Ok(output_format) = get_video_format(&output_media_type) {
                        self.shared.set_output_format(output_format);
                    }
                    self.notify_changed_output_media_type.store(true, Ordering::Release);
                    accepted = true;
                    break;
                }
            }
        }

        if !accepted {
            warn!("Downstream does not accept any of the new output media types");
            self.shared.abort_playback(FilterError::TypeNotAccepted);
            return false;
        }

        self.shared.set_streaming(true);
        true
    }

    fn reset_output(&self) {
        self.next_delivery_frame_nb.store(0, Ordering::Release);
        self.next_output_source_frame_nb.store(0, Ordering::Release);
        self.delivery_rates.reset();
    }

    fn worker_proc(self: Arc<Self>) {
        debug!("Start worker thread");

        let mut next_output_frame_start_time: i64 = 0;
        self.reset_output();
        self.is_worker_latched.store(false, Ordering::Release);
        self.flush_state_signal.notify_all();

        loop {
            if self.is_flushing.load(Ordering::Acquire) {
                self.is_worker_latched.store(true, Ordering::Release);
                self.flush_state_signal.notify_all();
                self.flush_state_signal.wait_until(|| !self.is_flushing.load(Ordering::Acquire));

                if self.is_stopping.load(Ordering::Acquire) {
                    break;
                }

                next_output_frame_start_time = 0;
                self.reset_output();
                self.is_worker_latched.store(false, Ordering::Release);
                self.flush_state_signal.notify_all();
            }

            let mut ready: Option<(i32, i32, Arc<PlanarFrame>, Arc<SideDataStore>)> = None;
            self.deliver_signal.wait_until(|| {
                if self.is_flushing.load(Ordering::Acquire) {
                    return true;
                }

                let outputs = self.output_samples.read();
                let frame_nb = self.next_delivery_frame_nb.load(Ordering::Acquire);
                match outputs.get(&frame_nb) {
                    Some(data) => match &data.frame {
                        Some(frame) => {
                            ready = Some((
                                frame_nb,
                                data.source_frame_nb,
                                Arc::clone(frame),
                                Arc::clone(&data.hdr_side_data),
                            ));
                            true
                        }
                        None => false,
                    },
                    None => false,
                }
            });

            if self.is_flushing.load(Ordering::Acquire) {
                continue;
            }

            let Some((frame_nb, source_frame_nb, frame, hdr_side_data)) = ready else {
                continue;
            };

            self.next_output_source_frame_nb.store(source_frame_nb, Ordering::Release);

            if self.prepare_and_deliver(
                frame_nb,
                source_frame_nb,
                &frame,
                &hdr_side_data,
                &mut next_output_frame_start_time,
            ) {
                trace!(frame_nb, source_frame_nb, "Delivered output sample");
            }

            self.output_samples.write().remove(&frame_nb);
            self.flush_output_signal.notify_all();

            self.garbage_collect(source_frame_nb - 1);
            self.next_delivery_frame_nb.fetch_add(1, Ordering::AcqRel);
        }

        self.is_worker_latched.store(true, Ordering::Release);
        self.flush_state_signal.notify_all();

        debug!("Stop worker thread");
    }

    /// Time, convert and hand one output frame to the downstream.
    fn prepare_and_deliver(
        &self,
        frame_nb: i32,
        source_frame_nb: i32,
        frame: &PlanarFrame,
        hdr_side_data: &SideDataStore,
        next_output_frame_start_time: &mut i64,
    ) -> bool {
        // frame durations attached by the script win over the stream average
        let props = frame.props();
        let frame_duration = match (props.duration_num, props.duration_den) {
            (Some(num), Some(den)) if num > 0 && den > 0 => mul_div(num, UNITS, den),
            _ => self.main_processor.script_avg_frame_duration(),
        };

        let start_time = if frame_nb == 0 {
            self.source_frames
                .read()
                .get(&source_frame_nb)
                .map(|info| info.start_time)
                .unwrap_or(0)
        } else {
            *next_output_frame_start_time
        };
        let mut stop_time = start_time + frame_duration;

        // rational frame durations leave truncation residue every frame;
        // snap the stop time onto the next source frame's start when the
        // gap is within the padding tolerance
        if let Some((_, next_source)) =
            self.source_frames.read().range(source_frame_nb + 1..).next()
        {
            if stop_time < next_source.start_time
                && next_source.start_time - stop_time <= MAX_OUTPUT_FRAME_DURATION_PADDING
            {
                stop_time = next_source.start_time;
            }
        }
        *next_output_frame_start_time = stop_time;

        self.output_rates.refresh(frame_nb, start_time);

        let Ok(mut sample) = self.output_pin.delivery_buffer(start_time, stop_time) else {
            return false;
        };

        // the downstream may counter-propose a media type on the buffer
        if let Some(media_type) = sample.take_media_type() {
            self.output_pin.set_media_type(&media_type);
            if let Ok(output_format) = get_video_format(&media_type) {
                debug!(
                    format = output_format.pixel_format.name,
                    width = output_format.width,
                    height = output_format.height,
                    "New output format"
                );
                self.shared.set_output_format(output_format);
            }
            self.notify_changed_output_media_type.store(true, Ordering::Release);
        }

        // the first sample after a change carries the new media type
        if self.notify_changed_output_media_type.swap(false, Ordering::AcqRel) {
            sample.set_media_type(self.output_pin.current_media_type());
        }

        let Some(output_format) = self.shared.output_format() else {
            return false;
        };

        convert::copy_to_output(&output_format, frame, sample.buffer_mut());
        sample.set_actual_length(output_format.bmi.size_image as usize);

        hdr_side_data.write_to(sample.side_data_mut());

        if frame_nb == 0 {
            sample.set_discontinuity(true);
        }
        sample.set_time(start_time, stop_time);

        if self.output_pin.deliver(sample).is_err() {
            return false;
        }

        self.delivery_rates.refresh(frame_nb, start_time);
        true
    }

    /// Create the weak supplier handle handed to the script processor.
    pub fn as_source_supplier(&self) -> Weak<dyn SourceFrameSupplier> {
        let supplier: Weak<dyn SourceFrameSupplier> = self.self_weak.clone();
        supplier
    }

    pub fn output_pin(&self) -> &Arc<dyn OutputPin> {
        &self.output_pin
    }
}

impl SourceFrameSupplier for FrameHandler {
    /// The script asks for source frame `frame_nb`. Blocks until the frame
    /// (or a later one, if the exact index was dropped) is queued; during a
    /// flush the pre-allocated drain frame is returned so the script can
    /// unwind.
    fn source_frame(&self, frame_nb: i32) -> Arc<PlanarFrame> {
        trace!(frame_nb, "Get source frame");

        self.max_requested_frame_nb.fetch_max(frame_nb, Ordering::AcqRel);
        self.add_input_signal.notify_all();

        let mut found = None;
        self.new_source_signal.wait_until(|| {
            if self.is_flushing.load(Ordering::Acquire) {
                return true;
            }

            let frames = self.source_frames.read();
            match frames.range(frame_nb..).next() {
                Some((_, info)) => {
                    found = Some(Arc::clone(&info.frame));
                    true
                }
                None => false,
            }
        });

        if self.is_flushing.load(Ordering::Acquire) {
            trace!(frame_nb, "Drain source frame request");
            return self.main_processor.source_drain_frame();
        }

        match found {
            Some(frame) => frame,
            None => self.main_processor.source_drain_frame(),
        }
    }
}
