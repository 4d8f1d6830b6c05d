//! End-to-end frame pipeline scenarios
//!
//! Drives a fully wired filter (mock script processor + in-memory
//! downstream) through the streaming contract: identity passthrough,
//! back-pressure, frame rate conversion, chroma ordering, HDR passthrough
//! and flushing.

mod common;

use std::time::Duration;

use common::{make_sample, media_type_for, wired_filter, ScriptBehavior};
use framescript::environment::Settings;
use framescript::media::media_type::{MEDIASUBTYPE_NV12, MEDIASUBTYPE_YV12};
use framescript::media::side_data::{
    HdrContentLightLevel, HdrMetadata, SIDE_DATA_HDR, SIDE_DATA_HDR_CONTENT_LIGHT_LEVEL,
};
use framescript::SampleOutcome;

const FRAME_25FPS: i64 = 400_000;

fn nv12_gradient(width: usize, height: usize) -> Vec<u8> {
    let mut data = vec![0u8; width * height * 3 / 2];
    for row in 0..height {
        data[row * width..(row + 1) * width].fill((row % 256) as u8);
    }
    for pair in data[width * height..].chunks_exact_mut(2) {
        pair[0] = 128;
        pair[1] = 64;
    }
    data
}

/// S1: identity NV12 passthrough delivers one byte-exact sample.
#[test]
fn test_identity_nv12_passthrough() -> anyhow::Result<()> {
    let media_type = media_type_for(MEDIASUBTYPE_NV12, 1920, 1080, FRAME_25FPS);
    let (filter, _main, _checking, output_pin) =
        wired_filter(ScriptBehavior::default(), Settings::default(), &media_type);
    filter.active()?;
    filter.run();

    let payload = nv12_gradient(1920, 1080);
    let outcome = filter.receive(make_sample(&payload, 0, FRAME_25FPS))?;
    assert_eq!(outcome, SampleOutcome::Stored);

    assert!(output_pin.wait_for_delivered(1, Duration::from_secs(5)));
    let delivered = output_pin.delivered();
    let sample = &delivered[0];

    assert_eq!(sample.start_time, 0);
    assert_eq!(sample.stop_time, FRAME_25FPS);
    assert!(sample.discontinuity);
    assert_eq!(&sample.data[..payload.len()], payload.as_slice());

    filter.inactive();
    Ok(())
}

/// S2: a slow script back-pressures the receive path; the source queue
/// stays bounded and all samples arrive in order.
#[test]
fn test_back_pressure_bounds_source_queue() {
    let media_type = media_type_for(MEDIASUBTYPE_NV12, 64, 32, FRAME_25FPS);
    let behavior = ScriptBehavior {
        frame_delay: Duration::from_millis(3),
        ..ScriptBehavior::default()
    };
    let settings = Settings { extra_source_buffer: 4, ..Settings::default() };
    let (filter, _main, _checking, output_pin) = wired_filter(behavior, settings, &media_type);
    filter.active().unwrap();
    filter.run();

    let bound = 2 + 4; // processing minimum plus configured headroom
    let payload = nv12_gradient(64, 32);
    let mut peak = 0;
    for index in 0..100 {
        let start = index as i64 * FRAME_25FPS;
        let outcome = filter
            .receive(make_sample(&payload, start, start + FRAME_25FPS))
            .unwrap();
        assert_eq!(outcome, SampleOutcome::Stored);
        peak = peak.max(filter.frame_handler().input_buffer_size());
    }

    assert!(peak <= bound, "source queue peaked at {peak}, bound {bound}");

    assert!(output_pin.wait_for_delivered(100, Duration::from_secs(10)));
    let delivered = output_pin.delivered();
    assert_eq!(delivered.len(), 100);
    for (index, window) in delivered.windows(2).enumerate() {
        assert!(
            window[0].start_time < window[1].start_time,
            "delivery went backward at {index}"
        );
    }

    filter.inactive();
}

/// S3: 25 fps input with a 50 fps script doubles the output frames with
/// interpolated timestamps.
#[test]
fn test_fps_doubling_timestamps() {
    let media_type = media_type_for(MEDIASUBTYPE_NV12, 64, 32, FRAME_25FPS);
    let behavior = ScriptBehavior {
        output_fps: Some((50, 1)),
        ..ScriptBehavior::default()
    };
    let (filter, _main, _checking, output_pin) =
        wired_filter(behavior, Settings::default(), &media_type);
    filter.active().unwrap();
    filter.run();

    let payload = nv12_gradient(64, 32);
    for index in 0..3 {
        let start = index as i64 * FRAME_25FPS;
        filter
            .receive(make_sample(&payload, start, start + FRAME_25FPS))
            .unwrap();
    }

    assert!(output_pin.wait_for_delivered(4, Duration::from_secs(5)));
    let delivered = output_pin.delivered();
    let times: Vec<(i64, i64)> = delivered
        .iter()
        .take(4)
        .map(|sample| (sample.start_time, sample.stop_time))
        .collect();
    assert_eq!(
        times,
        [
            (0, 200_000),
            (200_000, 400_000),
            (400_000, 600_000),
            (600_000, 800_000),
        ]
    );

    filter.inactive();
}

/// S4: YV12 carries its V plane first; the converter must not swap chroma.
#[test]
fn test_yv12_chroma_ordering() {
    let media_type = media_type_for(MEDIASUBTYPE_YV12, 64, 32, FRAME_25FPS);
    let (filter, _main, _checking, output_pin) =
        wired_filter(ScriptBehavior::default(), Settings::default(), &media_type);
    filter.active().unwrap();
    filter.run();

    let luma = 64 * 32;
    let chroma = luma / 4;
    let mut payload = vec![0u8; luma * 3 / 2];
    payload[luma..luma + chroma].fill(0xE0); // V plane first
    payload[luma + chroma..].fill(0x10); // then U

    filter.receive(make_sample(&payload, 0, FRAME_25FPS)).unwrap();
    assert!(output_pin.wait_for_delivered(1, Duration::from_secs(5)));

    let delivered = output_pin.delivered();
    let data = &delivered[0].data;
    assert!(data[luma..luma + chroma].iter().all(|&byte| byte == 0xE0));
    assert!(data[luma + chroma..luma * 3 / 2].iter().all(|&byte| byte == 0x10));

    filter.inactive();
}

/// S5: HDR side data crosses the filter byte-identically and updates the
/// reported input format.
#[test]
fn test_hdr_side_data_passthrough() {
    let media_type = media_type_for(MEDIASUBTYPE_NV12, 64, 32, FRAME_25FPS);
    let (filter, _main, _checking, output_pin) =
        wired_filter(ScriptBehavior::default(), Settings::default(), &media_type);
    filter.active().unwrap();
    filter.run();

    let hdr = HdrMetadata {
        display_primaries_x: [0.265, 0.150, 0.680],
        display_primaries_y: [0.690, 0.060, 0.320],
        white_point_x: 0.3127,
        white_point_y: 0.3290,
        max_display_mastering_luminance: 4000.0,
        min_display_mastering_luminance: 0.005,
    };
    let light_level = HdrContentLightLevel { max_cll: 1000, max_fall: 400 };

    let payload = nv12_gradient(64, 32);
    let mut sample = make_sample(&payload, 0, FRAME_25FPS);
    sample
        .side_data_mut()
        .store(&SIDE_DATA_HDR, bytemuck::bytes_of(&hdr))
        .unwrap();
    sample
        .side_data_mut()
        .store(&SIDE_DATA_HDR_CONTENT_LIGHT_LEVEL, bytemuck::bytes_of(&light_level))
        .unwrap();
    filter.receive(sample).unwrap();

    assert!(output_pin.wait_for_delivered(1, Duration::from_secs(5)));
    let delivered = output_pin.delivered();
    let side_data = &delivered[0].side_data;
    assert_eq!(
        side_data.retrieve(&SIDE_DATA_HDR).unwrap(),
        bytemuck::bytes_of(&hdr)
    );
    assert_eq!(side_data.hdr_content_light_level().unwrap().max_cll, 1000);

    let input_format = filter.input_format().unwrap();
    assert_eq!(input_format.hdr_type, 1);
    assert_eq!(input_format.hdr_luminance, 1000);

    filter.inactive();
}

/// S6: flushing while the script starves on future source frames delivers
/// nothing, resets the session, and the next session starts from frame 0.
#[test]
fn test_flush_during_starvation() {
    let media_type = media_type_for(MEDIASUBTYPE_NV12, 64, 32, FRAME_25FPS);
    let behavior = ScriptBehavior {
        source_lookahead: 100,
        ..ScriptBehavior::default()
    };
    let (filter, main, _checking, output_pin) =
        wired_filter(behavior, Settings::default(), &media_type);
    filter.active().unwrap();
    filter.run();

    let payload = nv12_gradient(64, 32);
    for index in 0..3 {
        let start = index as i64 * FRAME_25FPS;
        let outcome = filter
            .receive(make_sample(&payload, start, start + FRAME_25FPS))
            .unwrap();
        assert_eq!(outcome, SampleOutcome::Stored);
    }

    let reloads_before = main.reload_count();
    filter.begin_flush();
    filter.end_flush();

    assert_eq!(output_pin.delivered_count(), 0);
    assert_eq!(filter.frame_handler().input_buffer_size(), 0);
    assert_eq!(filter.frame_handler().source_frame_nb(), 0);
    assert_eq!(filter.frame_handler().delivery_frame_nb(), 0);
    assert_eq!(main.reload_count(), reloads_before + 1);

    // next session: a well-behaved script delivers from frame 0 again
    main.set_behavior(ScriptBehavior::default());
    for index in 0..2 {
        let start = index as i64 * FRAME_25FPS;
        filter
            .receive(make_sample(&payload, start, start + FRAME_25FPS))
            .unwrap();
    }

    assert!(output_pin.wait_for_delivered(1, Duration::from_secs(5)));
    let delivered = output_pin.delivered();
    assert_eq!(delivered[0].start_time, 0);
    assert!(delivered[0].discontinuity);

    filter.inactive();
}

/// Samples whose start times go backward are dropped, not reordered.
#[test]
fn test_non_monotonic_sample_dropped() {
    let media_type = media_type_for(MEDIASUBTYPE_NV12, 64, 32, FRAME_25FPS);
    let (filter, _main, _checking, output_pin) =
        wired_filter(ScriptBehavior::default(), Settings::default(), &media_type);
    filter.active().unwrap();
    filter.run();

    let payload = nv12_gradient(64, 32);
    assert_eq!(
        filter.receive(make_sample(&payload, FRAME_25FPS, 2 * FRAME_25FPS)).unwrap(),
        SampleOutcome::Stored
    );
    assert_eq!(
        filter.receive(make_sample(&payload, 0, FRAME_25FPS)).unwrap(),
        SampleOutcome::Skipped
    );
    assert_eq!(
        filter
            .receive(make_sample(&payload, 2 * FRAME_25FPS, 3 * FRAME_25FPS))
            .unwrap(),
        SampleOutcome::Stored
    );
    assert_eq!(filter.frame_handler().source_frame_nb(), 2);

    assert!(output_pin.wait_for_delivered(1, Duration::from_secs(5)));
    filter.inactive();
}

/// A sample without a start time gets one synthesized from the frame index
/// and the average source duration.
#[test]
fn test_missing_sample_time_synthesized() {
    let media_type = media_type_for(MEDIASUBTYPE_NV12, 64, 32, FRAME_25FPS);
    let (filter, _main, _checking, output_pin) =
        wired_filter(ScriptBehavior::default(), Settings::default(), &media_type);
    filter.active().unwrap();
    filter.run();

    let payload = nv12_gradient(64, 32);
    let mut sample = make_sample(&payload, 0, 0);
    sample.clear_time();
    filter.receive(sample).unwrap();

    let mut second = make_sample(&payload, 0, 0);
    second.clear_time();
    filter.receive(second).unwrap();

    assert!(output_pin.wait_for_delivered(2, Duration::from_secs(5)));
    let delivered = output_pin.delivered();
    assert_eq!(delivered[0].start_time, 0);
    assert_eq!(delivered[1].start_time, FRAME_25FPS);

    filter.inactive();
}

/// Delivered output frames are contiguous from 0 and strictly ordered
/// within a session.
#[test]
fn test_delivery_ordering_invariants() {
    let media_type = media_type_for(MEDIASUBTYPE_NV12, 64, 32, FRAME_25FPS);
    let (filter, _main, _checking, output_pin) =
        wired_filter(ScriptBehavior::default(), Settings::default(), &media_type);
    filter.active().unwrap();
    filter.run();

    let payload = nv12_gradient(64, 32);
    for index in 0..20 {
        let start = index as i64 * FRAME_25FPS;
        filter
            .receive(make_sample(&payload, start, start + FRAME_25FPS))
            .unwrap();
    }

    assert!(output_pin.wait_for_delivered(20, Duration::from_secs(5)));
    let delivered = output_pin.delivered();
    for (index, sample) in delivered.iter().enumerate().take(20) {
        assert_eq!(sample.start_time, index as i64 * FRAME_25FPS);
        assert_eq!(sample.discontinuity, index == 0);
    }

    filter.inactive();
}

/// Truncated rational durations drift below the next source start by a few
/// units; the delivered stop time snaps onto it.
#[test]
fn test_stop_time_snaps_to_next_source_start() {
    // ~29.97 fps: 333_333-unit frames against sources at 0 / 333_333 / 666_667
    let frame_duration = 333_333;
    let media_type = media_type_for(MEDIASUBTYPE_NV12, 64, 32, frame_duration);
    // hold output production until all sources are queued
    let behavior = ScriptBehavior {
        frame_delay: Duration::from_millis(50),
        ..ScriptBehavior::default()
    };
    let (filter, _main, _checking, output_pin) =
        wired_filter(behavior, Settings::default(), &media_type);
    filter.active().unwrap();
    filter.run();

    let payload = nv12_gradient(64, 32);
    for start in [0i64, 333_333, 666_667] {
        filter
            .receive(make_sample(&payload, start, start + frame_duration))
            .unwrap();
    }

    assert!(output_pin.wait_for_delivered(2, Duration::from_secs(5)));
    let delivered = output_pin.delivered();

    assert_eq!(delivered[0].start_time, 0);
    assert_eq!(delivered[0].stop_time, 333_333);
    assert_eq!(delivered[1].start_time, 333_333);
    // 333_333 + 333_333 lands one unit short of 666_667
    assert_eq!(delivered[1].stop_time, 666_667);

    filter.inactive();
}

/// A mid-stream input format change renegotiates the output with the
/// downstream and tags the next delivered sample with the new media type.
#[test]
fn test_runtime_format_change() {
    let media_type = media_type_for(MEDIASUBTYPE_NV12, 64, 32, FRAME_25FPS);
    let (filter, _main, _checking, output_pin) =
        wired_filter(ScriptBehavior::default(), Settings::default(), &media_type);
    filter.active().unwrap();
    filter.run();

    let payload = nv12_gradient(64, 32);
    filter.receive(make_sample(&payload, 0, FRAME_25FPS)).unwrap();
    assert!(output_pin.wait_for_delivered(1, Duration::from_secs(5)));

    // upstream switches to YV12 mid-stream via an attached media type
    let new_media_type = media_type_for(MEDIASUBTYPE_YV12, 64, 32, FRAME_25FPS);
    let mut sample = make_sample(&payload, FRAME_25FPS, 2 * FRAME_25FPS);
    sample.set_media_type(new_media_type.clone());
    let outcome = filter.receive(sample).unwrap();
    assert_eq!(outcome, SampleOutcome::Stored);

    assert_eq!(filter.input_format().unwrap().pixel_format.name, "YV12");

    assert!(output_pin.wait_for_delivered(2, Duration::from_secs(5)));
    let delivered = output_pin.delivered();
    let tagged = delivered
        .iter()
        .find(|sample| sample.attached_media_type.is_some())
        .expect("a delivered sample must carry the renegotiated media type");
    assert!(tagged.attached_media_type.is_some());

    filter.inactive();
}
