use ffmpeg_next::{Rational, codec};

use super::*;
use crate::{
    logger::MemoryLog,
    media::MediaKind,
    memory::{Failures, MemoryFrame, MemoryLibrary, MemoryPacket, MemoryParameters},
};

const PATH: &str = "/tmp/cam1/segment-0.mp4";

fn video(index: usize) -> SourceTrack<MemoryParameters> {
    SourceTrack::new(
        index,
        Rational::new(1, 90000),
        MemoryParameters::video(codec::Id::H264, 1920, 1080).with_codec_tag(0x3163_7661),
    )
}

fn audio(index: usize) -> SourceTrack<MemoryParameters> {
    SourceTrack::new(
        index,
        Rational::new(1, 8000),
        MemoryParameters::audio(codec::Id::PCM_ALAW, 8000),
    )
}

fn data(index: usize) -> SourceTrack<MemoryParameters> {
    SourceTrack::new(index, Rational::new(1, 1000), MemoryParameters::data())
}

fn writer(library: &MemoryLibrary, log: &MemoryLog) -> StreamWriter<MemoryLibrary> {
    StreamWriter::new(library.clone(), WriterConfig::new("cam1"), PATH).with_logger(log.clone())
}

fn config_writer(
    library: &MemoryLibrary,
    log: &MemoryLog,
    config: WriterConfig,
) -> StreamWriter<MemoryLibrary> {
    StreamWriter::new(library.clone(), config, PATH).with_logger(log.clone())
}

/// Writer with one passthrough video track on source index 0, opened.
fn open_video_writer(library: &MemoryLibrary, log: &MemoryLog) -> StreamWriter<MemoryLibrary> {
    let mut w = writer(library, log);
    assert_eq!(w.copy_tracks(&[video(0)]), 1);
    w.open().unwrap();
    w
}

fn warned(log: &MemoryLog, needle: &str) -> usize {
    log.warnings().iter().filter(|m| m.contains(needle)).count()
}

fn errored(log: &MemoryLog, needle: &str) -> bool {
    log.messages(log::Level::Error)
        .iter()
        .any(|m| m.contains(needle))
}

#[test]
fn only_audio_and_video_tracks_are_registered() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);

    let sources = vec![video(0), data(1), audio(2)];
    assert_eq!(w.copy_tracks(&sources), 2);

    assert_eq!(w.output_index(0), Some(0));
    assert_eq!(w.output_index(1), None);
    assert_eq!(w.output_index(2), Some(1));
    assert_eq!(w.mapping(1).map(|m| m.kind), Some(MediaKind::Other));
    assert_eq!(w.output_track_count(), 2);

    let file = library.last_file().unwrap();
    assert_eq!(file.path, PATH);
    assert_eq!(file.streams.len(), 2);
    assert_eq!(file.streams[0].time_base, Rational::new(1, 90000));
    assert_eq!(file.streams[1].time_base, Rational::new(1, 8000));
    let copied = file.streams[0].parameters.as_ref().unwrap();
    assert_eq!(copied.codec, codec::Id::H264);
    assert_eq!(copied.codec_tag, 0);
}

#[test]
fn registering_a_source_twice_keeps_its_slot() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);

    assert_eq!(w.register_passthrough_track(&audio(3)).unwrap(), Some(0));
    assert_eq!(w.register_passthrough_track(&video(1)).unwrap(), Some(1));
    assert_eq!(w.register_passthrough_track(&audio(3)).unwrap(), Some(0));
    assert_eq!(w.register_passthrough_track(&data(4)).unwrap(), None);
    assert_eq!(w.register_passthrough_track(&data(4)).unwrap(), None);
    assert_eq!(w.output_track_count(), 2);
    assert_eq!(library.last_file().unwrap().streams.len(), 2);
}

#[test]
fn copying_parameters_of_unregistered_source_fails() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    w.register_passthrough_track(&video(0)).unwrap();

    assert!(matches!(
        w.copy_track_parameters(&audio(5)),
        Err(WriterError::UnmappedTrack(5))
    ));
}

#[test]
fn packets_of_excluded_or_unknown_tracks_are_dropped() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    w.copy_tracks(&[video(0), data(1)]);
    w.open().unwrap();

    w.write(&MemoryPacket::new(1, 10, 10), &data(1)).unwrap();
    w.write(&MemoryPacket::new(7, 10, 10), &data(7)).unwrap();
    w.write(&MemoryPacket::new(0, 10, 10), &video(0)).unwrap();

    let file = library.last_file().unwrap();
    assert_eq!(file.packets.len(), 1);
    assert_eq!(file.packets[0].stream, 0);
}

#[test]
fn duplicate_decode_time_is_dropped() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    assert_eq!(w.copy_tracks(&[video(0), data(1)]), 1);
    w.open().unwrap();

    for dts in [100, 105, 105] {
        w.write(&MemoryPacket::new(0, dts, dts), &video(0)).unwrap();
        w.write(&MemoryPacket::new(1, dts, dts), &data(1)).unwrap();
    }

    let file = library.last_file().unwrap();
    assert_eq!(file.packets.len(), 2);
    assert_eq!(file.dts_for(0), vec![100, 105]);
    assert_eq!(w.last_dts(0), Some(105));
    assert_eq!(
        warned(&log, "Received duplicate frame from camera cam1 track 0 at dts: 105"),
        1
    );
}

#[test]
fn late_packets_are_moved_forward() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);

    for dts in [100, 90, 95] {
        w.write(&MemoryPacket::new(0, dts, dts), &video(0)).unwrap();
    }

    let file = library.last_file().unwrap();
    assert_eq!(file.dts_for(0), vec![100, 101, 102]);
    assert_eq!(file.pts_for(0), vec![100, 101, 102]);
    assert_eq!(warned(&log, "Shifting frame timestamp due to out of order issue"), 2);
    assert_eq!(warned(&log, "old dts was: 90"), 1);
    assert_eq!(warned(&log, "old dts was: 95"), 1);
}

#[test]
fn shifted_packet_keeps_presentation_offset() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);

    w.write(&MemoryPacket::new(0, 100, 100), &video(0)).unwrap();
    w.write(&MemoryPacket::new(0, 94, 90), &video(0)).unwrap();

    let file = library.last_file().unwrap();
    let shifted = file.packets_for(0)[1];
    assert_eq!(shifted.dts, Some(101));
    assert_eq!(shifted.pts, Some(105));
}

#[test]
fn packet_without_dts_gets_next_tick() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);

    w.write(&MemoryPacket::new(0, 100, 100), &video(0)).unwrap();
    let mut missing = MemoryPacket::new(0, 120, 0);
    missing.dts = None;
    w.write(&missing, &video(0)).unwrap();

    let file = library.last_file().unwrap();
    let written = file.packets_for(0)[1];
    assert_eq!(written.dts, Some(101));
    assert_eq!(written.pts, Some(120));
    assert_eq!(warned(&log, "Packet without dts"), 1);
}

#[test]
fn timestamps_are_rescaled_to_the_container_time_base() {
    let library = MemoryLibrary::new().with_container_time_base(Rational::new(1, 1000));
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);

    let packet = MemoryPacket::new(0, 93000, 90000)
        .with_duration(3000)
        .with_position(4096)
        .key();
    w.write(&packet, &video(0)).unwrap();
    // both land on 1000 ms after rescaling
    w.write(&MemoryPacket::new(0, 90010, 90010), &video(0)).unwrap();

    let file = library.last_file().unwrap();
    assert_eq!(file.packets.len(), 1);
    let written = &file.packets[0];
    assert_eq!(written.dts, Some(1000));
    assert_eq!(written.pts, Some(1033));
    assert_eq!(written.duration, 33);
    assert_eq!(written.position, -1);
    assert!(written.key);
    assert_eq!(warned(&log, "duplicate frame"), 1);

    // caller's packet is untouched
    assert_eq!(packet.dts, Some(90000));
    assert_eq!(packet.position, 4096);
}

#[test]
fn tracks_keep_independent_timing() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    w.copy_tracks(&[video(0), audio(1)]);
    w.open().unwrap();

    w.write(&MemoryPacket::new(0, 500, 500), &video(0)).unwrap();
    w.write(&MemoryPacket::new(1, 10, 10), &audio(1)).unwrap();
    w.write(&MemoryPacket::new(1, 20, 20), &audio(1)).unwrap();

    assert_eq!(w.last_dts(0), Some(500));
    assert_eq!(w.last_dts(1), Some(20));
    assert!(log.warnings().is_empty());
}

#[test]
fn writing_before_open_fails() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    w.copy_tracks(&[video(0)]);

    assert!(matches!(
        w.write(&MemoryPacket::new(0, 1, 1), &video(0)),
        Err(WriterError::NotOpen)
    ));
    assert!(matches!(w.flush_encoders(), Err(WriterError::NotOpen)));
}

#[test]
fn opening_without_tracks_fails() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);

    assert!(matches!(w.open(), Err(WriterError::NoContext)));
    assert!(!w.is_open());
    assert!(library.files().is_empty());
}

#[test]
fn open_writes_header_once() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);
    assert!(w.is_open());
    w.open().unwrap();

    let file = library.last_file().unwrap();
    assert!(file.sink_open);
    assert!(file.header_written);
    assert!(!file.trailer_written);
}

#[test]
fn formats_without_file_skip_the_sink() {
    let library = MemoryLibrary::new().without_file();
    let log = MemoryLog::new();
    let _w = open_video_writer(&library, &log);

    let file = library.last_file().unwrap();
    assert!(!file.sink_open);
    assert!(file.header_written);
}

#[test]
fn sink_failure_leaves_writer_closed() {
    let library = MemoryLibrary::new();
    library.set_failures(Failures {
        open_sink: true,
        ..Default::default()
    });
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    w.copy_tracks(&[video(0)]);

    assert!(matches!(w.open(), Err(WriterError::Io { .. })));
    assert!(!w.is_open());
    assert!(errored(&log, "Could not open output file '/tmp/cam1/segment-0.mp4'"));
}

#[test]
fn header_failure_releases_the_sink() {
    let library = MemoryLibrary::new();
    library.set_failures(Failures {
        write_header: true,
        ..Default::default()
    });
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    w.copy_tracks(&[video(0)]);

    assert!(w.open().is_err());
    assert!(!w.is_open());
    assert!(!library.last_file().unwrap().sink_open);
    assert!(errored(&log, "Error occurred when opening output file"));
}

#[test]
fn context_allocation_failure_is_reported() {
    let library = MemoryLibrary::new();
    library.set_failures(Failures {
        alloc_output: true,
        ..Default::default()
    });
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);

    assert!(matches!(
        w.register_passthrough_track(&video(0)),
        Err(WriterError::Allocation(_))
    ));
    assert_eq!(w.copy_tracks(&[video(0), audio(1)]), 0);
    assert!(!w.has_context());
    assert!(errored(&log, "Could not create output context"));
}

#[test]
fn stream_allocation_failure_excludes_the_source() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    w.register_passthrough_track(&video(0)).unwrap();

    library.set_failures(Failures {
        add_stream: true,
        ..Default::default()
    });
    assert!(w.register_passthrough_track(&audio(1)).is_err());
    assert_eq!(w.mapping(1).and_then(|m| m.output_index), None);
    assert_eq!(w.output_track_count(), 1);
    assert!(errored(&log, "Failed allocating output stream"));
}

#[test]
fn rejected_packet_is_a_muxing_error() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);

    library.set_failures(Failures {
        write_packet: true,
        ..Default::default()
    });
    let err = w.write(&MemoryPacket::new(0, 1, 1), &video(0)).unwrap_err();
    assert!(matches!(err, WriterError::Muxing { ref camera, .. } if camera == "cam1"));
    assert!(errored(&log, "Error muxing packet for camera cam1"));
}

#[test]
fn close_finalizes_the_file() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);
    w.write(&MemoryPacket::new(0, 1, 1), &video(0)).unwrap();

    w.close().unwrap();
    assert!(!w.is_open());
    let file = library.last_file().unwrap();
    assert_eq!(file.flushes, 1);
    assert!(file.trailer_written);
    assert!(!file.sink_open);
    assert!(log.warnings().is_empty());
}

#[test]
fn closing_twice_only_warns() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);

    w.close().unwrap();
    w.close().unwrap();
    assert_eq!(warned(&log, "Attempted to close a output stream that wasn't open"), 1);
    assert_eq!(library.last_file().unwrap().flushes, 1);

    let mut never_opened = writer(&library, &log);
    never_opened.close().unwrap();
    assert_eq!(warned(&log, "wasn't open"), 2);
}

#[test]
fn flush_failure_still_writes_trailer() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);

    library.set_failures(Failures {
        flush: true,
        ..Default::default()
    });
    w.close().unwrap();
    assert!(library.last_file().unwrap().trailer_written);
    assert!(errored(&log, "Error flushing muxing output for camera cam1"));
}

#[test]
fn trailer_failure_is_returned() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);

    library.set_failures(Failures {
        write_trailer: true,
        ..Default::default()
    });
    assert!(w.close().is_err());
    assert!(!w.is_open());
    assert!(!library.last_file().unwrap().sink_open);
}

#[test]
fn finalized_output_cannot_be_reopened() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);
    w.close().unwrap();

    assert!(matches!(w.open(), Err(WriterError::Format(_))));
    assert!(!w.is_open());
}

#[test]
fn changing_path_starts_a_fresh_file() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);
    w.write(&MemoryPacket::new(0, 100, 100), &video(0)).unwrap();

    w.change_path("/tmp/cam1/segment-1.mp4");
    assert_eq!(warned(&log, "while /tmp/cam1/segment-0.mp4 is open"), 1);
    assert_eq!(w.path(), "/tmp/cam1/segment-1.mp4");
    assert!(!w.is_open());
    assert!(!w.has_context());
    assert_eq!(w.output_track_count(), 0);
    assert_eq!(w.output_index(0), None);
    assert!(matches!(
        w.write(&MemoryPacket::new(0, 200, 200), &video(0)),
        Err(WriterError::NotOpen)
    ));

    w.copy_tracks(&[video(0)]);
    w.open().unwrap();
    // lower than anything written before, accepted as the new baseline
    w.write(&MemoryPacket::new(0, 50, 50), &video(0)).unwrap();

    let files = library.files();
    assert_eq!(files.len(), 2);
    assert!(files[0].trailer_written);
    assert!(files[0].freed);
    assert_eq!(files[0].dts_for(0), vec![100]);
    assert_eq!(files[1].path, "/tmp/cam1/segment-1.mp4");
    assert_eq!(files[1].dts_for(0), vec![50]);
    assert_eq!(warned(&log, "Shifting"), 0);
}

#[test]
fn empty_path_is_ignored() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = open_video_writer(&library, &log);

    w.change_path("");
    assert_eq!(w.path(), PATH);
    assert!(w.is_open());
}

#[test]
fn drop_closes_and_frees() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    {
        let mut w = open_video_writer(&library, &log);
        w.write(&MemoryPacket::new(0, 1, 1), &video(0)).unwrap();
    }
    let file = library.last_file().unwrap();
    assert!(file.trailer_written);
    assert!(!file.sink_open);
    assert!(file.freed);
}

#[test]
fn transcoded_audio_falls_back_to_default_encoder() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let config = WriterConfig::new("cam1").with_audio_format("ac3");
    let mut w = config_writer(&library, &log, config);

    let source = audio(1);
    let index = w
        .register_transcoded_track(&source, Some(source.parameters()))
        .unwrap();
    assert_eq!(index, Some(0));

    let opened = library.opened_encoders();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].codec, codec::Id::AAC);
    assert_eq!(opened[0].time_base, Rational::new(1, 8000));
    assert!(!opened[0].global_header);

    let file = library.last_file().unwrap();
    assert_eq!(
        file.streams[0].parameters.as_ref().map(|p| p.codec),
        Some(codec::Id::AAC)
    );
    assert_eq!(file.streams[0].time_base, Rational::new(1, 8000));
    assert_eq!(w.encoder_time_base(1), Some(Rational::new(1, 8000)));
}

#[test]
fn configured_encoder_is_preferred() {
    let library = MemoryLibrary::new()
        .with_encoders(&[codec::Id::AAC, codec::Id::H264, codec::Id::HEVC])
        .with_global_header(true);
    let log = MemoryLog::new();
    let config = WriterConfig::new("cam1").with_video_format("hevc");
    let mut w = config_writer(&library, &log, config);

    let source = video(0);
    w.register_transcoded_track(&source, Some(source.parameters()))
        .unwrap();

    let opened = library.opened_encoders();
    assert_eq!(opened[0].codec, codec::Id::HEVC);
    assert_eq!(opened[0].time_base, Rational::new(1, 90000));
    assert!(opened[0].global_header);
}

#[test]
fn encoded_frames_are_written() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    let source = audio(1);
    w.register_transcoded_track(&source, Some(source.parameters()))
        .unwrap();
    w.open().unwrap();

    for pts in [0, 160, 320] {
        w.write_frame(Some(&MemoryFrame::new(pts)), &source).unwrap();
    }

    let file = library.last_file().unwrap();
    assert_eq!(file.dts_for(0), vec![0, 160, 320]);
    assert!(file.packets.iter().all(|p| p.stream == 0));
}

#[test]
fn flushing_drains_buffered_frames() {
    let library = MemoryLibrary::new().with_encoder_delay(2);
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    let source = video(0);
    w.register_transcoded_track(&source, Some(source.parameters()))
        .unwrap();
    w.open().unwrap();

    for pts in [0, 3000, 6000] {
        w.write_frame(Some(&MemoryFrame::new(pts)), &source).unwrap();
    }
    assert_eq!(library.last_file().unwrap().packets.len(), 1);

    w.flush_encoders().unwrap();
    assert_eq!(
        library.last_file().unwrap().dts_for(0),
        vec![0, 3000, 6000]
    );

    assert!(matches!(
        w.write_frame(Some(&MemoryFrame::new(9000)), &source),
        Err(WriterError::Encoding(_))
    ));
    assert_eq!(warned(&log, "Error during encoding"), 1);
}

#[test]
fn null_frame_flushes_one_encoder() {
    let library = MemoryLibrary::new().with_encoder_delay(1);
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    let source = audio(0);
    w.register_transcoded_track(&source, Some(source.parameters()))
        .unwrap();
    w.open().unwrap();

    w.write_frame(Some(&MemoryFrame::new(0)), &source).unwrap();
    assert!(library.last_file().unwrap().packets.is_empty());
    w.write_frame(None, &source).unwrap();
    assert_eq!(library.last_file().unwrap().packets.len(), 1);
}

#[test]
fn transcoding_requires_decoder_parameters() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);

    assert!(matches!(
        w.register_transcoded_track(&video(0), None),
        Err(WriterError::MissingDecoderParameters(0))
    ));
    assert!(!w.has_context());
}

#[test]
fn missing_encoder_leaves_no_stream() {
    let library = MemoryLibrary::new().with_encoders(&[codec::Id::H264]);
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);

    let source = audio(0);
    assert!(matches!(
        w.register_transcoded_track(&source, Some(source.parameters())),
        Err(WriterError::EncoderNotFound(MediaKind::Audio))
    ));
    assert_eq!(library.last_file().unwrap().streams.len(), 0);
    assert_eq!(warned(&log, "Could not find audio encoder"), 1);
}

#[test]
fn encoder_open_failure_leaves_no_stream() {
    let library = MemoryLibrary::new();
    library.set_failures(Failures {
        open_encoder: true,
        ..Default::default()
    });
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);

    let source = video(0);
    assert!(matches!(
        w.register_transcoded_track(&source, Some(source.parameters())),
        Err(WriterError::Encoding(_))
    ));
    assert_eq!(library.last_file().unwrap().streams.len(), 0);
    assert_eq!(w.output_track_count(), 0);
}

#[test]
fn failed_parameter_copy_leaves_transcoded_source_unregistered() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    w.add_track(&video(0)).unwrap();

    library.set_failures(Failures {
        copy_parameters: true,
        ..Default::default()
    });
    let source = audio(2);
    assert!(matches!(
        w.register_transcoded_track(&source, Some(source.parameters())),
        Err(WriterError::Format(_))
    ));
    assert_eq!(w.mapping(2), None);
    assert_eq!(w.output_track_count(), 1);
    assert_eq!(library.last_file().unwrap().streams.len(), 1);
    assert!(errored(&log, "Could not add output track for transcoded source track 2"));

    // the source can still be copied as is, and the file opens
    library.set_failures(Failures::default());
    assert_eq!(w.add_track(&source).unwrap(), Some(1));
    w.open().unwrap();
    assert!(library.last_file().unwrap().header_written);
}

#[test]
fn failed_passthrough_copy_adds_no_stream() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    w.add_track(&video(0)).unwrap();

    library.set_failures(Failures {
        copy_parameters: true,
        ..Default::default()
    });
    assert_eq!(w.copy_tracks(&[audio(1)]), 0);
    assert_eq!(w.mapping(1), None);
    assert!(errored(&log, "Failed to copy codec parameters"));

    library.set_failures(Failures::default());
    w.open().unwrap();
    assert_eq!(library.last_file().unwrap().streams.len(), 1);
}

#[test]
fn reserved_slot_opens_once_its_parameters_are_copied() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);
    assert_eq!(w.register_passthrough_track(&audio(1)).unwrap(), Some(0));

    library.set_failures(Failures {
        copy_parameters: true,
        ..Default::default()
    });
    assert!(matches!(
        w.copy_track_parameters(&audio(1)),
        Err(WriterError::Format(_))
    ));
    library.set_failures(Failures::default());
    assert!(w.open().is_err());

    w.copy_track_parameters(&audio(1)).unwrap();
    w.open().unwrap();
    let file = library.last_file().unwrap();
    assert_eq!(file.streams[0].time_base, Rational::new(1, 8000));
    assert!(file.header_written);
}

#[test]
fn data_tracks_are_never_transcoded() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);

    let source = data(3);
    assert_eq!(
        w.register_transcoded_track(&source, Some(source.parameters()))
            .unwrap(),
        None
    );
    assert!(library.opened_encoders().is_empty());
}

#[test]
fn frames_are_routed_by_track_mode() {
    let library = MemoryLibrary::new();
    let log = MemoryLog::new();
    let mut w = writer(&library, &log);

    let passthrough = video(0);
    let transcoded = audio(1);
    w.add_track(&passthrough).unwrap();
    w.add_track(&data(2)).unwrap();
    w.register_transcoded_track(&transcoded, Some(transcoded.parameters()))
        .unwrap();

    let frame = MemoryFrame::new(0);
    assert!(matches!(
        w.write_frame(Some(&frame), &transcoded),
        Err(WriterError::NotOpen)
    ));

    w.open().unwrap();
    assert!(matches!(
        w.write_frame(Some(&frame), &passthrough),
        Err(WriterError::NotTranscoded(0))
    ));
    w.write_frame(Some(&frame), &data(2)).unwrap();
    w.write_frame(Some(&frame), &data(9)).unwrap();
    assert!(matches!(
        w.register_transcoded_track(&passthrough, Some(passthrough.parameters())),
        Err(WriterError::NotTranscoded(0))
    ));
    assert_eq!(
        w.register_transcoded_track(&transcoded, Some(transcoded.parameters()))
            .unwrap(),
        Some(1)
    );
    assert_eq!(w.encoder_time_base(0), None);
}
