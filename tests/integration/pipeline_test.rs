//! Integration tests for the decode-ahead pipeline
//!
//! These drive the decode task against synthetic streams, either through the
//! full playback loop or by hand through the `Pipeline` handles.

use crate::test_utils::*;
use pocket_player::audio::{
    play_pipeline, start_compressed, start_raw_pcm, CancelFlag, LoopStep, MemorySource, NeverCancel,
    PlaybackLoop, PlaybackOutcome,
};
use std::error::Error;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

#[cfg(test)]
mod pipeline_integration_tests {
    use super::*;

    /// Pool of two, three decodable frames, slots released by hand.
    #[test]
    fn test_decode_task_stalls_until_a_slot_is_released() -> Result<(), Box<dyn Error>> {
        let stream = synth_stream(3, 100);
        let pipeline = start_compressed(
            MemorySource::new(stream),
            SyntheticDecoder,
            &test_config(2),
        )?;

        assert!(wait_until(Duration::from_secs(2), || pipeline.ready_len() == 2));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(pipeline.stats().chunks_published(), 2);
        assert_eq!(pipeline.ready_len(), 2);
        assert_eq!(pipeline.free_len(), 0);
        assert!(!pipeline.state().is_done());
        assert!(!pipeline.state().decoder_holds_slot());

        let first = pipeline.take_ready().ok_or("first chunk missing")?;
        assert_eq!(pipeline.chunk(first).samples()[0], 1);
        pipeline.release_free(first);

        assert!(wait_until(Duration::from_secs(2), || pipeline.stats().chunks_published() == 3));
        let second = pipeline.take_ready().ok_or("second chunk missing")?;
        assert_eq!(pipeline.chunk(second).samples()[0], 101);
        pipeline.release_free(second);

        assert!(wait_until(Duration::from_secs(2), || pipeline.state().is_done()));
        let third = pipeline.take_ready().ok_or("third chunk missing")?;
        assert_eq!(pipeline.chunk(third).samples()[0], 201);
        pipeline.release_free(third);

        let teardown = pipeline.teardown(Vec::<usize>::new());
        assert!(teardown.acknowledged);
        assert_eq!(teardown.reclaimed_slots, 2);
        Ok(())
    }

    /// A consumer that never gives slots back stalls the producer without losing any.
    #[test]
    fn test_backpressure_with_withheld_releases() -> Result<(), Box<dyn Error>> {
        let config = test_config(2);
        let pipeline = start_compressed(
            MemorySource::new(synth_stream(10, 50)),
            SyntheticDecoder,
            &config,
        )?;

        let mut held = Vec::new();
        assert!(wait_until(Duration::from_secs(2), || {
            while let Some(index) = pipeline.take_ready() {
                held.push(index);
            }
            held.len() == 2
        }));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pipeline.stats().chunks_published(), 2);
        assert_eq!(pipeline.ready_len(), 0);
        assert!(!pipeline.state().is_done());
        assert!(!pipeline.state().is_task_done());

        let teardown = pipeline.teardown(held);
        assert!(teardown.acknowledged);
        assert_eq!(teardown.reclaimed_slots, 2);
        Ok(())
    }

    /// Stop reaches a decode task blocked on the free queue within one poll interval.
    #[test]
    fn test_stop_is_acknowledged_within_poll_interval() -> Result<(), Box<dyn Error>> {
        let config = test_config(2);
        let pipeline = start_compressed(
            MemorySource::new(synth_stream(10, 50)),
            SyntheticDecoder,
            &config,
        )?;
        assert!(wait_until(Duration::from_secs(2), || pipeline.ready_len() == 2));

        let stopped_at = Instant::now();
        pipeline.request_stop();
        assert!(wait_until(Duration::from_secs(1), || pipeline.state().is_task_done()));
        assert!(stopped_at.elapsed() < config.free_poll() + Duration::from_millis(100));

        let teardown = pipeline.teardown(Vec::<usize>::new());
        assert!(teardown.acknowledged);
        assert_eq!(teardown.reclaimed_slots, 2);
        Ok(())
    }

    /// One garbage byte ahead of a valid frame costs one resync and nothing else.
    #[test]
    fn test_corrupt_leading_byte_is_skipped() -> Result<(), Box<dyn Error>> {
        let mut stream = vec![0x00];
        stream.extend(synth_frame(&[7, 8, 9], 1));

        let mut sink = RecordingSink::fast();
        let pipeline = start_compressed(
            MemorySource::new(stream),
            SyntheticDecoder,
            &test_config(4),
        )?;
        let report = play_pipeline(pipeline, &mut sink, &mut NeverCancel);

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.desync_recoveries, 1);
        assert_eq!(report.chunks_published, 1);
        assert_eq!(sink.all_samples(), vec![7, 8, 9]);
        assert!(report.pool_conserved());
        Ok(())
    }

    #[test]
    fn test_metadata_frames_are_not_published() -> Result<(), Box<dyn Error>> {
        let mut stream = metadata_frame();
        stream.extend(synth_frame(&[1, 2], 1));
        stream.extend(metadata_frame());
        stream.extend(synth_frame(&[3, 4, 5, 6], 2));

        let mut sink = RecordingSink::fast();
        let pipeline = start_compressed(
            MemorySource::new(stream),
            SyntheticDecoder,
            &test_config(4),
        )?;
        let report = play_pipeline(pipeline, &mut sink, &mut NeverCancel);

        assert_eq!(report.skipped_frames, 2);
        assert_eq!(report.chunks_published, 2);
        assert_eq!(sink.submissions, vec![vec![1, 2], vec![3, 4, 5, 6]]);
        Ok(())
    }

    #[test]
    fn test_stream_of_garbage_completes_silently() -> Result<(), Box<dyn Error>> {
        let mut sink = RecordingSink::fast();
        let pipeline = start_compressed(
            MemorySource::new(vec![0x42; 5000]),
            SyntheticDecoder,
            &test_config(4),
        )?;
        let report = play_pipeline(pipeline, &mut sink, &mut NeverCancel);

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.chunks_submitted, 0);
        assert!(report.desync_recoveries > 0);
        assert!(report.pool_conserved());
        Ok(())
    }

    /// Drives the loop by hand to check the in-flight bound and termination on every pass.
    #[test]
    fn test_in_flight_bound_and_liveness() -> Result<(), Box<dyn Error>> {
        for max_in_flight in 1..=3 {
            let mut config = test_config(4);
            config.max_in_flight = max_in_flight;
            let pipeline = start_compressed(
                MemorySource::new(synth_stream(40, 64)),
                SyntheticDecoder,
                &config,
            )?;

            let mut sink = RecordingSink::fast();
            let mut cancel = NeverCancel;
            let mut playback = PlaybackLoop::new(pipeline, &mut sink, &mut cancel);
            assert!(playback.prefill());

            let mut iterations = 0;
            loop {
                let step = playback.step();
                assert!(playback.in_flight() <= max_in_flight);
                if step == LoopStep::Finished {
                    break;
                }
                iterations += 1;
                assert!(iterations < 20_000, "playback did not terminate");
                thread::sleep(Duration::from_millis(1));
            }
            let report = playback.finish();

            assert_eq!(report.outcome, PlaybackOutcome::Completed);
            assert_eq!(report.chunks_submitted, 40);
            assert!(report.max_in_flight <= max_in_flight);
            assert!(report.pool_conserved());
            assert!(sink.max_active <= max_in_flight);
        }
        Ok(())
    }

    /// Summed sample counts match the stream's known length.
    #[test]
    fn test_published_samples_round_trip() -> Result<(), Box<dyn Error>> {
        let frames = 25;
        let frame_len = 120;
        let mut sink = RecordingSink::fast();
        let pipeline = start_compressed(
            MemorySource::new(synth_stream(frames, frame_len)),
            SyntheticDecoder,
            &test_config(3),
        )?;
        let report = play_pipeline(pipeline, &mut sink, &mut NeverCancel);

        let expected = (frames * frame_len) as u64;
        assert_eq!(report.samples_submitted, expected);
        let recorded = sink.all_samples();
        assert_eq!(recorded.len() as u64, expected);
        assert!(recorded.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
        Ok(())
    }

    #[test]
    fn test_rejected_submission_is_retried_in_order() -> Result<(), Box<dyn Error>> {
        let mut sink = RecordingSink::fast();
        sink.reject_next = 3;
        let pipeline = start_compressed(
            MemorySource::new(synth_stream(5, 10)),
            SyntheticDecoder,
            &test_config(4),
        )?;
        let report = play_pipeline(pipeline, &mut sink, &mut NeverCancel);

        assert_eq!(report.rejected_submissions, 3);
        assert_eq!(report.chunks_submitted, 5);
        let recorded = sink.all_samples();
        assert_eq!(recorded, (1..=50).collect::<Vec<i16>>());
        assert!(report.pool_conserved());
        Ok(())
    }

    #[test]
    fn test_cancel_stops_loop_and_sink() -> Result<(), Box<dyn Error>> {
        let config = test_config(4);
        let pipeline = start_compressed(
            MemorySource::new(synth_stream(200, 100)),
            SyntheticDecoder,
            &config,
        )?;
        let flag = CancelFlag::new();
        let trigger = flag.clone();

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.request();
            Instant::now()
        });

        let mut sink = RecordingSink::stuck();
        let mut cancel = flag;
        let report = play_pipeline(pipeline, &mut sink, &mut cancel);
        let finished_at = Instant::now();
        let requested_at = canceller.join().map_err(|_| "canceller panicked")?;

        assert_eq!(report.outcome, PlaybackOutcome::Cancelled);
        assert!(finished_at.duration_since(requested_at) < config.teardown_wait());
        assert_eq!(sink.stop_calls, 1);
        assert!(report.decode_task_acknowledged);
        assert!(report.pool_conserved());
        assert!(report.chunks_submitted <= 2);
        Ok(())
    }

    #[test]
    fn test_cancel_during_prefill() -> Result<(), Box<dyn Error>> {
        let config = test_config(4);
        // Nothing is ready before the first read returns.
        let source = ChunkedSource::new(synth_stream(10, 10), usize::MAX)
            .with_delay(Duration::from_millis(100));
        let closed = source.closed_flag();
        let pipeline = start_compressed(source, SyntheticDecoder, &config)?;
        let flag = CancelFlag::new();
        flag.request();

        let mut sink = RecordingSink::fast();
        let mut cancel = flag;
        let report = play_pipeline(pipeline, &mut sink, &mut cancel);

        assert_eq!(report.outcome, PlaybackOutcome::Cancelled);
        assert_eq!(report.chunks_submitted, 0);
        assert_eq!(sink.stop_calls, 1);
        assert!(report.decode_task_acknowledged);
        assert!(report.pool_conserved());
        assert!(closed.load(Ordering::Acquire));
        Ok(())
    }

    /// Reads shorter than a frame must not be mistaken for corrupt input.
    #[test]
    fn test_short_reads_do_not_split_frames() -> Result<(), Box<dyn Error>> {
        let source = ChunkedSource::new(synth_stream(5, 20), 7);
        let mut sink = RecordingSink::fast();
        let pipeline = start_compressed(source, SyntheticDecoder, &test_config(4))?;
        let report = play_pipeline(pipeline, &mut sink, &mut NeverCancel);

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.desync_recoveries, 0);
        assert_eq!(report.chunks_published, 5);
        assert_eq!(report.samples_submitted, 100);
        assert_eq!(sink.all_samples(), (1..=100).collect::<Vec<i16>>());
        assert!(report.pool_conserved());
        Ok(())
    }

    #[test]
    fn test_source_closed_after_playback_completes() -> Result<(), Box<dyn Error>> {
        let source = ChunkedSource::new(synth_stream(6, 30), 64);
        let closed = source.closed_flag();
        let mut sink = RecordingSink::fast();
        let pipeline = start_compressed(source, SyntheticDecoder, &test_config(4))?;
        let report = play_pipeline(pipeline, &mut sink, &mut NeverCancel);

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert!(closed.load(Ordering::Acquire));
        Ok(())
    }

    #[test]
    fn test_source_closed_after_cancel() -> Result<(), Box<dyn Error>> {
        let source = ChunkedSource::new(synth_stream(200, 100), 4096);
        let closed = source.closed_flag();
        let pipeline = start_compressed(source, SyntheticDecoder, &test_config(4))?;
        let flag = CancelFlag::new();
        let trigger = flag.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.request();
        });

        let mut sink = RecordingSink::stuck();
        let mut cancel = flag;
        let report = play_pipeline(pipeline, &mut sink, &mut cancel);
        canceller.join().map_err(|_| "canceller panicked")?;

        assert_eq!(report.outcome, PlaybackOutcome::Cancelled);
        assert!(report.decode_task_acknowledged);
        assert!(closed.load(Ordering::Acquire));
        Ok(())
    }

    #[test]
    fn test_raw_pcm_source_closed_after_playback() -> Result<(), Box<dyn Error>> {
        let samples: Vec<i16> = (0..3000).collect();
        let source = ChunkedSource::new(wav_file(1, 8000, 16, &s16le_bytes(&samples)), 100);
        let closed = source.closed_flag();
        let mut sink = RecordingSink::fast();
        let pipeline = start_raw_pcm(source, &test_config(3))?;
        let report = play_pipeline(pipeline, &mut sink, &mut NeverCancel);

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(sink.all_samples(), samples);
        assert!(closed.load(Ordering::Acquire));
        Ok(())
    }

    /// Shutdown broadcast from async code reaches a loop running on a blocking thread.
    #[tokio::test]
    async fn test_broadcast_shutdown_cancels_playback() -> Result<(), Box<dyn Error>> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        let handle = tokio::task::spawn_blocking(move || {
            let pipeline = start_compressed(
                MemorySource::new(synth_stream(200, 100)),
                SyntheticDecoder,
                &test_config(4),
            )?;
            let mut sink = RecordingSink::stuck();
            let mut cancel = shutdown_rx;
            Ok::<_, pocket_player::audio::AudioError>(play_pipeline(pipeline, &mut sink, &mut cancel))
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(())?;

        let report = handle.await??;
        assert_eq!(report.outcome, PlaybackOutcome::Cancelled);
        assert!(report.pool_conserved());
        Ok(())
    }
}
