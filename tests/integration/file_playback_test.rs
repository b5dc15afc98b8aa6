//! Integration tests for playing files from disk
//!
//! Covers format dispatch, WAV streaming and the failures reported before
//! any decode thread exists.

use crate::test_utils::*;
use pocket_player::audio::{
    detect_kind, play_file, play_mp3, play_wav, AudioError, NeverCancel, PipelineConfig,
    PlaybackOutcome, StreamKind, MAX_SAMPLES_PER_FRAME,
};
use std::error::Error;
use std::fs;
use tempfile::tempdir;

#[cfg(test)]
mod file_playback_integration_tests {
    use super::*;

    #[test]
    fn test_empty_files_fail_before_playback() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let config = test_config(4);
        let mut sink = RecordingSink::fast();

        let mp3 = dir.path().join("empty.mp3");
        fs::write(&mp3, b"")?;
        let result = play_mp3(&mp3, &config, &mut sink, &mut NeverCancel);
        assert!(matches!(result, Err(AudioError::FormatFailure(_))));
        let result = play_file(&mp3, &config, &mut sink, &mut NeverCancel);
        assert!(matches!(result, Err(AudioError::FormatFailure(_))));

        let wav = dir.path().join("empty.wav");
        fs::write(&wav, b"")?;
        let result = play_wav(&wav, &config, &mut sink, &mut NeverCancel);
        assert!(matches!(result, Err(AudioError::FormatFailure(_))));

        assert!(sink.submissions.is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_open_failure() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let missing = dir.path().join("missing.wav");
        let mut sink = RecordingSink::fast();

        match play_file(&missing, &test_config(4), &mut sink, &mut NeverCancel) {
            Err(AudioError::OpenFailure { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected OpenFailure, got {:?}", other.map(|r| r.outcome)),
        }
        Ok(())
    }

    #[test]
    fn test_invalid_config_is_rejected_up_front() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let wav = dir.path().join("tone.wav");
        fs::write(&wav, wav_file(1, 8000, 16, &s16le_bytes(&[1, 2, 3])))?;
        let config = PipelineConfig {
            pool_size: 0,
            prefill_chunks: 0,
            ..PipelineConfig::default()
        };

        let result = play_file(&wav, &config, &mut RecordingSink::fast(), &mut NeverCancel);
        assert!(matches!(result, Err(AudioError::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_zero_length_data_chunk_completes_without_submissions() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let wav = dir.path().join("silence.wav");
        fs::write(&wav, wav_file(2, 44100, 16, &[]))?;

        let mut sink = RecordingSink::fast();
        let report = play_wav(&wav, &test_config(4), &mut sink, &mut NeverCancel)?;

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.chunks_published, 0);
        assert_eq!(report.chunks_submitted, 0);
        assert!(report.pool_conserved());
        assert!(sink.submissions.is_empty());
        Ok(())
    }

    /// One second of mono audio comes back sample for sample.
    #[test]
    fn test_wav_samples_round_trip() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let wav = dir.path().join("ramp.wav");
        let samples: Vec<i16> = (0..8000).map(|i| (i * 7 % 20000) as i16 - 10000).collect();
        fs::write(&wav, wav_file(1, 8000, 16, &s16le_bytes(&samples)))?;

        let mut sink = RecordingSink::fast();
        let report = play_wav(&wav, &test_config(4), &mut sink, &mut NeverCancel)?;

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.samples_submitted, 8000);
        assert_eq!(report.chunks_submitted, (8000 + MAX_SAMPLES_PER_FRAME as u64 - 1) / MAX_SAMPLES_PER_FRAME as u64);
        assert_eq!(sink.all_samples(), samples);
        assert!(report.pool_conserved());
        Ok(())
    }

    #[test]
    fn test_eight_bit_stereo_wav_is_widened() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let wav = dir.path().join("u8.wav");
        fs::write(&wav, wav_file(2, 11025, 8, &[128, 0, 255, 128]))?;

        let mut sink = RecordingSink::fast();
        let report = play_wav(&wav, &test_config(4), &mut sink, &mut NeverCancel)?;

        assert_eq!(report.chunks_submitted, 1);
        assert_eq!(sink.all_samples(), vec![0, -32768, 32512, 0]);
        Ok(())
    }

    #[test]
    fn test_truncated_data_chunk_plays_what_exists() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let wav = dir.path().join("short.wav");
        let mut bytes = wav_file(1, 8000, 16, &s16le_bytes(&[5; 100]));
        // Claim twice the data that is present.
        let len_at = bytes.len() - 200 - 4;
        bytes[len_at..len_at + 4].copy_from_slice(&400u32.to_le_bytes());
        fs::write(&wav, bytes)?;

        let mut sink = RecordingSink::fast();
        let report = play_wav(&wav, &test_config(4), &mut sink, &mut NeverCancel)?;

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.samples_submitted, 100);
        Ok(())
    }

    #[test]
    fn test_format_is_sniffed_without_extension() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("recording.bin");
        fs::write(&path, wav_file(1, 8000, 16, &s16le_bytes(&[1, 2, 3, 4])))?;
        assert_eq!(detect_kind(&path)?, StreamKind::RawPcm);

        let mut sink = RecordingSink::fast();
        let report = play_file(&path, &test_config(4), &mut sink, &mut NeverCancel)?;
        assert_eq!(sink.all_samples(), vec![1, 2, 3, 4]);
        assert_eq!(report.outcome, PlaybackOutcome::Completed);

        let unknown = dir.path().join("notes.txt");
        fs::write(&unknown, b"hello world")?;
        assert!(matches!(detect_kind(&unknown), Err(AudioError::FormatFailure(_))));
        Ok(())
    }

    #[test]
    fn test_extension_takes_precedence() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("SONG.MP3");
        fs::write(&path, b"RIFF")?;
        assert_eq!(detect_kind(&path)?, StreamKind::Compressed);
        Ok(())
    }

    /// An .mp3 holding no decodable frames plays nothing and still tears down cleanly.
    #[test]
    fn test_mp3_without_frames_completes_silently() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("junk.mp3");
        let mut bytes = b"ID3\x03\x00\x00\x00\x00\x00\x10".to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend((0..3000u32).map(|i| (i % 200) as u8));
        fs::write(&path, bytes)?;

        let mut sink = RecordingSink::fast();
        let report = play_file(&path, &test_config(4), &mut sink, &mut NeverCancel)?;

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.chunks_submitted, 0);
        assert!(report.skipped_frames >= 1);
        assert!(report.decode_task_acknowledged);
        assert!(report.pool_conserved());
        Ok(())
    }

    #[test]
    fn test_mp3_frames_decode_end_to_end() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("silence.mp3");
        let mut bytes = b"ID3\x03\x00\x00\x00\x00\x00\x10".to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        for _ in 0..12 {
            bytes.extend(silent_mp3_frame());
        }
        let mut tag = b"TAG".to_vec();
        tag.resize(128, b' ');
        bytes.extend(tag);
        fs::write(&path, bytes)?;

        let mut sink = RecordingSink::fast();
        let report = play_mp3(&path, &test_config(4), &mut sink, &mut NeverCancel)?;

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.chunks_submitted, 12);
        assert_eq!(report.samples_submitted, 12 * MAX_SAMPLES_PER_FRAME as u64);
        assert_eq!(report.desync_recoveries, 0);
        assert_eq!(report.skipped_frames, 2);
        assert!(sink.submissions.iter().all(|s| s.len() == MAX_SAMPLES_PER_FRAME));
        assert!(sink.all_samples().iter().all(|&s| s == 0));
        assert!(report.pool_conserved());
        Ok(())
    }
}
