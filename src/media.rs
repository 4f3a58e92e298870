//! Subprocess media tool contract (spec §6.4): silence detection, cutting,
//! and duration probing, implemented against ffmpeg/ffprobe.

use regex::Regex;

use crate::error::PipelineError;
use crate::model::SilenceEvent;
use crate::process;

/// The authoritative sample rate (spec §3): intermediate services may
/// resample, but the core never persists sample counts and always
/// normalizes room-tone sources back to this rate.
pub const AUTHORITATIVE_SAMPLE_RATE: u32 = 44_100;

/// One high-frequency probe reading at a seam edge (spec §4.10 step 3):
/// a band-limited RMS measurement and the full-band RMS measurement over
/// the same window, from which `delta = band - full` is derived.
#[derive(Debug, Clone, Copy)]
pub struct ProbeReading {
    pub band_db: f64,
    pub full_db: f64,
}

impl ProbeReading {
    pub fn delta_db(&self) -> f64 {
        self.band_db - self.full_db
    }
}

pub trait MediaTool: Send + Sync {
    fn detect_silence(
        &self,
        audio_path: &str,
        db_floor: f64,
        min_silence_dur: f64,
    ) -> Result<Vec<SilenceEvent>, PipelineError>;

    fn cut(&self, input_path: &str, start: f64, end: f64, output_path: &str) -> Result<(), PipelineError>;

    fn probe_duration(&self, audio_path: &str) -> Result<f64, PipelineError>;

    /// Version string captured into stage fingerprints (spec §2/§4.4).
    fn version(&self) -> Result<String, PipelineError>;

    /// Band-limited and full-band RMS over `[start, end]` of `audio_path`,
    /// the input to the collator's hot/cold seam classification (spec
    /// §4.10 step 3).
    fn measure_window(
        &self,
        audio_path: &str,
        start: f64,
        end: f64,
        band: Option<(f64, f64)>,
    ) -> Result<f64, PipelineError>;

    /// Extract a `duration`-second clip starting at `start` and attenuate
    /// it to `level_db` (spec §4.10 step 1, `auto` room-tone source).
    fn extract_room_tone(
        &self,
        audio_path: &str,
        start: f64,
        duration: f64,
        level_db: f64,
        output_path: &str,
    ) -> Result<(), PipelineError>;

    /// Resample an externally supplied room-tone file to the authoritative
    /// rate, mono (spec §4.10 step 1, `file` room-tone source).
    fn resample_room_tone(&self, input_path: &str, output_path: &str) -> Result<(), PipelineError>;

    /// Render one seam: equal-power (quarter-sine) crossfade joining the
    /// original audio up to `ta`, a room-tone bridge, and the original
    /// audio resuming at `right_start` (spec §4.10 step 5).
    #[allow(clippy::too_many_arguments)]
    fn apply_seam(
        &self,
        input_path: &str,
        room_tone_path: &str,
        ta: f64,
        room_tone_len: f64,
        right_start: f64,
        total_duration: f64,
        fade_l: f64,
        fade_r: f64,
        output_path: &str,
    ) -> Result<(), PipelineError>;
}

#[derive(Clone)]
pub struct FfmpegTool {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self { ffmpeg_bin: "ffmpeg".to_string(), ffprobe_bin: "ffprobe".to_string() }
    }
}

impl MediaTool for FfmpegTool {
    fn detect_silence(
        &self,
        audio_path: &str,
        db_floor: f64,
        min_silence_dur: f64,
    ) -> Result<Vec<SilenceEvent>, PipelineError> {
        let filter = format!("silencedetect=noise={db_floor}dB:d={min_silence_dur}");
        let out = process::run(
            &self.ffmpeg_bin,
            &["-i", audio_path, "-af", &filter, "-f", "null", "-"],
        )?;
        parse_silence_events(&out.stderr)
    }

    fn cut(&self, input_path: &str, start: f64, end: f64, output_path: &str) -> Result<(), PipelineError> {
        let duration = end - start;
        let start_s = format!("{start:.6}");
        let duration_s = format!("{duration:.6}");
        let out = process::run(
            &self.ffmpeg_bin,
            &[
                "-y",
                "-ss",
                &start_s,
                "-i",
                input_path,
                "-t",
                &duration_s,
                "-c",
                "copy",
                output_path,
            ],
        )?;
        if !out.success {
            return Err(PipelineError::InvalidInput(format!(
                "ffmpeg cut failed for {input_path} [{start},{end}]: {}",
                out.stderr
            )));
        }
        Ok(())
    }

    fn probe_duration(&self, audio_path: &str) -> Result<f64, PipelineError> {
        let out = process::run(
            &self.ffprobe_bin,
            &[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                audio_path,
            ],
        )?;
        out.stdout
            .trim()
            .parse::<f64>()
            .map_err(|_| PipelineError::InvalidInput(format!("ffprobe returned no duration for {audio_path}")))
    }

    fn version(&self) -> Result<String, PipelineError> {
        let out = process::run(&self.ffmpeg_bin, &["-version"])?;
        out.stdout
            .lines()
            .next()
            .map(|l| l.to_string())
            .ok_or_else(|| PipelineError::ToolVersionUnknown(self.ffmpeg_bin.clone()))
    }

    fn measure_window(
        &self,
        audio_path: &str,
        start: f64,
        end: f64,
        band: Option<(f64, f64)>,
    ) -> Result<f64, PipelineError> {
        let duration = (end - start).max(0.0);
        let filter = match band {
            Some((low, high)) => format!("highpass=f={low},lowpass=f={high},astats=metadata=0"),
            None => "astats=metadata=0".to_string(),
        };
        let start_s = format!("{start:.6}");
        let dur_s = format!("{duration:.6}");
        let out = process::run(
            &self.ffmpeg_bin,
            &["-v", "info", "-ss", &start_s, "-t", &dur_s, "-i", audio_path, "-af", &filter, "-f", "null", "-"],
        )?;
        parse_rms_db(&out.stderr)
    }

    fn extract_room_tone(
        &self,
        audio_path: &str,
        start: f64,
        duration: f64,
        level_db: f64,
        output_path: &str,
    ) -> Result<(), PipelineError> {
        let raw_path = format!("{output_path}.raw.wav");
        self.cut(audio_path, start, start + duration, &raw_path)?;
        let current_db = self.measure_window(&raw_path, 0.0, duration, None)?;
        let gain = level_db - current_db;
        let vol_filter = format!("volume={gain:.3}dB");
        let out = process::run(&self.ffmpeg_bin, &["-y", "-i", &raw_path, "-af", &vol_filter, output_path])?;
        let _ = std::fs::remove_file(&raw_path);
        if !out.success {
            return Err(PipelineError::InvalidInput(format!(
                "ffmpeg room-tone extraction failed for {audio_path}: {}",
                out.stderr
            )));
        }
        Ok(())
    }

    fn resample_room_tone(&self, input_path: &str, output_path: &str) -> Result<(), PipelineError> {
        let rate = AUTHORITATIVE_SAMPLE_RATE.to_string();
        let out = process::run(
            &self.ffmpeg_bin,
            &["-y", "-i", input_path, "-ar", &rate, "-ac", "1", output_path],
        )?;
        if !out.success {
            return Err(PipelineError::InvalidInput(format!(
                "ffmpeg room-tone resample failed for {input_path}: {}",
                out.stderr
            )));
        }
        Ok(())
    }

    fn apply_seam(
        &self,
        input_path: &str,
        room_tone_path: &str,
        ta: f64,
        room_tone_len: f64,
        right_start: f64,
        total_duration: f64,
        fade_l: f64,
        fade_r: f64,
        output_path: &str,
    ) -> Result<(), PipelineError> {
        let filter = format!(
            "[0:a]atrim=start=0:end={ta:.6},asetpts=PTS-STARTPTS[segA];\
             [1:a]atrim=start=0:end={room_tone_len:.6},asetpts=PTS-STARTPTS[rt];\
             [0:a]atrim=start={right_start:.6}:end={total_duration:.6},asetpts=PTS-STARTPTS[segC];\
             [segA][rt]acrossfade=d={fade_l:.6}:curve1=qsin:curve2=qsin[ar];\
             [ar][segC]acrossfade=d={fade_r:.6}:curve1=qsin:curve2=qsin[out]"
        );
        let out = process::run(
            &self.ffmpeg_bin,
            &["-y", "-i", input_path, "-i", room_tone_path, "-filter_complex", &filter, "-map", "[out]", output_path],
        )?;
        if !out.success {
            return Err(PipelineError::InvalidInput(format!(
                "ffmpeg seam filtergraph failed for {input_path}: {}",
                out.stderr
            )));
        }
        Ok(())
    }
}

/// Parses ffmpeg's `astats` diagnostic output for an `RMS level dB:` line,
/// taking the last occurrence (the filter's overall summary line).
fn parse_rms_db(stderr: &str) -> Result<f64, PipelineError> {
    let re = Regex::new(r"RMS level dB:\s*(-?[0-9.]+)").unwrap();
    re.captures_iter(stderr)
        .last()
        .and_then(|c| c[1].parse::<f64>().ok())
        .ok_or_else(|| PipelineError::InvalidInput("ffmpeg astats produced no RMS level dB line".to_string()))
}

/// Parses `silence_start: <float>` / `silence_end: <float> | silence_duration:
/// <float>` lines from ffmpeg's silencedetect diagnostic stream (spec §6.4).
fn parse_silence_events(stderr: &str) -> Result<Vec<SilenceEvent>, PipelineError> {
    let start_re = Regex::new(r"silence_start:\s*(-?[0-9.]+)").unwrap();
    let end_re = Regex::new(r"silence_end:\s*(-?[0-9.]+)").unwrap();

    let mut events = Vec::new();
    let mut pending_start: Option<f64> = None;

    for line in stderr.lines() {
        if let Some(caps) = start_re.captures(line) {
            let value: f64 = caps[1].parse().map_err(|_| {
                PipelineError::InvalidInput(format!("unparseable silence_start in line: {line}"))
            })?;
            pending_start = Some(value);
        } else if let Some(caps) = end_re.captures(line) {
            let end: f64 = caps[1].parse().map_err(|_| {
                PipelineError::InvalidInput(format!("unparseable silence_end in line: {line}"))
            })?;
            if let Some(start) = pending_start.take() {
                events.push(SilenceEvent::new(start, end));
            }
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paired_start_end_lines() {
        let stderr = "[silencedetect @ 0x0] silence_start: 10\n\
                       [silencedetect @ 0x0] silence_end: 11 | silence_duration: 1\n";
        let events = parse_silence_events(stderr).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, 10.0);
        assert_eq!(events[0].end, 11.0);
        assert_eq!(events[0].mid, 10.5);
    }

    #[test]
    fn ignores_unrelated_lines() {
        let stderr = "frame=  100 fps=25\nsilence_start: 2.5\nsilence_end: 3.0 | silence_duration: 0.5\n";
        let events = parse_silence_events(stderr).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn drops_an_unterminated_start() {
        let stderr = "silence_start: 5.0\n";
        let events = parse_silence_events(stderr).unwrap();
        assert!(events.is_empty());
    }
}
