//! Screenshot policy (spec §4.4): component C4.

use crate::error::{SessionError, SessionResult};
use crate::session::timebase::{frame_time_seconds, TimeBase};
use crate::session::Policy;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::media::Type as MediaType;
use ffmpeg_next::software::scaling;
use std::path::{Path, PathBuf};

/// The four screenshot variants (spec §4.4 table).
#[derive(Clone, Debug)]
pub enum Variant {
    Interval { seconds: f64 },
    Percentage { pct: f64 },
    Immediate,
    SpecificTime { target_seconds: f64 },
}

impl Variant {
    /// Input-compatibility rule enforced by the control adapter (spec §4.4
    /// "Input compatibility rules").
    pub fn requires_live_stream(&self) -> bool {
        matches!(self, Variant::Immediate)
    }

    pub fn requires_file_input(&self) -> bool {
        matches!(self, Variant::Percentage { .. } | Variant::SpecificTime { .. })
    }
}

/// Pure save/stop decision logic for each variant, isolated from ffmpeg so
/// the boundary behaviors in spec §8 are ordinary unit tests.
#[derive(Clone, Debug)]
pub struct Predicate {
    variant: Variant,
    last_saved_time: f64,
    last_saved_pct: f64,
    saved_any: bool,
}

impl Predicate {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            last_saved_time: f64::MIN,
            last_saved_pct: f64::MIN,
            saved_any: false,
        }
    }

    /// Evaluates one decoded frame's timestamp. Returns `(should_save,
    /// should_stop)`; `should_stop` means "stop after this frame is
    /// handled", matching `immediate`/`specific_time`'s self-stop (spec
    /// §4.4).
    pub fn evaluate(&mut self, frame_time: f64, total_duration: Option<f64>) -> (bool, bool) {
        match self.variant {
            Variant::Interval { seconds } => {
                let should = frame_time - self.last_saved_time >= seconds;
                if should {
                    self.last_saved_time = frame_time;
                }
                (should, false)
            }
            Variant::Percentage { pct } => {
                let total = total_duration.unwrap_or(0.0);
                if total <= 0.0 {
                    return (false, false);
                }
                let current_pct = (frame_time / total) * 100.0;
                let should = current_pct - self.last_saved_pct >= pct;
                if should {
                    self.last_saved_pct = current_pct;
                }
                (should, false)
            }
            Variant::Immediate => {
                if self.saved_any {
                    (false, true)
                } else {
                    self.saved_any = true;
                    (true, true)
                }
            }
            Variant::SpecificTime { target_seconds } => {
                if self.saved_any {
                    (false, true)
                } else if frame_time >= target_seconds {
                    self.saved_any = true;
                    (true, true)
                } else {
                    (false, false)
                }
            }
        }
    }
}

/// Drives one screenshot session: decode → scale → PNG-encode → save,
/// gated by a [`Predicate`] (spec §4.4).
pub struct ScreenshotSession {
    source_url: String,
    output_dir: PathBuf,
    prefix: String,
    predicate: Predicate,
    video_index: Option<usize>,
    video_time_base: TimeBase,
    total_duration: Option<f64>,
    decoder: Option<ffmpeg::decoder::Video>,
    scaler: Option<scaling::Context>,
    encoder: Option<ffmpeg::encoder::Video>,
    next_n: u64,
}

impl ScreenshotSession {
    pub fn new(
        source_url: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        variant: Variant,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            predicate: Predicate::new(variant),
            video_index: None,
            video_time_base: TimeBase::new(1, 1),
            total_duration: None,
            decoder: None,
            scaler: None,
            encoder: None,
            next_n: 0,
        }
    }

    fn path_for(&self, n: u64) -> PathBuf {
        self.output_dir.join(format!("{}_{}.png", self.prefix, n))
    }

    fn decode_scale_maybe_save(&mut self, mut frame: ffmpeg::frame::Video) -> SessionResult<bool> {
        let frame_time = frame_time_seconds(frame.pts().unwrap_or(0), self.video_time_base);
        let (should_save, should_stop) = self.predicate.evaluate(frame_time, self.total_duration);

        if should_save {
            let scaler = self.scaler.as_mut().expect("scaler built during init");
            let mut rgb = ffmpeg::frame::Video::empty();
            scaler.run(&frame, &mut rgb).map_err(SessionError::Codec)?;

            let encoder = self.encoder.as_mut().expect("encoder built during init");
            encoder.send_frame(&rgb).map_err(SessionError::Codec)?;

            let mut packet = ffmpeg::codec::packet::Packet::empty();
            while encoder.receive_packet(&mut packet).is_ok() {
                let path = self.path_for(self.next_n);
                std::fs::write(&path, packet.data().unwrap_or(&[]))
                    .map_err(|source| SessionError::CreateDir {
                        dir: self.output_dir.clone(),
                        source,
                    })?;
                self.next_n += 1;
            }
        }

        let _ = &mut frame; // frame dropped after scaling use above
        Ok(!should_stop)
    }
}

impl Policy for ScreenshotSession {
    fn output_dir(&self) -> Option<&Path> {
        Some(&self.output_dir)
    }

    fn init(&mut self, input: &ffmpeg::format::context::Input) -> SessionResult<()> {
        let video_stream = input
            .streams()
            .best(MediaType::Video)
            .ok_or_else(|| SessionError::NoVideoStream {
                url: self.source_url.clone(),
            })?;
        let stream_index = video_stream.index();
        self.video_index = Some(stream_index);
        let (num, den) = (video_stream.time_base().numerator(), video_stream.time_base().denominator());
        self.video_time_base = TimeBase::new(num as i64, den as i64);

        self.total_duration = {
            let dur = input.duration();
            if dur > 0 {
                Some(dur as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE))
            } else {
                None
            }
        };

        let decoder_ctx = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
            .map_err(SessionError::Codec)?;
        let mut decoder_ctx = decoder_ctx;
        decoder_ctx.set_threading(ffmpeg::threading::Config {
            kind: ffmpeg::threading::Type::Frame,
            count: 16,
        });
        let decoder = decoder_ctx.decoder().video().map_err(SessionError::Codec)?;

        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            scaling::Flags::BILINEAR,
        )
        .map_err(SessionError::Codec)?;

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::PNG)
            .ok_or(SessionError::Codec(ffmpeg::Error::EncoderNotFound))?;
        let encoder_ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
        let mut enc = encoder_ctx.encoder().video().map_err(SessionError::Codec)?;
        enc.set_width(decoder.width());
        enc.set_height(decoder.height());
        enc.set_format(Pixel::RGB24);
        enc.set_time_base(ffmpeg::Rational::new(1, 1));
        let encoder = enc.open_as(codec).map_err(SessionError::Codec)?;

        self.decoder = Some(decoder);
        self.scaler = Some(scaler);
        self.encoder = Some(encoder);
        Ok(())
    }

    fn handle_packet(&mut self, packet: ffmpeg::codec::packet::Packet) -> SessionResult<bool> {
        if Some(packet.stream()) != self.video_index {
            return Ok(true);
        }

        let decoder = self.decoder.as_mut().expect("decoder built during init");
        decoder.send_packet(&packet).map_err(SessionError::Codec)?;

        let mut frame = ffmpeg::frame::Video::empty();
        let mut keep_running = true;
        while decoder.receive_frame(&mut frame).is_ok() {
            keep_running = self.decode_scale_maybe_save(frame)?;
            frame = ffmpeg::frame::Video::empty();
            if !keep_running {
                break;
            }
        }
        Ok(keep_running)
    }

    fn finish(&mut self) -> SessionResult<()> {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.send_eof().map_err(SessionError::Codec)?;
            let mut frame = ffmpeg::frame::Video::empty();
            while decoder.receive_frame(&mut frame).is_ok() {
                let _ = self.decode_scale_maybe_save(frame)?;
                frame = ffmpeg::frame::Video::empty();
            }
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.send_eof().map_err(SessionError::Codec)?;
            let mut packet = ffmpeg::codec::packet::Packet::empty();
            while encoder.receive_packet(&mut packet).is_ok() {
                let path = self.path_for(self.next_n);
                std::fs::write(&path, packet.data().unwrap_or(&[]))
                    .map_err(|source| SessionError::CreateDir {
                        dir: self.output_dir.clone(),
                        source,
                    })?;
                self.next_n += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_saves_every_n_seconds() {
        let mut p = Predicate::new(Variant::Interval { seconds: 2.0 });
        assert_eq!(p.evaluate(0.0, None), (true, false));
        assert_eq!(p.evaluate(1.0, None), (false, false));
        assert_eq!(p.evaluate(2.0, None), (true, false));
        assert_eq!(p.evaluate(3.9, None), (false, false));
        assert_eq!(p.evaluate(4.0, None), (true, false));
    }

    #[test]
    fn percentage_saves_on_crossing_threshold() {
        let mut p = Predicate::new(Variant::Percentage { pct: 25.0 });
        assert_eq!(p.evaluate(0.0, Some(100.0)), (true, false));
        assert_eq!(p.evaluate(10.0, Some(100.0)), (false, false));
        assert_eq!(p.evaluate(25.0, Some(100.0)), (true, false));
        assert_eq!(p.evaluate(49.0, Some(100.0)), (false, false));
        assert_eq!(p.evaluate(50.0, Some(100.0)), (true, false));
    }

    #[test]
    fn immediate_saves_exactly_one_frame_then_stops() {
        let mut p = Predicate::new(Variant::Immediate);
        assert_eq!(p.evaluate(0.3, None), (true, true));
        assert_eq!(p.evaluate(0.6, None), (false, true));
    }

    #[test]
    fn specific_time_saves_first_frame_at_or_after_target() {
        let mut p = Predicate::new(Variant::SpecificTime { target_seconds: 5.0 });
        assert_eq!(p.evaluate(4.0, None), (false, false));
        assert_eq!(p.evaluate(4.9, None), (false, false));
        assert_eq!(p.evaluate(5.0, None), (true, true));
        assert_eq!(p.evaluate(5.1, None), (false, true));
    }

    #[test]
    fn variant_input_compatibility_rules() {
        assert!(Variant::Immediate.requires_live_stream());
        assert!(!Variant::Immediate.requires_file_input());
        assert!(Variant::Percentage { pct: 10.0 }.requires_file_input());
        assert!(Variant::SpecificTime { target_seconds: 1.0 }.requires_file_input());
        assert!(!Variant::Interval { seconds: 1.0 }.requires_live_stream());
        assert!(!Variant::Interval { seconds: 1.0 }.requires_file_input());
    }
}
