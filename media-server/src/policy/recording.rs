//! Recording policy (spec §4.5): component C5.
//!
//! Stream-copies input video/audio packets into an MP4 or HLS container,
//! rescaling timestamps per packet. Fixes the known bug in spec §9: every
//! packet rescales using *its own* input stream's time base, never the
//! video stream's.

use crate::error::{SessionError, SessionResult};
use crate::session::timebase::{self, PacketTimes, TimeBase};
use crate::session::Policy;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::media::Type as MediaType;
use std::path::{Path, PathBuf};

/// The two recording variants (spec §4.5).
#[derive(Clone, Debug)]
pub enum Variant {
    Mp4,
    Hls { segment_duration: u32 },
}

pub struct RecordingSession {
    source_url: String,
    output_path: PathBuf,
    variant: Variant,

    video_in_index: usize,
    video_out_index: usize,
    video_in_tb: TimeBase,
    video_out_tb: TimeBase,

    audio_in_index: Option<usize>,
    audio_out_index: Option<usize>,
    audio_in_tb: TimeBase,
    audio_out_tb: TimeBase,

    octx: Option<ffmpeg::format::context::Output>,
    header_written: bool,
}

impl RecordingSession {
    pub fn new(source_url: impl Into<String>, output_path: impl Into<PathBuf>, variant: Variant) -> Self {
        Self {
            source_url: source_url.into(),
            output_path: output_path.into(),
            variant,
            video_in_index: 0,
            video_out_index: 0,
            video_in_tb: TimeBase::new(1, 1),
            video_out_tb: TimeBase::new(1, 1),
            audio_in_index: None,
            audio_out_index: None,
            audio_in_tb: TimeBase::new(1, 1),
            audio_out_tb: TimeBase::new(1, 1),
            octx: None,
            header_written: false,
        }
    }

    fn format_name(&self) -> &'static str {
        match self.variant {
            Variant::Mp4 => "mp4",
            Variant::Hls { .. } => "hls",
        }
    }

    fn open_options(&self) -> ffmpeg::Dictionary<'_> {
        let mut dict = ffmpeg::Dictionary::new();
        if let Variant::Hls { segment_duration } = self.variant {
            let segment_template = {
                let stem = self
                    .output_path
                    .to_string_lossy()
                    .trim_end_matches(".m3u8")
                    .to_owned();
                format!("{stem}_%03d.ts")
            };
            dict.set("hls_time", &segment_duration.to_string());
            dict.set("hls_list_size", "0");
            dict.set("hls_segment_filename", &segment_template);
        }
        dict
    }

    fn rational(tb: TimeBase) -> ffmpeg::Rational {
        ffmpeg::Rational::new(tb.num as i32, tb.den as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_name_matches_variant() {
        let mp4 = RecordingSession::new("rtmp://x", "/tmp/out.mp4", Variant::Mp4);
        assert_eq!(mp4.format_name(), "mp4");

        let hls = RecordingSession::new(
            "rtmp://x",
            "/tmp/out.m3u8",
            Variant::Hls { segment_duration: 5 },
        );
        assert_eq!(hls.format_name(), "hls");
    }

    #[test]
    fn hls_segment_template_strips_m3u8_extension() {
        let hls = RecordingSession::new(
            "rtmp://x",
            "/tmp/stream.m3u8",
            Variant::Hls { segment_duration: 5 },
        );
        let dict = hls.open_options();
        assert_eq!(dict.get("hls_time"), Some("5"));
        assert_eq!(dict.get("hls_list_size"), Some("0"));
        assert_eq!(dict.get("hls_segment_filename"), Some("/tmp/stream_%03d.ts"));
    }

    #[test]
    fn mp4_has_no_hls_options() {
        let mp4 = RecordingSession::new("rtmp://x", "/tmp/out.mp4", Variant::Mp4);
        let dict = mp4.open_options();
        assert_eq!(dict.get("hls_time"), None);
    }
}

impl Policy for RecordingSession {
    fn output_dir(&self) -> Option<&Path> {
        self.output_path.parent()
    }

    fn init(&mut self, input: &ffmpeg::format::context::Input) -> SessionResult<()> {
        let video_stream = input
            .streams()
            .best(MediaType::Video)
            .ok_or_else(|| SessionError::NoVideoStream {
                url: self.source_url.clone(),
            })?;
        self.video_in_index = video_stream.index();
        let itb = video_stream.time_base();
        self.video_in_tb = TimeBase::new(itb.numerator() as i64, itb.denominator() as i64);

        let frame_rate = video_stream.rate();
        let (fr_num, fr_den) = (frame_rate.numerator().max(1), frame_rate.denominator().max(1));
        self.video_out_tb = TimeBase::new(fr_den as i64, fr_num as i64);

        let audio_stream = input.streams().best(MediaType::Audio);
        if let Some(a) = &audio_stream {
            self.audio_in_index = Some(a.index());
            let atb = a.time_base();
            self.audio_in_tb = TimeBase::new(atb.numerator() as i64, atb.denominator() as i64);
            self.audio_out_tb = self.audio_in_tb;
        }

        let mut octx = ffmpeg::format::output_as(&self.output_path, self.format_name())
            .map_err(|source| SessionError::OpenOutput {
                url: self.output_path.to_string_lossy().into_owned(),
                source,
            })?;

        {
            let mut ost = octx
                .add_stream(None::<ffmpeg::codec::Codec>)
                .map_err(SessionError::Codec)?;
            ost.set_parameters(video_stream.parameters());
            ost.set_rate(frame_rate);
            ost.set_time_base(Self::rational(self.video_out_tb));
            self.video_out_index = ost.index();
        }

        if let Some(a) = &audio_stream {
            let mut ost = octx
                .add_stream(None::<ffmpeg::codec::Codec>)
                .map_err(SessionError::Codec)?;
            ost.set_parameters(a.parameters());
            ost.set_time_base(Self::rational(self.audio_out_tb));
            self.audio_out_index = Some(ost.index());
        }

        octx.write_header_with(self.open_options())
            .map_err(|source| SessionError::OpenOutput {
                url: self.output_path.to_string_lossy().into_owned(),
                source,
            })?;
        self.header_written = true;
        self.octx = Some(octx);

        Ok(())
    }

    fn handle_packet(&mut self, mut packet: ffmpeg::codec::packet::Packet) -> SessionResult<bool> {
        let (out_index, in_tb, out_tb) = if packet.stream() == self.video_in_index {
            (self.video_out_index, self.video_in_tb, self.video_out_tb)
        } else if Some(packet.stream()) == self.audio_in_index {
            (
                self.audio_out_index.expect("audio stream was added"),
                self.audio_in_tb,
                self.audio_out_tb,
            )
        } else {
            return Ok(true);
        };

        let times = timebase::rescale(
            PacketTimes {
                pts: packet.pts(),
                dts: packet.dts(),
                duration: packet.duration(),
            },
            in_tb,
            out_tb,
        );
        packet.set_pts(times.pts);
        packet.set_dts(times.dts);
        packet.set_duration(times.duration);
        packet.set_stream(out_index);
        packet.set_position(-1);

        let octx = self.octx.as_mut().expect("output opened during init");
        packet.write_interleaved(octx).map_err(SessionError::Write)?;
        Ok(true)
    }

    fn finish(&mut self) -> SessionResult<()> {
        if self.header_written {
            if let Some(octx) = self.octx.as_mut() {
                octx.write_trailer().map_err(SessionError::Write)?;
            }
        }
        Ok(())
    }
}
