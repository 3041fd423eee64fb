//! Time base rescaling (spec §4.5, glossary "Time base").
//!
//! Isolated from the ffmpeg-next `Packet`/`Stream` types so the known-bug
//! fix from spec §9 — an audio packet must rescale using *its own* input
//! stream's time base, never the video stream's — is a plain unit test
//! rather than something that needs a live codec.

/// A rational `num/den` time base.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeBase {
    pub num: i64,
    pub den: i64,
}

impl TimeBase {
    pub fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }
}

/// The three timestamp fields carried by a [`ffmpeg_next::Packet`] that
/// must be rescaled together when moving a packet from an input stream's
/// time base to an output stream's.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PacketTimes {
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
}

/// Rescales `times` from `src` to `dst`. Each present field is converted
/// independently via `value * src.num * dst.den / (src.den * dst.num)`,
/// matching `av_rescale_q`'s semantics (ffmpeg-next's `Packet::rescale_ts`
/// wraps the same call).
pub fn rescale(times: PacketTimes, src: TimeBase, dst: TimeBase) -> PacketTimes {
    let conv = |v: i64| -> i64 {
        // i128 avoids overflow on the cross-multiplication for realistic
        // (small) time base values.
        let num = v as i128 * src.num as i128 * dst.den as i128;
        let den = src.den as i128 * dst.num as i128;
        (num / den) as i64
    };
    PacketTimes {
        pts: times.pts.map(conv),
        dts: times.dts.map(conv),
        duration: conv(times.duration),
    }
}

/// `frame_time = packet.pts * time_base.num / time_base.den` (spec §4.4).
pub fn frame_time_seconds(pts: i64, tb: TimeBase) -> f64 {
    pts as f64 * tb.num as f64 / tb.den as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rescale_is_a_no_op() {
        let tb = TimeBase::new(1, 1000);
        let t = PacketTimes {
            pts: Some(12345),
            dts: Some(12300),
            duration: 40,
        };
        assert_eq!(rescale(t, tb, tb), t);
    }

    #[test]
    fn rescales_between_different_time_bases() {
        // 90kHz video time base -> 1/1000 (ms) output time base.
        let src = TimeBase::new(1, 90_000);
        let dst = TimeBase::new(1, 1_000);
        let t = PacketTimes {
            pts: Some(90_000),
            dts: Some(90_000),
            duration: 3_000,
        };
        let out = rescale(t, src, dst);
        assert_eq!(out.pts, Some(1_000));
        assert_eq!(out.dts, Some(1_000));
        assert_eq!(out.duration, 33);
    }

    /// Spec §9 known bug: an audio packet rescaled with the *video*
    /// stream's time base instead of its own produces a wrong result. This
    /// pins the fixed behavior: each stream's packets must be rescaled
    /// using that same stream's own input time base.
    #[test]
    fn audio_packet_uses_its_own_stream_time_base_not_videos() {
        let video_src = TimeBase::new(1, 90_000);
        let audio_src = TimeBase::new(1, 48_000);
        let dst = TimeBase::new(1, 1_000);

        let audio_pkt = PacketTimes {
            pts: Some(48_000),
            dts: Some(48_000),
            duration: 1_024,
        };

        let correct = rescale(audio_pkt, audio_src, dst);
        let buggy = rescale(audio_pkt, video_src, dst);

        assert_eq!(correct.pts, Some(1_000));
        assert_ne!(
            correct, buggy,
            "rescaling audio with the video time base must differ from the fix"
        );
    }

    #[test]
    fn frame_time_matches_pts_times_time_base() {
        let tb = TimeBase::new(1, 1000);
        assert!((frame_time_seconds(2500, tb) - 2.5).abs() < 1e-9);
    }
}
