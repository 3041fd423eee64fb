//! Mixing engine (spec §4.6): component C6.
//!
//! Unlike screenshot/recording, mixing reads from N inputs at once, so it
//! does not reuse [`crate::session::MediaSession`]'s single-input read loop
//! (spec §9 design note on why C6 is architecturally distinct). Each input
//! runs its own decode worker feeding a shared "latest frame"/"pending
//! samples" mailbox; a fixed 30fps clock drives composition independently
//! of input arrival rate (spec §4.6 "Composite semantics").

pub mod compositor;
pub mod state;

use crate::error::{SessionError, SessionResult};
use crate::task::{CancelFlag, Runnable, UpdateFn};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::channel_layout::ChannelLayout;
use ffmpeg_next::format::sample::{Sample, Type as SampleType};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::media::Type as MediaType;
use ffmpeg_next::software::{resampling, scaling};
use parking_lot::Mutex;
use state::{Change, MixState, MixStream};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const OUTPUT_FPS: i32 = 30;
const VIDEO_BITRATE: usize = 2_000_000;
const AUDIO_SAMPLE_RATE: i32 = 44_100;
const AUDIO_BITRATE: usize = 128_000;
const AUDIO_FORMAT: Sample = Sample::F32(SampleType::Packed);

/// One live input's decode state, owned for the lifetime of its placement.
/// The reader thread only ever writes `latest_video`/`audio_samples`; the
/// compositor tick only ever reads them.
struct InputWorker {
    latest_video: Arc<Mutex<Option<ffmpeg::frame::Video>>>,
    audio_samples: Arc<Mutex<VecDeque<f32>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InputWorker {
    fn spawn(stream: MixStream) -> Self {
        let latest_video = Arc::new(Mutex::new(None));
        let audio_samples = Arc::new(Mutex::new(VecDeque::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let worker_video = Arc::clone(&latest_video);
        let worker_audio = Arc::clone(&audio_samples);
        let worker_stop = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let url = stream.url.clone();
            if let Err(e) =
                Self::decode_loop(&stream, &worker_video, &worker_audio, &worker_stop)
            {
                slog_scope::warn!("mix input stopped"; "url" => %url, "error" => %e);
            }
        });

        Self {
            latest_video,
            audio_samples,
            stop,
            handle: Some(handle),
        }
    }

    fn decode_loop(
        placement: &MixStream,
        latest_video: &Arc<Mutex<Option<ffmpeg::frame::Video>>>,
        audio_samples: &Arc<Mutex<VecDeque<f32>>>,
        stop: &Arc<AtomicBool>,
    ) -> SessionResult<()> {
        let url = &placement.url;
        let interrupt_stop = Arc::clone(stop);
        let mut input = ffmpeg::format::input_with_interrupt(url, move || {
            interrupt_stop.load(Ordering::SeqCst)
        })
        .map_err(|source| SessionError::OpenInput {
            url: url.clone(),
            source,
        })?;

        let video_index = input.streams().best(MediaType::Video).map(|s| s.index());
        let mut video_decoder = match input.streams().best(MediaType::Video) {
            Some(s) => Some(
                ffmpeg::codec::context::Context::from_parameters(s.parameters())
                    .map_err(SessionError::Codec)?
                    .decoder()
                    .video()
                    .map_err(SessionError::Codec)?,
            ),
            None => None,
        };
        let mut video_scaler: Option<scaling::Context> = None;

        let audio_index = input.streams().best(MediaType::Audio).map(|s| s.index());
        let mut audio_decoder = match input.streams().best(MediaType::Audio) {
            Some(s) => Some(
                ffmpeg::codec::context::Context::from_parameters(s.parameters())
                    .map_err(SessionError::Codec)?
                    .decoder()
                    .audio()
                    .map_err(SessionError::Codec)?,
            ),
            None => None,
        };
        let mut audio_resampler: Option<resampling::Context> = None;

        for (stream, packet) in input.packets() {
            if stop.load(Ordering::SeqCst) {
                return Ok(());
            }

            if Some(stream.index()) == video_index {
                let decoder = video_decoder.as_mut().expect("stream implies decoder");
                decoder.send_packet(&packet).map_err(SessionError::Codec)?;
                let mut frame = ffmpeg::frame::Video::empty();
                while decoder.receive_frame(&mut frame).is_ok() {
                    if video_scaler.is_none() {
                        video_scaler = Some(
                            scaling::Context::get(
                                frame.format(),
                                frame.width(),
                                frame.height(),
                                Pixel::YUV420P,
                                placement.width,
                                placement.height,
                                scaling::Flags::BILINEAR,
                            )
                            .map_err(SessionError::Codec)?,
                        );
                    }
                    let mut scaled = ffmpeg::frame::Video::empty();
                    video_scaler
                        .as_mut()
                        .unwrap()
                        .run(&frame, &mut scaled)
                        .map_err(SessionError::Codec)?;
                    *latest_video.lock() = Some(scaled);
                    frame = ffmpeg::frame::Video::empty();
                }
            } else if Some(stream.index()) == audio_index {
                let decoder = audio_decoder.as_mut().expect("stream implies decoder");
                decoder.send_packet(&packet).map_err(SessionError::Codec)?;
                let mut frame = ffmpeg::frame::Audio::empty();
                while decoder.receive_frame(&mut frame).is_ok() {
                    if audio_resampler.is_none() {
                        audio_resampler = Some(
                            resampling::Context::get(
                                frame.format(),
                                frame.channel_layout(),
                                frame.rate(),
                                AUDIO_FORMAT,
                                ChannelLayout::STEREO,
                                AUDIO_SAMPLE_RATE as u32,
                            )
                            .map_err(SessionError::Codec)?,
                        );
                    }
                    let mut resampled = ffmpeg::frame::Audio::empty();
                    audio_resampler
                        .as_mut()
                        .unwrap()
                        .run(&frame, &mut resampled)
                        .map_err(SessionError::Codec)?;
                    let samples: &[f32] = resampled.plane(0);
                    audio_samples.lock().extend(samples.iter().copied());
                    frame = ffmpeg::frame::Audio::empty();
                }
            }
        }
        Ok(())
    }
}

impl Drop for InputWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Drives one mix output end to end (spec §4.6): decodes the background
/// once, spawns/retires per-input workers as the live layout changes, and
/// composites+encodes+muxes at a fixed 30fps clock.
pub struct MixSession {
    output_url: String,
    background_image: Option<String>,
    width: u32,
    height: u32,
    pending: Arc<Mutex<Option<Vec<MixStream>>>>,
}

impl MixSession {
    pub fn new(
        output_url: impl Into<String>,
        background_image: Option<String>,
        width: u32,
        height: u32,
        initial_streams: Vec<MixStream>,
    ) -> Self {
        Self {
            output_url: output_url.into(),
            background_image,
            width,
            height,
            pending: Arc::new(Mutex::new(Some(initial_streams))),
        }
    }

    /// Decodes the background image once, scaling it to `(width, height)`
    /// `YUV420P` if necessary (spec §4.6 "Initialization" step 2). Absent a
    /// configured image, composites onto a black frame instead.
    fn decode_background(&self) -> SessionResult<ffmpeg::frame::Video> {
        let url = match &self.background_image {
            Some(u) => u.clone(),
            None => return Ok(Self::black_frame(self.width, self.height)),
        };

        let mut input = ffmpeg::format::input(&url).map_err(|source| SessionError::OpenInput {
            url: url.clone(),
            source,
        })?;
        let video_stream = input
            .streams()
            .best(MediaType::Video)
            .ok_or_else(|| SessionError::NoVideoStream { url: url.clone() })?;
        let video_index = video_stream.index();
        let mut decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
            .map_err(SessionError::Codec)?
            .decoder()
            .video()
            .map_err(SessionError::Codec)?;

        for (stream, packet) in input.packets() {
            if stream.index() != video_index {
                continue;
            }
            decoder.send_packet(&packet).map_err(SessionError::Codec)?;
            let mut frame = ffmpeg::frame::Video::empty();
            if decoder.receive_frame(&mut frame).is_ok() {
                if frame.format() == Pixel::YUV420P
                    && frame.width() == self.width
                    && frame.height() == self.height
                {
                    return Ok(frame);
                }
                let mut scaler = scaling::Context::get(
                    frame.format(),
                    frame.width(),
                    frame.height(),
                    Pixel::YUV420P,
                    self.width,
                    self.height,
                    scaling::Flags::BILINEAR,
                )
                .map_err(SessionError::Codec)?;
                let mut scaled = ffmpeg::frame::Video::empty();
                scaler.run(&frame, &mut scaled).map_err(SessionError::Codec)?;
                return Ok(scaled);
            }
        }
        Err(SessionError::NoVideoStream { url })
    }

    fn black_frame(width: u32, height: u32) -> ffmpeg::frame::Video {
        let mut f = ffmpeg::frame::Video::new(Pixel::YUV420P, width, height);
        for plane in 0..3 {
            let stride = f.stride(plane);
            let plane_height = f.plane_height(plane) as usize;
            let plane_width = f.plane_width(plane) as usize;
            let value = if plane == 0 { 16 } else { 128 };
            let data = f.data_mut(plane);
            for row in 0..plane_height {
                let start = row * stride;
                data[start..start + plane_width].fill(value);
            }
        }
        f
    }

    fn drive(&mut self, cancel: &CancelFlag) -> SessionResult<()> {
        let background = self.decode_background()?;

        let mut octx = ffmpeg::format::output_as(&self.output_url, "flv")
            .map_err(|source| SessionError::OpenOutput {
                url: self.output_url.clone(),
                source,
            })?;

        let video_codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)
            .ok_or(SessionError::Codec(ffmpeg::Error::EncoderNotFound))?;
        let mut venc = ffmpeg::codec::context::Context::new_with_codec(video_codec)
            .encoder()
            .video()
            .map_err(SessionError::Codec)?;
        venc.set_width(self.width);
        venc.set_height(self.height);
        venc.set_format(Pixel::YUV420P);
        venc.set_frame_rate(Some((OUTPUT_FPS, 1)));
        venc.set_time_base(ffmpeg::Rational::new(1, OUTPUT_FPS));
        venc.set_bit_rate(VIDEO_BITRATE);
        let mut video_encoder = venc.open_as(video_codec).map_err(SessionError::Codec)?;

        let video_out_index = {
            let mut stream = octx.add_stream(video_codec).map_err(SessionError::Codec)?;
            stream.set_parameters(&video_encoder);
            stream.set_time_base(ffmpeg::Rational::new(1, OUTPUT_FPS));
            stream.index()
        };

        let audio_codec = ffmpeg::encoder::find(ffmpeg::codec::Id::AAC)
            .ok_or(SessionError::Codec(ffmpeg::Error::EncoderNotFound))?;
        let mut aenc = ffmpeg::codec::context::Context::new_with_codec(audio_codec)
            .encoder()
            .audio()
            .map_err(SessionError::Codec)?;
        aenc.set_rate(AUDIO_SAMPLE_RATE);
        aenc.set_channel_layout(ChannelLayout::STEREO);
        aenc.set_format(Sample::F32(SampleType::Planar));
        aenc.set_bit_rate(AUDIO_BITRATE);
        let mut audio_encoder = aenc.open_as(audio_codec).map_err(SessionError::Codec)?;

        let audio_out_index = {
            let mut stream = octx.add_stream(audio_codec).map_err(SessionError::Codec)?;
            stream.set_parameters(&audio_encoder);
            stream.set_time_base(ffmpeg::Rational::new(1, AUDIO_SAMPLE_RATE));
            stream.index()
        };

        octx.write_header().map_err(|source| SessionError::OpenOutput {
            url: self.output_url.clone(),
            source,
        })?;

        let mut state = MixState::new();
        let mut workers: HashMap<String, InputWorker> = HashMap::new();
        if let Some(initial) = self.pending.lock().take() {
            Self::apply_changes(&mut state, &mut workers, initial);
        }

        let samples_per_tick = (AUDIO_SAMPLE_RATE / OUTPUT_FPS) as usize;
        let tick = Duration::from_secs_f64(1.0 / f64::from(OUTPUT_FPS));
        let start = Instant::now();
        let mut frame_no: i64 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Some(update) = self.pending.lock().take() {
                Self::apply_changes(&mut state, &mut workers, update);
            }

            let mut canvas = background.clone();
            for placement in state.ordered() {
                if let Some(worker) = workers.get(&placement.id) {
                    if let Some(overlay) = worker.latest_video.lock().as_ref() {
                        compositor::blit_yuv420p(&mut canvas, overlay, placement.x, placement.y);
                    }
                }
            }
            canvas.set_pts(Some(frame_no));
            video_encoder.send_frame(&canvas).map_err(SessionError::Codec)?;
            Self::drain_video(&mut video_encoder, &mut octx, video_out_index)?;

            let audio_frame = Self::mix_audio_tick(&workers, samples_per_tick, frame_no);
            audio_encoder.send_frame(&audio_frame).map_err(SessionError::Codec)?;
            Self::drain_audio(&mut audio_encoder, &mut octx, audio_out_index)?;

            frame_no += 1;
            let target = start + tick * frame_no as u32;
            let now = Instant::now();
            if target > now {
                thread::sleep(target - now);
            }
        }

        video_encoder.send_eof().map_err(SessionError::Codec)?;
        Self::drain_video(&mut video_encoder, &mut octx, video_out_index)?;
        audio_encoder.send_eof().map_err(SessionError::Codec)?;
        Self::drain_audio(&mut audio_encoder, &mut octx, audio_out_index)?;
        octx.write_trailer().map_err(SessionError::Write)?;

        Ok(())
    }

    /// Applies one transactional layout diff, spawning/retiring workers and
    /// logging the required add/remove/update lines (spec §4.6).
    fn apply_changes(
        state: &mut MixState,
        workers: &mut HashMap<String, InputWorker>,
        streams: Vec<MixStream>,
    ) {
        for change in state.update(streams) {
            match change {
                Change::Added(s) => {
                    slog_scope::info!("mix stream added"; "id" => %s.id, "url" => %s.url);
                    workers.insert(s.id.clone(), InputWorker::spawn(s));
                }
                Change::Removed(id) => {
                    slog_scope::info!("mix stream removed"; "id" => %id);
                    workers.remove(&id);
                }
                Change::Updated(s) => {
                    slog_scope::info!(
                        "mix stream updated";
                        "id" => %s.id, "x" => s.x, "y" => s.y, "z_index" => s.z_index
                    );
                    // Placement (including size) changed, so the scaler
                    // built into the old worker's decode loop is stale;
                    // respawn against the new placement.
                    workers.insert(s.id.clone(), InputWorker::spawn(s));
                }
            }
        }
    }

    /// Pulls `samples_per_tick` interleaved stereo samples contributed by
    /// every active input, averages them, and deinterleaves into the
    /// encoder's planar F32 frame (spec §4.6 "Encode and mux video and audio
    /// independently").
    fn mix_audio_tick(
        workers: &HashMap<String, InputWorker>,
        samples_per_tick: usize,
        frame_no: i64,
    ) -> ffmpeg::frame::Audio {
        let mut sums = vec![0f32; samples_per_tick * 2];
        let mut contributors = vec![0u8; samples_per_tick * 2];

        for worker in workers.values() {
            let mut queue = worker.audio_samples.lock();
            for slot in sums.iter_mut().zip(contributors.iter_mut()) {
                let (sum, count) = slot;
                if let Some(sample) = queue.pop_front() {
                    *sum += sample;
                    *count += 1;
                }
            }
        }

        let mut frame = ffmpeg::frame::Audio::new(
            Sample::F32(SampleType::Planar),
            samples_per_tick,
            ChannelLayout::STEREO,
        );
        frame.set_rate(AUDIO_SAMPLE_RATE as u32);
        frame.set_pts(Some(frame_no * samples_per_tick as i64));

        for channel in 0..2usize {
            let out: &mut [f32] = frame.plane_mut(channel);
            for (i, sample) in out.iter_mut().enumerate() {
                let idx = i * 2 + channel;
                *sample = if contributors[idx] > 0 {
                    sums[idx] / f32::from(contributors[idx])
                } else {
                    0.0
                };
            }
        }
        frame
    }

    fn drain_video(
        encoder: &mut ffmpeg::encoder::Video,
        octx: &mut ffmpeg::format::context::Output,
        out_index: usize,
    ) -> SessionResult<()> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(out_index);
            packet.write_interleaved(octx).map_err(SessionError::Write)?;
            packet = ffmpeg::codec::packet::Packet::empty();
        }
        Ok(())
    }

    fn drain_audio(
        encoder: &mut ffmpeg::encoder::Audio,
        octx: &mut ffmpeg::format::context::Output,
        out_index: usize,
    ) -> SessionResult<()> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(out_index);
            packet.write_interleaved(octx).map_err(SessionError::Write)?;
            packet = ffmpeg::codec::packet::Packet::empty();
        }
        Ok(())
    }
}

impl Runnable for MixSession {
    fn run(&mut self, cancel: &CancelFlag) {
        if let Err(e) = self.drive(cancel) {
            slog_scope::error!("mix session failed"; "output" => %self.output_url, "error" => %e);
        }
    }

    /// Mixing is the only task kind whose parameters can change live (spec
    /// §4.1, §9 decision): a clone of the pending-update slot lets the
    /// manager forward new layouts without reaching into the moved
    /// `Runnable`.
    fn updater(&self) -> Option<UpdateFn> {
        let pending = Arc::clone(&self.pending);
        Some(Arc::new(move |params: serde_json::Value| {
            match serde_json::from_value::<Vec<MixStream>>(params) {
                Ok(streams) => {
                    *pending.lock() = Some(streams);
                    true
                }
                Err(e) => {
                    slog_scope::warn!("mix update rejected: invalid body"; "error" => %e);
                    false
                }
            }
        }))
    }
}
