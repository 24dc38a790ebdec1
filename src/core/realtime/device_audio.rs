//! Local audio devices behind the media seams.
//!
//! [`CpalMicrophone`] captures the input device, resamples to 48 kHz mono
//! and writes 20 ms Opus frames into the track handed to the peer
//! connection. [`CpalSpeaker`] decodes the engine's Opus packets and plays
//! them on the output device.
//!
//! A cpal stream is not `Send`, so each stream is built on, and owned by, a
//! dedicated thread.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use opus::{Application, Channels, Decoder, Encoder};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample as MediaSample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::base::{RealtimeError, RealtimeResult};
use super::peer::{MicrophoneSource, MicrophoneTrack, RemoteAudioSink, RemoteStream, opus_capability};

/// Opus always runs at 48 kHz on the wire.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// Samples in one 20 ms Opus frame at 48 kHz mono.
pub const OPUS_FRAME_SAMPLES: usize = 960;

const FRAME_DURATION: Duration = Duration::from_millis(20);
const MAX_PACKET_BYTES: usize = 4000;
/// Longest Opus frame (120 ms) at 48 kHz.
const MAX_DECODED_SAMPLES: usize = 5760;
/// Two seconds of decoded speech.
const MAX_QUEUED_SAMPLES: usize = OPUS_SAMPLE_RATE as usize * 2;

// =============================================================================
// Microphone
// =============================================================================

/// Microphone backed by a cpal input device.
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    device_name: Option<String>,
    track_id: String,
    stream_id: String,
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self {
            device_name: None,
            track_id: "microphone".to_string(),
            stream_id: "walkman".to_string(),
        }
    }
}

impl CpalMicrophone {
    /// Capture from the input device called `name` instead of the default.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn acquire(&self) -> RealtimeResult<MicrophoneTrack> {
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let device_name = self.device_name.clone();
        thread::Builder::new()
            .name("walkman-microphone".to_string())
            .spawn(move || capture_thread(device_name, samples_tx, ready_tx, stop_rx))
            .map_err(|e| RealtimeError::MediaAccess(format!("microphone thread: {e}")))?;

        let input_rate = ready_rx
            .await
            .map_err(|_| RealtimeError::MediaAccess("microphone thread exited".to_string()))?
            .map_err(RealtimeError::MediaAccess)?;

        let encoder = Encoder::new(OPUS_SAMPLE_RATE, Channels::Mono, Application::Voip)
            .map_err(|e| RealtimeError::MediaAccess(format!("Opus encoder: {e}")))?;

        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            self.track_id.clone(),
            self.stream_id.clone(),
        ));
        tokio::spawn(encode_loop(
            Arc::downgrade(&track),
            samples_rx,
            encoder,
            FrameAssembler::new(input_rate),
            stop_tx,
        ));

        Ok(track)
    }
}

/// Owns the capture stream until the encoder task drops `stop`'s sender.
fn capture_thread(
    device_name: Option<String>,
    samples: mpsc::UnboundedSender<Vec<f32>>,
    ready: oneshot::Sender<Result<u32, String>>,
    stop: std_mpsc::Receiver<()>,
) {
    let stream = match open_capture(device_name.as_deref(), samples) {
        Ok((stream, rate)) => {
            let _ = ready.send(Ok(rate));
            stream
        }
        Err(reason) => {
            warn!("Microphone unavailable: {}", reason);
            let _ = ready.send(Err(reason));
            return;
        }
    };

    let _ = stop.recv();
    drop(stream);
    info!("Microphone released");
}

fn open_capture(
    name: Option<&str>,
    samples: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<(cpal::Stream, u32), String> {
    let host = cpal::default_host();
    let device = match name {
        None => host
            .default_input_device()
            .ok_or_else(|| "no input device available".to_string())?,
        Some(name) => host
            .input_devices()
            .map_err(|e| format!("input devices: {e}"))?
            .find(|device| device.name().is_ok_and(|n| n == name))
            .ok_or_else(|| format!("input device {name:?} not found"))?,
    };

    let supported = device
        .default_input_config()
        .map_err(|e| format!("input config: {e}"))?;
    let rate = supported.sample_rate().0;
    let format = supported.sample_format();
    let config = supported.config();
    info!(
        device = %device.name().unwrap_or_default(),
        rate,
        channels = config.channels,
        ?format,
        "Opening microphone"
    );

    let stream = match format {
        SampleFormat::F32 => build_capture::<f32>(&device, &config, samples),
        SampleFormat::I16 => build_capture::<i16>(&device, &config, samples),
        SampleFormat::U16 => build_capture::<u16>(&device, &config, samples),
        other => return Err(format!("unsupported input sample format {other:?}")),
    }
    .map_err(|e| format!("input stream: {e}"))?;
    stream.play().map_err(|e| format!("start capture: {e}"))?;

    Ok((stream, rate))
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    samples: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels);
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let _ = samples.send(downmix(data, channels));
        },
        |e| error!("Microphone stream error: {}", e),
        None,
    )
}

/// Average interleaved frames down to mono.
fn downmix<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    data.chunks(channels.max(1))
        .map(|frame| {
            frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
        })
        .collect()
}

/// Encodes captured audio into the track until the track is dropped.
async fn encode_loop(
    track: Weak<TrackLocalStaticSample>,
    mut samples: mpsc::UnboundedReceiver<Vec<f32>>,
    mut encoder: Encoder,
    mut frames: FrameAssembler,
    _stop: std_mpsc::Sender<()>,
) {
    while let Some(chunk) = samples.recv().await {
        let Some(track) = track.upgrade() else {
            break;
        };
        for frame in frames.push(&chunk) {
            let packet = match encoder.encode_vec_float(&frame, MAX_PACKET_BYTES) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Failed to encode microphone frame: {}", e);
                    continue;
                }
            };
            let sample = MediaSample {
                data: Bytes::from(packet),
                duration: FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!("Dropped microphone frame: {}", e);
            }
        }
    }
    debug!("Microphone encoder stopped");
}

/// Resamples mono audio to 48 kHz and cuts it into 20 ms frames.
pub(crate) struct FrameAssembler {
    /// Input samples per output sample
    step: f64,
    /// Fractional read position into `input`
    position: f64,
    input: Vec<f32>,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub(crate) fn new(input_rate: u32) -> Self {
        Self {
            step: f64::from(input_rate.max(1)) / f64::from(OPUS_SAMPLE_RATE),
            position: 0.0,
            input: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Feed captured samples; returns every frame that is now complete.
    pub(crate) fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.input.extend_from_slice(samples);

        // Linear interpolation needs the sample after the read position
        while self.position + 1.0 < self.input.len() as f64 {
            let index = self.position as usize;
            let fraction = (self.position - index as f64) as f32;
            let (a, b) = (self.input[index], self.input[index + 1]);
            self.pending.push(a + (b - a) * fraction);
            self.position += self.step;
        }

        let consumed = (self.position as usize).min(self.input.len());
        self.input.drain(..consumed);
        self.position -= consumed as f64;

        let mut frames = Vec::new();
        while self.pending.len() >= OPUS_FRAME_SAMPLES {
            frames.push(self.pending.drain(..OPUS_FRAME_SAMPLES).collect());
        }
        frames
    }
}

// =============================================================================
// Speaker
// =============================================================================

/// Remote audio sink that plays the engine's voice on a cpal output device.
///
/// The output stream opens on the first [`attach`](RemoteAudioSink::attach)
/// and stays open for the lifetime of the sink; later sessions reuse it.
pub struct CpalSpeaker {
    device_name: Option<String>,
    decoder: Mutex<Option<Decoder>>,
    queue: Arc<Mutex<PlaybackQueue>>,
    output: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl Default for CpalSpeaker {
    fn default() -> Self {
        Self {
            device_name: None,
            decoder: Mutex::new(None),
            queue: Arc::new(Mutex::new(PlaybackQueue::new(MAX_QUEUED_SAMPLES))),
            output: Mutex::new(None),
        }
    }
}

impl CpalSpeaker {
    /// Play on the output device called `name` instead of the default.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// Decoded samples waiting for the output device.
    pub fn buffered_samples(&self) -> usize {
        self.queue.lock().len()
    }

    fn ensure_output(&self) {
        let mut output = self.output.lock();
        if output.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = std_mpsc::channel();
        let device_name = self.device_name.clone();
        let queue = self.queue.clone();
        match thread::Builder::new()
            .name("walkman-speaker".to_string())
            .spawn(move || playback_thread(device_name, queue, stop_rx))
        {
            Ok(_) => *output = Some(stop_tx),
            Err(e) => error!("Failed to start speaker thread: {}", e),
        }
    }
}

impl RemoteAudioSink for CpalSpeaker {
    fn attach(&self, stream: &RemoteStream) {
        if !stream.mime_type.eq_ignore_ascii_case(MIME_TYPE_OPUS) {
            warn!(codec = %stream.mime_type, "Remote audio is not Opus, not playing it");
            return;
        }

        let decoder = match Decoder::new(OPUS_SAMPLE_RATE, Channels::Mono) {
            Ok(decoder) => decoder,
            Err(e) => {
                error!("Failed to create Opus decoder: {}", e);
                return;
            }
        };
        *self.decoder.lock() = Some(decoder);
        self.queue.lock().clear();

        info!(
            stream_id = %stream.stream_id,
            track_id = %stream.track_id,
            "Playing remote audio"
        );
        self.ensure_output();
    }

    fn write(&self, payload: &[u8]) {
        let mut decoder = self.decoder.lock();
        let Some(decoder) = decoder.as_mut() else {
            return;
        };

        let mut pcm = [0.0f32; MAX_DECODED_SAMPLES];
        match decoder.decode_float(payload, &mut pcm, false) {
            Ok(decoded) => self.queue.lock().push(&pcm[..decoded]),
            Err(e) => debug!(len = payload.len(), "Skipping undecodable packet: {}", e),
        }
    }
}

fn playback_thread(
    device_name: Option<String>,
    queue: Arc<Mutex<PlaybackQueue>>,
    stop: std_mpsc::Receiver<()>,
) {
    let stream = match open_playback(device_name.as_deref(), queue) {
        Ok(stream) => stream,
        Err(reason) => {
            error!("Speaker unavailable: {}", reason);
            return;
        }
    };

    let _ = stop.recv();
    drop(stream);
    info!("Speaker released");
}

fn open_playback(
    name: Option<&str>,
    queue: Arc<Mutex<PlaybackQueue>>,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = match name {
        None => host
            .default_output_device()
            .ok_or_else(|| "no output device available".to_string())?,
        Some(name) => host
            .output_devices()
            .map_err(|e| format!("output devices: {e}"))?
            .find(|device| device.name().is_ok_and(|n| n == name))
            .ok_or_else(|| format!("output device {name:?} not found"))?,
    };

    let supported = device
        .default_output_config()
        .map_err(|e| format!("output config: {e}"))?;
    let format = supported.sample_format();
    let config = supported.config();
    queue.lock().set_output_rate(config.sample_rate.0);
    info!(
        device = %device.name().unwrap_or_default(),
        rate = config.sample_rate.0,
        channels = config.channels,
        ?format,
        "Opening speaker"
    );

    let stream = match format {
        SampleFormat::F32 => build_playback::<f32>(&device, &config, queue),
        SampleFormat::I16 => build_playback::<i16>(&device, &config, queue),
        SampleFormat::U16 => build_playback::<u16>(&device, &config, queue),
        other => return Err(format!("unsupported output sample format {other:?}")),
    }
    .map_err(|e| format!("output stream: {e}"))?;
    stream.play().map_err(|e| format!("start playback: {e}"))?;

    Ok(stream)
}

fn build_playback<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<Mutex<PlaybackQueue>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels);
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            queue.lock().fill(data, channels);
        },
        |e| error!("Speaker stream error: {}", e),
        None,
    )
}

/// Decoded 48 kHz mono audio waiting for the output callback.
pub(crate) struct PlaybackQueue {
    samples: VecDeque<f32>,
    capacity: usize,
    /// Queue samples consumed per output frame
    step: f64,
    phase: f64,
}

impl PlaybackQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity,
            step: 1.0,
            phase: 0.0,
        }
    }

    pub(crate) fn set_output_rate(&mut self, rate: u32) {
        self.step = f64::from(OPUS_SAMPLE_RATE) / f64::from(rate.max(1));
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn clear(&mut self) {
        self.samples.clear();
        self.phase = 0.0;
    }

    /// Append decoded audio, dropping the oldest samples past capacity.
    pub(crate) fn push(&mut self, decoded: &[f32]) {
        self.samples.extend(decoded);
        let excess = self.samples.len().saturating_sub(self.capacity);
        self.samples.drain(..excess);
    }

    /// Fill an interleaved output buffer; silence once the queue runs dry.
    pub(crate) fn fill<T>(&mut self, out: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        for frame in out.chunks_mut(channels.max(1)) {
            let value = self.samples.front().copied().unwrap_or(0.0);
            frame.fill(T::from_sample(value));

            self.phase += self.step;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
                if self.samples.pop_front().is_none() {
                    self.phase = 0.0;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_DEVICE: &str = "walkman-no-such-device";

    fn opus_stream() -> RemoteStream {
        RemoteStream {
            stream_id: "engine".to_string(),
            track_id: "voice".to_string(),
            mime_type: "audio/opus".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_input_device_is_media_access_error() {
        let microphone = CpalMicrophone::default().with_device_name(MISSING_DEVICE);
        match microphone.acquire().await {
            Err(RealtimeError::MediaAccess(reason)) => assert!(!reason.is_empty()),
            Err(other) => panic!("expected MediaAccess, got {other:?}"),
            Ok(_) => panic!("expected MediaAccess, got a track"),
        }
    }

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = [0.5f32, 0.25, -1.0, 1.0];
        assert_eq!(downmix(&stereo, 2), vec![0.375, 0.0]);

        let pcm = [i16::MAX, i16::MAX];
        let mono = downmix(&pcm, 2);
        assert_eq!(mono.len(), 1);
        assert!((mono[0] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_frames_at_native_rate() {
        let mut assembler = FrameAssembler::new(OPUS_SAMPLE_RATE);
        // One sample is held back for interpolation
        assert!(assembler.push(&[0.1; 500]).is_empty());

        let frames = assembler.push(&[0.1; OPUS_FRAME_SAMPLES - 498]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), OPUS_FRAME_SAMPLES);

        let frames = assembler.push(&[0.1; OPUS_FRAME_SAMPLES - 1]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_frames_are_upsampled() {
        let mut assembler = FrameAssembler::new(24_000);
        let frames = assembler.push(&[0.25; OPUS_FRAME_SAMPLES / 2 + 1]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_queue_duplicates_across_channels_then_silence() {
        let mut queue = PlaybackQueue::new(16);
        queue.push(&[0.5, -0.5]);

        let mut out = [1.0f32; 6];
        queue.fill(&mut out, 2);
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_queue_steps_at_output_rate() {
        let mut queue = PlaybackQueue::new(16);
        queue.set_output_rate(24_000);
        queue.push(&[0.1, 0.2, 0.3, 0.4]);

        let mut out = [0.0f32; 2];
        queue.fill(&mut out, 1);
        assert_eq!(out, [0.1, 0.3]);
    }

    #[test]
    fn test_queue_drops_oldest_past_capacity() {
        let mut queue = PlaybackQueue::new(3);
        queue.push(&[0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(queue.len(), 3);

        let mut out = [0.0f32; 1];
        queue.fill(&mut out, 1);
        assert_eq!(out, [0.3]);
    }

    #[test]
    fn test_speaker_decodes_opus_packets() {
        let speaker = CpalSpeaker::default().with_device_name(MISSING_DEVICE);
        let mut encoder =
            Encoder::new(OPUS_SAMPLE_RATE, Channels::Mono, Application::Voip).unwrap();
        let packet = encoder
            .encode_vec_float(&[0.0; OPUS_FRAME_SAMPLES], MAX_PACKET_BYTES)
            .unwrap();

        // Nothing is decoded before a track is attached
        speaker.write(&packet);
        assert_eq!(speaker.buffered_samples(), 0);

        speaker.attach(&opus_stream());
        speaker.write(&packet);
        assert_eq!(speaker.buffered_samples(), OPUS_FRAME_SAMPLES);

        // A second attach starts from an empty queue
        speaker.attach(&opus_stream());
        assert_eq!(speaker.buffered_samples(), 0);
    }

    #[test]
    fn test_speaker_ignores_other_codecs() {
        let speaker = CpalSpeaker::default().with_device_name(MISSING_DEVICE);
        speaker.attach(&RemoteStream {
            mime_type: "audio/PCMU".to_string(),
            ..opus_stream()
        });
        assert!(speaker.decoder.lock().is_none());
        assert!(speaker.output.lock().is_none());
    }
}
