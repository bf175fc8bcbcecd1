//! Audio decoding to mono PCM
//!
//! Decodes compressed audio (MP3, M4A, FLAC, ...) with symphonia, downmixes
//! to mono, and resamples to the analysis rate with rubato. 44.1 kHz is
//! used throughout analysis for beat/tempo accuracy.

use anyhow::{Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::IntoSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Sample rate used for all analysis
pub const ANALYSIS_SAMPLE_RATE: u32 = 44_100;

/// Decoded mono audio
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Mono PCM samples, normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Copy out the samples between two timestamps, clamped to the buffer
    pub fn slice_seconds(&self, start: f64, end: f64) -> AudioBuffer {
        let start_sample = ((start.max(0.0) * self.sample_rate as f64) as usize)
            .min(self.samples.len());
        let end_sample = ((end.max(0.0) * self.sample_rate as f64) as usize)
            .min(self.samples.len());
        AudioBuffer {
            samples: self.samples[start_sample..end_sample.max(start_sample)].to_vec(),
            sample_rate: self.sample_rate,
        }
    }
}

/// Decode an in-memory compressed payload to mono at the analysis rate
///
/// Blocking; callers dispatch through `spawn_blocking`.
pub fn decode_bytes(bytes: &[u8]) -> Result<AudioBuffer> {
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Failed to probe audio format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio tracks found")?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let native_rate = codec_params
        .sample_rate
        .context("Sample rate not specified in codec params")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .context("Failed to create decoder")?;

    let mut mono = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e).context("Failed to read packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        // Decode errors on individual packets are recoverable; skip them
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(e).context("Failed to decode packet"),
        };

        append_mono(&decoded, &mut mono);
    }

    debug!(
        "Decoded {} mono samples at {} Hz ({:.1}s)",
        mono.len(),
        native_rate,
        mono.len() as f64 / native_rate as f64
    );

    let samples = if native_rate != ANALYSIS_SAMPLE_RATE {
        resample_mono(mono, native_rate, ANALYSIS_SAMPLE_RATE)
            .context("Failed to resample audio")?
    } else {
        mono
    };

    Ok(AudioBuffer {
        samples,
        sample_rate: ANALYSIS_SAMPLE_RATE,
    })
}

/// Downmix one decoded packet to mono and append it
fn append_mono(decoded: &AudioBufferRef<'_>, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::U8(buf) => downmix(buf, out),
        AudioBufferRef::U16(buf) => downmix(buf, out),
        AudioBufferRef::U24(buf) => downmix(buf, out),
        AudioBufferRef::U32(buf) => downmix(buf, out),
        AudioBufferRef::S8(buf) => downmix(buf, out),
        AudioBufferRef::S16(buf) => downmix(buf, out),
        AudioBufferRef::S24(buf) => downmix(buf, out),
        AudioBufferRef::S32(buf) => downmix(buf, out),
        AudioBufferRef::F32(buf) => downmix(buf, out),
        AudioBufferRef::F64(buf) => downmix(buf, out),
    }
}

fn downmix<S>(buf: &symphonia::core::audio::AudioBuffer<S>, out: &mut Vec<f32>)
where
    S: symphonia::core::sample::Sample + IntoSample<f32> + Copy,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    if channels == 0 {
        return;
    }
    out.reserve(frames);
    for i in 0..frames {
        let mut acc = 0.0f32;
        for ch in 0..channels {
            acc += IntoSample::<f32>::into_sample(buf.chan(ch)[i]);
        }
        out.push(acc / channels as f32);
    }
}

/// Sinc-resample a mono signal
fn resample_mono(samples: Vec<f32>, source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() {
        return Ok(samples);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_rate as f64 / source_rate as f64;
    let num_frames = samples.len();

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, num_frames, 1)
        .context("Failed to create rubato resampler")?;

    let output = resampler
        .process(&[samples], None)
        .context("Rubato resampling failed")?;

    Ok(output.into_iter().next().unwrap_or_default())
}
