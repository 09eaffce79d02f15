//! Dereverberate a multichannel WAV file with iterative WPE.
//!
//! Reads every channel of the input, runs STFT → WPE → inverse STFT and
//! writes a 32-bit float WAV with the same channel count and sample rate.
//!
//! ```sh
//! RUST_LOG=debug cargo run -p spatia --features examples --example dereverb -- \
//!     reverberant.wav -o clean.wav --taps 10 --delay 3 --iterations 3
//! ```

use anyhow::{Context, Result, bail};
use clap::Parser;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use ndarray::Array3;
use tracing::info;
use tracing_subscriber::EnvFilter;

use spatia::{DereverbConfig, DereverbPipeline, PipelineConfig, StftConfig, WpeConfig};

#[derive(Parser, Debug)]
#[command(about = "Dereverberate a WAV file with weighted prediction error")]
struct Args {
    /// Reverberant input WAV.
    input: String,

    /// Path for the dereverberated output.
    #[arg(short, long, default_value = "dereverberated.wav")]
    output: String,

    /// FFT length in samples.
    #[arg(long, default_value_t = 512)]
    fft_length: usize,

    /// Hop between frames in samples.
    #[arg(long, default_value_t = 128)]
    hop_length: usize,

    /// Prediction filter taps per channel.
    #[arg(long, default_value_t = 10)]
    taps: usize,

    /// Prediction delay in frames.
    #[arg(long, default_value_t = 3)]
    delay: usize,

    /// Number of WPE iterations.
    #[arg(long, default_value_t = 3)]
    iterations: usize,
}

fn read_wav(path: &str) -> Result<(Array3<f64>, WavSpec)> {
    let mut reader = WavReader::open(path).with_context(|| format!("opening {path}"))?;
    let spec = reader.spec();
    let num_channels = usize::from(spec.channels);
    if num_channels == 0 {
        bail!("{path} has no channels");
    }

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = f64::from(1u32 << (spec.bits_per_sample - 1));
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| f64::from(v) / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let num_samples = interleaved.len() / num_channels;
    let audio = Array3::from_shape_fn((1, num_channels, num_samples), |(_, c, n)| {
        interleaved[n * num_channels + c]
    });
    Ok((audio, spec))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let (audio, input_spec) = read_wav(&args.input)?;
    let (_, num_channels, num_samples) = audio.dim();
    info!(
        path = %args.input,
        num_channels,
        num_samples,
        sample_rate = input_spec.sample_rate,
        "read input"
    );

    let pipeline = DereverbPipeline::new(PipelineConfig {
        stft: StftConfig {
            fft_length: args.fft_length,
            hop_length: args.hop_length,
            ..Default::default()
        },
        dereverb: DereverbConfig {
            wpe: WpeConfig {
                filter_length: args.taps,
                prediction_delay: args.delay,
                ..Default::default()
            },
            num_iterations: args.iterations,
            ..Default::default()
        },
    })?;
    let (dereverberated, _) = pipeline.process(audio.view(), None)?;

    let output_spec = WavSpec {
        channels: input_spec.channels,
        sample_rate: input_spec.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&args.output, output_spec)?;
    for n in 0..num_samples {
        for c in 0..num_channels {
            writer.write_sample(dereverberated[[0, c, n]] as f32)?;
        }
    }
    writer.finalize()?;

    println!("Wrote {}", args.output);
    Ok(())
}
