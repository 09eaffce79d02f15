//! Minimal dereverberation demo.
//!
//! Builds a synthetic two-channel reverberant recording (bursts of noise
//! convolved with exponentially decaying room responses), runs it through
//! the dereverberation pipeline and reports how much late energy was removed.
//!
//! ```sh
//! cargo run -p spatia --example simple
//! ```

use ndarray::{Array3, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spatia::{DereverbConfig, DereverbPipeline, PipelineConfig};

const SAMPLE_RATE: usize = 16_000;
const NUM_CHANNELS: usize = 2;
const RIR_LENGTH: usize = 2_400; // 150 ms

fn main() {
    let mut rng = StdRng::seed_from_u64(7);
    let num_samples = 2 * SAMPLE_RATE;

    // 250 ms bursts separated by 250 ms of silence.
    let dry: Vec<f64> = (0..num_samples)
        .map(|i| {
            if (i / (SAMPLE_RATE / 4)) % 2 == 0 {
                rng.random_range(-0.5..0.5)
            } else {
                0.0
            }
        })
        .collect();

    let mut reverberant = Array3::<f64>::zeros((1, NUM_CHANNELS, num_samples));
    for c in 0..NUM_CHANNELS {
        let rir: Vec<f64> = (0..RIR_LENGTH)
            .map(|k| {
                let decay = (-(k as f64) / 400.0).exp();
                if k == 0 { 1.0 } else { decay * rng.random_range(-0.3..0.3) }
            })
            .collect();
        for (i, &x) in dry.iter().enumerate().filter(|(_, x)| **x != 0.0) {
            let end = (i + RIR_LENGTH).min(num_samples);
            for (n, &h) in (i..end).zip(&rir) {
                reverberant[[0, c, n]] += x * h;
            }
        }
    }

    let pipeline = DereverbPipeline::new(PipelineConfig {
        dereverb: DereverbConfig {
            num_iterations: 3,
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap();
    let (dereverberated, _) = pipeline.process(reverberant.view(), None).unwrap();

    // Energy in the silent gaps is reverberation only.
    let gap_energy = |audio: &Array3<f64>| -> f64 {
        (0..num_samples / (SAMPLE_RATE / 4))
            .filter(|segment| segment % 2 == 1)
            .map(|segment| {
                let start = segment * SAMPLE_RATE / 4;
                let end = start + SAMPLE_RATE / 4;
                audio
                    .slice(s![.., .., start..end])
                    .iter()
                    .map(|v| v * v)
                    .sum::<f64>()
            })
            .sum()
    };

    let before = gap_energy(&reverberant);
    let after = gap_energy(&dereverberated);
    println!("Reverberant tail energy: {before:.3}");
    println!("After dereverberation:   {after:.3}");
    println!(
        "Reduction: {:.1} dB",
        10.0 * (before / after.max(f64::MIN_POSITIVE)).log10()
    );
}
