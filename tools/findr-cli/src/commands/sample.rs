//! Dry-run the scheduler over a source. No model is loaded.

use findr_common::config::AppConfig;
use findr_frame_model::RunMode;
use findr_pipeline::{SamplerState, SamplingConfig, Scheduler};
use findr_stream_engine::{DefaultSourceOpener, SourceOpener};

pub fn run(
    locator: String,
    stride: Option<u32>,
    threshold: Option<f32>,
    max_extrapolations: Option<u32>,
    limit: Option<u64>,
    fps: Option<f64>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let sampling = SamplingConfig {
        stride,
        scene_threshold: threshold,
        max_consecutive_extrapolations: max_extrapolations,
    };
    let policy = sampling
        .to_policy(config.sampling.max_consecutive_extrapolations)
        .map_err(|e| anyhow::anyhow!("Invalid sampling: {e}"))?;
    let scheduler = Scheduler::new(policy);

    let opener = fps.map_or_else(DefaultSourceOpener::default, DefaultSourceOpener::with_fps);
    let mut source = opener
        .open(&locator)
        .map_err(|e| anyhow::anyhow!("Failed to open {locator}: {e}"))?;

    println!("Sampling {locator} with {:?}", scheduler.policy().mode);
    println!("{:>7}  {:>9}  {:>6}  mode", "frame", "time (s)", "score");

    let mut state = SamplerState::new();
    let (mut full, mut extrapolated) = (0u64, 0u64);
    while let Some(frame) = source.next_frame()? {
        let (ctx, mode) = state.observe(&scheduler, &frame, source.position_secs());
        match mode {
            RunMode::Full => full += 1,
            RunMode::Extrapolated => extrapolated += 1,
        }
        println!(
            "{:>7}  {:>9.3}  {:>6.3}  {mode}",
            ctx.frame_index, ctx.timestamp_secs, ctx.scene_change_score
        );
        if limit.is_some_and(|limit| ctx.frame_index + 1 >= limit) {
            break;
        }
    }

    let total = full + extrapolated;
    println!();
    println!("  Frames: {total}");
    println!("  Full runs: {full}");
    println!("  Extrapolated: {extrapolated}");
    if total > 0 {
        println!(
            "  Model calls saved: {:.1}%",
            extrapolated as f64 * 100.0 / total as f64
        );
    }
    Ok(())
}
