//! Pass 2: Velocity Mapping

use crate::audio::AudioState;
use crate::config::{Config, ConversionParams, VelocityConfig};
use crate::error::{ConvertError, Result as ConvertResult};

/// Map an onset to a MIDI velocity
///
/// With dynamic velocity off this is `base_velocity`. Otherwise the peak
/// absolute amplitude of the `window_sec` window starting at the onset is
/// scaled by `127 * gain`, rounded and clamped to 1-127. A window that falls
/// entirely past the end of the buffer falls back to `base_velocity`.
pub fn map_velocity(
    onset_time_sec: f64,
    percussive: &[f32],
    sr: u32,
    base_velocity: u8,
    dynamic_velocity: bool,
    velocity: &VelocityConfig,
) -> u8 {
    if !dynamic_velocity {
        return base_velocity;
    }

    let start = (onset_time_sec.max(0.0) * sr as f64).floor() as usize;
    let window_len = (velocity.window_sec as f64 * sr as f64) as usize;
    let end = start.saturating_add(window_len).min(percussive.len());

    if start >= end {
        return base_velocity;
    }

    // f32::max skips NaN samples
    let peak = percussive[start..end]
        .iter()
        .fold(0.0f32, |acc, &x| acc.max(x.abs()));

    (peak * 127.0 * velocity.gain).round().clamp(1.0, 127.0) as u8
}

pub fn run(state: &mut AudioState, config: &Config, params: &ConversionParams) -> ConvertResult<()> {
    log::info!("Pass 2: Velocity Mapping");

    let percussive = state.percussive.as_ref().ok_or_else(|| {
        ConvertError::Analysis("Pass 0 must be run before Pass 2".to_string())
    })?;

    state.velocities = state
        .onset_events
        .iter()
        .map(|event| {
            map_velocity(
                event.time_sec,
                percussive,
                state.sr,
                params.velocity,
                params.dynamic_velocity,
                &config.velocity,
            )
        })
        .collect();

    if params.dynamic_velocity && !state.velocities.is_empty() {
        let min = state.velocities.iter().min().copied().unwrap_or(0);
        let max = state.velocities.iter().max().copied().unwrap_or(0);
        log::debug!("  dynamic velocities in {}-{}", min, max);
    }

    log::info!("  ✓ Mapped {} velocities", state.velocities.len());
    Ok(())
}
