//! Conversion pipeline passes
//!
//! Each pass reads what earlier passes left in [`AudioState`](crate::AudioState)
//! and stores its own output there.

/// Harmonic/percussive separation
pub mod pass_0;
/// Onset detection
pub mod pass_1;
/// Velocity mapping
pub mod pass_2;
/// Tick quantization
pub mod pass_3;
