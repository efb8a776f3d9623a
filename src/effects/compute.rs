//! Pure per-tick color math
//!
//! Everything here is a function of the effect, the elapsed time and the
//! resolved LED count. No clocks, no state, no I/O, which is what makes the
//! render loop trivially testable.

use crate::color;
use crate::models::Color;

use super::{EffectKind, EffectTarget, RgbEffect};

/// Compute the colors an effect paints over its resolved LED indices
///
/// `count` is the number of resolved indices, `total_leds` the device's LED
/// count (used by [`EffectKind::Progress`] when targeting the whole device
/// and as spatial extent for [`EffectKind::Rainbow`] and
/// [`EffectKind::Wave`]). `idle_color` is what a finished flash falls back
/// to.
pub fn compute_colors(
    effect: &RgbEffect,
    elapsed_ms: u64,
    count: usize,
    total_leds: usize,
    idle_color: Color,
) -> Vec<Color> {
    match &effect.kind {
        EffectKind::Static { color } => vec![*color; count],

        EffectKind::Pulse {
            color,
            min_brightness,
            period_ms,
        } => {
            let brightness = pulse_brightness(elapsed_ms, *period_ms, *min_brightness);
            vec![color::scale(*color, brightness); count]
        }

        EffectKind::Flash { color, duration_ms } => {
            if elapsed_ms < *duration_ms {
                vec![*color; count]
            } else {
                vec![idle_color; count]
            }
        }

        EffectKind::Progress {
            color,
            background,
            progress,
        } => {
            let progress = if progress.is_nan() {
                0.0
            } else {
                progress.clamp(0.0, 1.0)
            };
            let basis = if effect.target == EffectTarget::AllLeds {
                total_leds
            } else {
                count
            };
            let lit = (basis as f32 * progress) as usize;

            (0..count)
                .map(|i| if i < lit { *color } else { *background })
                .collect()
        }

        EffectKind::Gradient {
            start,
            end,
            duration_ms,
        } => {
            let ratio = if *duration_ms > 0 {
                (elapsed_ms as f32 / *duration_ms as f32).clamp(0.0, 1.0)
            } else {
                0.0
            };
            vec![color::interpolate(*start, *end, ratio); count]
        }

        EffectKind::Rainbow { speed_ms } => {
            let time_turn = period_fraction(elapsed_ms, *speed_ms);
            let extent = total_leds.max(1) as f32;

            (0..count)
                .map(|i| color::from_hue((time_turn + i as f32 / extent) * 360.0))
                .collect()
        }

        EffectKind::Wave {
            color,
            speed_ms,
            min_brightness,
        } => {
            let time_turn = period_fraction(elapsed_ms, *speed_ms);
            let extent = total_leds.max(1) as f32;

            (0..count)
                .map(|i| {
                    let phase = (time_turn + i as f32 / extent).fract();
                    let triangle = if phase < 0.5 {
                        phase * 2.0
                    } else {
                        2.0 - phase * 2.0
                    };
                    let brightness = min_brightness + (1.0 - min_brightness) * triangle;
                    color::scale(*color, brightness.clamp(min_brightness.min(1.0), 1.0))
                })
                .collect()
        }
    }
}

/// Triangular pulse brightness at `elapsed_ms`
///
/// Rises linearly from `min_brightness` to 1 over the first half period and
/// falls symmetrically over the second.
fn pulse_brightness(elapsed_ms: u64, period_ms: u64, min_brightness: f32) -> f32 {
    let period_ms = period_ms.max(1);
    let phase = (elapsed_ms % period_ms) as f32 / period_ms as f32;

    let brightness = if phase < 0.5 {
        min_brightness + (1.0 - min_brightness) * (phase * 2.0)
    } else {
        1.0 - (1.0 - min_brightness) * ((phase - 0.5) * 2.0)
    };

    brightness.clamp(min_brightness.min(1.0), 1.0)
}

/// Fraction of the way through a period, exact at period multiples
fn period_fraction(elapsed_ms: u64, period_ms: u64) -> f32 {
    let period_ms = period_ms.max(1);
    (elapsed_ms % period_ms) as f32 / period_ms as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red() -> Color {
        Color::new(255, 0, 0)
    }

    fn idle() -> Color {
        Color::new(0x26, 0x32, 0x38)
    }

    #[test]
    fn static_repeats_color() {
        let effect = RgbEffect::static_color(red());

        assert_eq!(compute_colors(&effect, 12345, 3, 10, idle()), vec![red(); 3]);
    }

    #[test]
    fn pulse_brightness_envelope() {
        // At phase 0 the brightness sits at the minimum, at the half period
        // it peaks
        assert!((pulse_brightness(0, 1000, 0.2) - 0.2).abs() < 1e-6);
        assert!((pulse_brightness(250, 1000, 0.2) - 0.6).abs() < 1e-6);
        assert!((pulse_brightness(500, 1000, 0.2) - 1.0).abs() < 1e-3);
        assert!((pulse_brightness(999, 1000, 0.2) - 0.2).abs() < 1e-2);
    }

    #[test]
    fn pulse_is_periodic() {
        let effect = RgbEffect::pulse(red());

        for t in [0u64, 123, 499, 500, 731, 999] {
            assert_eq!(
                compute_colors(&effect, t, 4, 4, idle()),
                compute_colors(&effect, t + 1000, 4, 4, idle()),
                "t = {}",
                t
            );
        }
    }

    #[test]
    fn pulse_channels_stay_in_range() {
        let effect = RgbEffect::pulse(Color::new(255, 128, 7));

        for t in (0..2000).step_by(33) {
            for color in compute_colors(&effect, t, 2, 2, idle()) {
                // u8 can't overflow, but the minimum must hold as a floor
                assert!(color.red >= (255.0 * 0.2) as u8 - 1);
            }
        }
    }

    #[test]
    fn flash_boundary_returns_idle() {
        let effect = RgbEffect::flash(red());

        assert_eq!(compute_colors(&effect, 499, 2, 2, idle()), vec![red(); 2]);
        assert_eq!(compute_colors(&effect, 500, 2, 2, idle()), vec![idle(); 2]);
        assert_eq!(compute_colors(&effect, 9999, 2, 2, idle()), vec![idle(); 2]);
    }

    #[test]
    fn progress_endpoints_and_midpoint() {
        let bg = Color::new(20, 20, 20);

        let none = RgbEffect::progress(red(), 0.0);
        assert_eq!(compute_colors(&none, 0, 10, 10, idle()), vec![bg; 10]);

        let done = RgbEffect::progress(red(), 1.0);
        assert_eq!(compute_colors(&done, 0, 10, 10, idle()), vec![red(); 10]);

        let half = RgbEffect::progress(red(), 0.5);
        let frame = compute_colors(&half, 0, 10, 10, idle());
        assert_eq!(frame[..5], vec![red(); 5][..]);
        assert_eq!(frame[5..], vec![bg; 5][..]);
    }

    #[test]
    fn progress_on_all_leds_uses_device_extent() {
        let effect = RgbEffect::progress(red(), 0.5);

        // Resolved count equals the device extent for AllLeds, 7 of 15 light
        let frame = compute_colors(&effect, 0, 15, 15, idle());
        assert_eq!(frame.iter().filter(|&&c| c == red()).count(), 7);
    }

    #[test]
    fn progress_clamps_out_of_range_values() {
        let over = RgbEffect::progress(red(), 7.5);
        assert_eq!(compute_colors(&over, 0, 4, 4, idle()), vec![red(); 4]);

        let under = RgbEffect::progress(red(), -2.0);
        assert_eq!(
            compute_colors(&under, 0, 4, 4, idle()),
            vec![Color::new(20, 20, 20); 4]
        );
    }

    #[test]
    fn gradient_sweep() {
        let start = Color::new(0, 0, 0);
        let end = Color::new(200, 100, 50);
        let effect = RgbEffect::new(
            "timer",
            EffectKind::Gradient {
                start,
                end,
                duration_ms: 1000,
            },
        );

        assert_eq!(compute_colors(&effect, 0, 1, 1, idle()), vec![start]);
        assert_eq!(
            compute_colors(&effect, 500, 1, 1, idle()),
            vec![Color::new(100, 50, 25)]
        );
        assert_eq!(compute_colors(&effect, 1000, 1, 1, idle()), vec![end]);
        // Past the end the gradient holds its final color
        assert_eq!(compute_colors(&effect, 60_000, 1, 1, idle()), vec![end]);
    }

    #[test]
    fn zero_duration_gradient_holds_start() {
        let start = Color::new(10, 20, 30);
        let effect = RgbEffect::new(
            "degenerate",
            EffectKind::Gradient {
                start,
                end: Color::new(200, 200, 200),
                duration_ms: 0,
            },
        );

        assert_eq!(compute_colors(&effect, 123_456, 2, 2, idle()), vec![start; 2]);
    }

    #[test]
    fn rainbow_is_periodic_and_spatially_varying() {
        let effect = RgbEffect::rainbow(3000);

        for t in [0u64, 100, 1499, 2999] {
            assert_eq!(
                compute_colors(&effect, t, 8, 8, idle()),
                compute_colors(&effect, t + 3000, 8, 8, idle()),
                "t = {}",
                t
            );
        }

        let frame = compute_colors(&effect, 0, 8, 8, idle());
        assert_ne!(frame[0], frame[4]);
    }

    #[test]
    fn wave_is_periodic() {
        let effect = RgbEffect::wave(red(), 2000);

        for t in [0u64, 37, 1000, 1999] {
            assert_eq!(
                compute_colors(&effect, t, 6, 6, idle()),
                compute_colors(&effect, t + 2000, 6, 6, idle()),
                "t = {}",
                t
            );
        }
    }

    #[test]
    fn wave_respects_minimum_brightness() {
        let effect = RgbEffect::wave(Color::new(250, 0, 0), 2000);

        for t in (0..4000).step_by(97) {
            for color in compute_colors(&effect, t, 6, 6, idle()) {
                assert!(color.red >= (250.0 * 0.2) as u8 - 1, "t = {}", t);
            }
        }
    }

    #[test]
    fn zero_count_yields_empty_frame() {
        for effect in [
            RgbEffect::static_color(red()),
            RgbEffect::pulse(red()),
            RgbEffect::rainbow(1000),
        ] {
            assert!(compute_colors(&effect, 42, 0, 0, idle()).is_empty());
        }
    }
}
