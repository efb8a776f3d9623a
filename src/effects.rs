//! Effect model: what to draw, where, and how strongly
//!
//! Effects are immutable value objects. Rendering math lives in pure
//! functions next to them so every behavior can be tested without a device.

use std::time::Instant;

use thiserror::Error;

use crate::models::Color;

mod compute;
pub use compute::*;

/// Default minimum brightness of a pulse
pub const DEFAULT_PULSE_MIN_BRIGHTNESS: f32 = 0.2;
/// Default pulse period
pub const DEFAULT_PULSE_PERIOD_MS: u64 = 1000;
/// Default flash duration
pub const DEFAULT_FLASH_DURATION_MS: u64 = 500;
/// Default gradient duration, sized for a pomodoro-style timer sweep
pub const DEFAULT_GRADIENT_DURATION_MS: u64 = 25 * 60 * 1000;

/// Error raised when constructing an invalid effect target
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("negative led index: {0}")]
    NegativeLedIndex(i32),
    #[error("negative zone index: {0}")]
    NegativeZoneIndex(i32),
}

/// The set of LED indices an effect is allowed to write to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectTarget {
    /// Every LED of the device
    AllLeds,
    /// One LED, ignored when out of range
    SingleLed(usize),
    /// An arbitrary set of LEDs, filtered to the valid range
    LedSet(Vec<usize>),
    /// A zone's contiguous LED range
    Zone(usize),
}

impl EffectTarget {
    /// Target one LED, rejecting negative indices
    pub fn single_led(index: i32) -> Result<Self, TargetError> {
        if index < 0 {
            return Err(TargetError::NegativeLedIndex(index));
        }

        Ok(Self::SingleLed(index as usize))
    }

    /// Target a set of LEDs, rejecting any negative index
    pub fn led_set(indices: impl IntoIterator<Item = i32>) -> Result<Self, TargetError> {
        let mut set = Vec::new();

        for index in indices {
            if index < 0 {
                return Err(TargetError::NegativeLedIndex(index));
            }

            set.push(index as usize);
        }

        Ok(Self::LedSet(set))
    }

    /// Target a zone, rejecting negative indices
    pub fn zone(index: i32) -> Result<Self, TargetError> {
        if index < 0 {
            return Err(TargetError::NegativeZoneIndex(index));
        }

        Ok(Self::Zone(index as usize))
    }
}

/// Time-varying behavior of an effect
#[derive(Debug, Clone, PartialEq)]
pub enum EffectKind {
    Static {
        color: Color,
    },
    Pulse {
        color: Color,
        min_brightness: f32,
        period_ms: u64,
    },
    Flash {
        color: Color,
        duration_ms: u64,
    },
    Progress {
        color: Color,
        background: Color,
        progress: f32,
    },
    Gradient {
        start: Color,
        end: Color,
        duration_ms: u64,
    },
    Rainbow {
        speed_ms: u64,
    },
    Wave {
        color: Color,
        speed_ms: u64,
        min_brightness: f32,
    },
}

impl EffectKind {
    /// Whether the rendered output changes over time
    pub fn is_animated(&self) -> bool {
        match self {
            EffectKind::Static { .. } | EffectKind::Progress { .. } => false,
            EffectKind::Pulse { .. }
            | EffectKind::Flash { .. }
            | EffectKind::Gradient { .. }
            | EffectKind::Rainbow { .. }
            | EffectKind::Wave { .. } => true,
        }
    }
}

/// A requested visual effect: display name, conflict priority, target and
/// rendering behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RgbEffect {
    pub name: String,
    pub priority: i32,
    pub target: EffectTarget,
    pub kind: EffectKind,
}

impl RgbEffect {
    pub fn new(name: impl Into<String>, kind: EffectKind) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            target: EffectTarget::AllLeds,
            kind,
        }
    }

    /// A constant color
    pub fn static_color(color: Color) -> Self {
        Self::new("static", EffectKind::Static { color })
    }

    /// A triangular brightness pulse
    pub fn pulse(color: Color) -> Self {
        Self::new(
            "pulse",
            EffectKind::Pulse {
                color,
                min_brightness: DEFAULT_PULSE_MIN_BRIGHTNESS,
                period_ms: DEFAULT_PULSE_PERIOD_MS,
            },
        )
    }

    /// A short burst of color that falls back to idle
    pub fn flash(color: Color) -> Self {
        Self::new(
            "flash",
            EffectKind::Flash {
                color,
                duration_ms: DEFAULT_FLASH_DURATION_MS,
            },
        )
    }

    /// A progress bar over the target's LEDs
    pub fn progress(color: Color, progress: f32) -> Self {
        Self::new(
            "progress",
            EffectKind::Progress {
                color,
                background: Color::new(20, 20, 20),
                progress,
            },
        )
    }

    /// A slow sweep from one color to another
    pub fn gradient(start: Color, end: Color) -> Self {
        Self::new(
            "gradient",
            EffectKind::Gradient {
                start,
                end,
                duration_ms: DEFAULT_GRADIENT_DURATION_MS,
            },
        )
    }

    /// A moving hue wheel across the device
    pub fn rainbow(speed_ms: u64) -> Self {
        Self::new("rainbow", EffectKind::Rainbow { speed_ms })
    }

    /// A brightness wave travelling across the device
    pub fn wave(color: Color, speed_ms: u64) -> Self {
        Self::new(
            "wave",
            EffectKind::Wave {
                color,
                speed_ms,
                min_brightness: DEFAULT_PULSE_MIN_BRIGHTNESS,
            },
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: EffectTarget) -> Self {
        self.target = target;
        self
    }
}

/// A registered effect plus its lifecycle bookkeeping
#[derive(Debug, Clone)]
pub struct ActiveEffect {
    pub effect: RgbEffect,
    pub start: Instant,
    /// Lifetime in milliseconds, 0 means never expires
    pub timeout_ms: u64,
}

impl ActiveEffect {
    pub fn new(effect: RgbEffect, timeout_ms: u64) -> Self {
        Self {
            effect,
            start: Instant::now(),
            timeout_ms,
        }
    }

    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.start).as_millis() as u64
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.timeout_ms > 0 && self.elapsed_ms(now) >= self.timeout_ms
    }

    /// Whether the render loop must keep ticking for this entry
    ///
    /// True for any time-varying kind, and for timed entries of any kind so
    /// that expiry is still observed.
    pub fn needs_ticking(&self) -> bool {
        self.effect.kind.is_animated() || self.timeout_ms > 0
    }
}
