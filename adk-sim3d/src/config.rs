//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

const DEFAULT_FALLBACK_URL: &str = "http://127.0.0.1:5000/api/chat";

/// How the playback scheduler consumes trajectory samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlaybackPacing {
    /// One sample per scheduler tick, i.e. per rendered frame.
    #[default]
    PerTick,
    /// One sample per elapsed `interval` of wall-clock time.
    FixedRate {
        /// Time each sample stays on screen.
        interval: Duration,
    },
}

/// Configuration for a [`SimClient`](crate::client::SimClient) and its runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Endpoint of the request/response chat fallback.
    pub fallback_url: String,
    /// Period of the frame clock that drives playback.
    pub frame_interval: Duration,
    /// How long a session may show its typing indicator before it is closed as timed out.
    /// `None` keeps sessions open indefinitely.
    pub stream_timeout: Option<Duration>,
    /// Playback pacing mode.
    pub playback_pacing: PlaybackPacing,
    /// Half the edge length of the horizontal square new shapes spawn in.
    pub spawn_half_extent: f32,
    /// Vertical range new shapes spawn in, `[min, max)`.
    pub spawn_height: (f32, f32),
    /// Seed for spawn positions and colours. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            frame_interval: Duration::from_millis(16),
            stream_timeout: Some(Duration::from_secs(120)),
            playback_pacing: PlaybackPacing::PerTick,
            spawn_half_extent: 5.0,
            spawn_height: (1.0, 6.0),
            seed: None,
        }
    }
}

impl ClientConfig {
    /// Create a new builder for constructing a [`ClientConfig`].
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Build a configuration from `ADK_SIM3D_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    ///
    /// - `ADK_SIM3D_FALLBACK_URL`
    /// - `ADK_SIM3D_FPS` (frames per second)
    /// - `ADK_SIM3D_STREAM_TIMEOUT_SECS` (`0` disables the timeout)
    /// - `ADK_SIM3D_PLAYBACK_MS` (fixed-rate sample interval; unset means per-tick)
    /// - `ADK_SIM3D_SEED`
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();

        if let Ok(url) = std::env::var("ADK_SIM3D_FALLBACK_URL") {
            builder = builder.fallback_url(url);
        }
        if let Some(fps) = env_parse::<u64>("ADK_SIM3D_FPS").filter(|fps| *fps > 0) {
            builder = builder.frame_interval(Duration::from_micros(1_000_000 / fps));
        }
        if let Some(secs) = env_parse::<u64>("ADK_SIM3D_STREAM_TIMEOUT_SECS") {
            builder = builder
                .stream_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }
        if let Some(ms) = env_parse::<u64>("ADK_SIM3D_PLAYBACK_MS") {
            builder = builder
                .playback_pacing(PlaybackPacing::FixedRate { interval: Duration::from_millis(ms) });
        }
        if let Some(seed) = env_parse::<u64>("ADK_SIM3D_SEED") {
            builder = builder.seed(seed);
        }

        builder.build()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}

/// Builder for constructing a validated [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the chat fallback endpoint.
    pub fn fallback_url(mut self, url: impl Into<String>) -> Self {
        self.config.fallback_url = url.into();
        self
    }

    /// Set the frame clock period.
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.config.frame_interval = interval;
        self
    }

    /// Set or disable the streaming timeout.
    pub fn stream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.stream_timeout = timeout;
        self
    }

    /// Set the playback pacing mode.
    pub fn playback_pacing(mut self, pacing: PlaybackPacing) -> Self {
        self.config.playback_pacing = pacing;
        self
    }

    /// Set the horizontal spawn half extent.
    pub fn spawn_half_extent(mut self, extent: f32) -> Self {
        self.config.spawn_half_extent = extent;
        self
    }

    /// Set the vertical spawn range.
    pub fn spawn_height(mut self, min: f32, max: f32) -> Self {
        self.config.spawn_height = (min, max);
        self
    }

    /// Seed the spawn RNG.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Build the [`ClientConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] if:
    /// - `frame_interval` is zero
    /// - a fixed-rate playback interval is zero
    /// - `spawn_half_extent` is not positive
    /// - `spawn_height` is empty
    pub fn build(self) -> Result<ClientConfig> {
        let config = self.config;
        if config.frame_interval.is_zero() {
            return Err(SimError::Config("frame_interval must be greater than zero".to_string()));
        }
        if let PlaybackPacing::FixedRate { interval } = config.playback_pacing {
            if interval.is_zero() {
                return Err(SimError::Config(
                    "fixed-rate playback interval must be greater than zero".to_string(),
                ));
            }
        }
        if config.spawn_half_extent <= 0.0 {
            return Err(SimError::Config(format!(
                "spawn_half_extent ({}) must be positive",
                config.spawn_half_extent
            )));
        }
        if config.spawn_height.0 >= config.spawn_height.1 {
            return Err(SimError::Config(format!(
                "spawn_height min ({}) must be below max ({})",
                config.spawn_height.0, config.spawn_height.1
            )));
        }
        Ok(config)
    }
}
