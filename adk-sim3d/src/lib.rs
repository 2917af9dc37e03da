//! `adk-sim3d` is the client core of the ADK 3D simulation workbench.
//! It multiplexes one real-time channel into chat sessions with streamed replies and tool-call
//! events, and replays server-computed physics trajectories onto scene entities frame by frame.

pub mod client;
pub mod config;
pub mod error;
pub mod fallback;
pub mod formatter;
pub mod picking;
pub mod playback;
pub mod protocol;
pub mod runtime;
pub mod scene;
pub mod session;
pub mod tools;
pub mod transport;

pub use client::{ChatDispatch, ClientSnapshot, SimClient, SimulationSummary};
pub use config::{ClientConfig, PlaybackPacing};
pub use error::{Result, SimError};
pub use fallback::{ChatFallback, FallbackResponse, HttpChatFallback};
pub use protocol::{ChannelEvent, OutboundEvent};
pub use runtime::{ClientHandle, ClientRuntime};
pub use transport::{ChannelTransport, LoopbackTransport};
