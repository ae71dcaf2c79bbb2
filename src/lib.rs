//! Low-latency WebRTC stream viewer core
//!
//! `rtcview` connects to a go2rtc-style media server, negotiates a
//! receive-only WebRTC session over one-shot HTTP signaling, and keeps the
//! session healthy: failed attempts are retried after a fixed delay, and
//! playback that falls behind the live edge is snapped forward.
//!
//! # Architecture
//!
//! ```text
//!   host panel                      controller task
//!  ┌────────────┐  ViewerEvent    ┌──────────────────────────────┐
//!  │ set_config ├────────────────▶│  single transition function  │
//!  │ reconnect  │                 │   ┌─────────┐  ┌──────────┐  │
//!  │ shutdown   │◀────────────────┤   │ Session │  │ Retry    │  │
//!  └────────────┘  ViewerStatus   │   │ (webrtc)│  │ Scheduler│  │
//!                                 │   └────┬────┘  └──────────┘  │
//!  ┌────────────┐                 │        │       ┌──────────┐  │
//!  │ RenderSink │◀────────────────┤  track │       │ Latency  │  │
//!  │ (host)     │◀─ seek_to ──────┤        ▼       │ Monitor  │  │
//!  └────────────┘                 │   SignalingClient (HTTP)    │
//!                                 └──────────────────────────────┘
//! ```
//!
//! The controller owns everything mutable. Hosts talk to it through
//! [`ViewerController`] and observe it through `watch` channels; media is
//! delivered to a host-provided [`RenderSink`].
//!
//! # Example
//!
//! ```no_run
//! use rtcview::{RenderSink, ViewerConfig, ViewerController};
//! use std::sync::Arc;
//!
//! # async fn run(sink: Arc<dyn RenderSink>) {
//! let viewer = ViewerController::new(sink);
//! viewer.set_config(ViewerConfig::new("http://localhost:1984", "cam1"));
//!
//! let mut status = viewer.status();
//! while status.changed().await.is_ok() {
//!     println!("viewer: {}", *status.borrow());
//! }
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod error;
pub mod latency;
pub mod reconnect;
pub mod signaling;
pub mod sink;

mod session;

pub use config::{ConfigStore, JsonFileStore, ViewerConfig, ViewerOptions};
pub use controller::{ViewerController, ViewerEvent, ViewerStatus};
pub use error::{Error, Result};
pub use latency::LatencyMonitor;
pub use reconnect::RetryScheduler;
pub use signaling::{Negotiator, SignalingClient};
pub use sink::RenderSink;

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
