//! Render sink seam between the viewer core and the host's media element

use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

/// Attach point for incoming media plus the playback introspection the
/// latency monitor needs
///
/// The host implements this over whatever actually renders the video (a
/// media element, a decoder feeding a texture, ...). The controller attaches
/// exactly one incoming track per session; the latency monitor polls the
/// playback-side methods and may force a forward seek.
///
/// Positions are in seconds of media time.
pub trait RenderSink: Send + Sync {
    /// Attach an incoming remote track for rendering
    fn attach(&self, track: Arc<TrackRemote>);

    /// Trailing edge of buffered media, if any media is buffered
    fn buffered_end(&self) -> Option<f64>;

    /// Current playback position
    fn position(&self) -> f64;

    /// Whether playback is currently paused
    fn is_paused(&self) -> bool;

    /// Whether the decoder has enough data to play through
    ///
    /// Maps to the "can play through" readiness level; drift samples taken
    /// below it would measure buffering, not latency.
    fn has_enough_data(&self) -> bool;

    /// Forcibly reposition playback
    ///
    /// Used for lossy latency correction: buffered frames between the old
    /// and new position are dropped.
    fn seek_to(&self, position: f64);
}
