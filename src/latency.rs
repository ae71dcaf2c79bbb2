//! Playback latency monitoring and correction
//!
//! Live WebRTC playback accumulates delay whenever the decoder stalls: the
//! buffered trailing edge keeps advancing while the playback position does
//! not. The monitor samples both on a fixed interval and, past a threshold,
//! jumps playback to the trailing edge. Buffered frames are sacrificed;
//! smoothness is traded for bounded end-to-end delay.

use crate::sink::RenderSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Periodic sampler of playback drift against a [`RenderSink`]
///
/// Runs as a background task for the lifetime of one track attachment and
/// is cancelled deterministically when stopped or dropped.
pub struct LatencyMonitor {
    handle: JoinHandle<()>,
}

impl LatencyMonitor {
    /// Start sampling the sink
    ///
    /// Every `interval` the monitor computes
    /// `drift = buffered trailing edge - playback position`, publishes it on
    /// `drift_tx`, and forces a seek to the trailing edge when the drift
    /// exceeds `max_drift_secs`. Samples are skipped while playback is
    /// paused or the decoder lacks enough data to play through.
    pub fn start(
        sink: Arc<dyn RenderSink>,
        interval: Duration,
        max_drift_secs: f64,
        drift_tx: Arc<watch::Sender<f64>>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                if sink.is_paused() || !sink.has_enough_data() {
                    trace!("skipping latency sample, sink not playing");
                    continue;
                }

                let Some(buffered_end) = sink.buffered_end() else {
                    continue;
                };

                let drift = buffered_end - sink.position();
                drift_tx.send_replace(drift);

                if drift > max_drift_secs {
                    debug!(drift, buffered_end, "drift over limit, seeking forward");
                    sink.seek_to(buffered_end);
                }
            }
        });

        Self { handle }
    }

    /// Stop sampling
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for LatencyMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
