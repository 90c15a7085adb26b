use std::collections::BTreeMap;
use std::time::Instant;

/// Observer for executor events.
///
/// Executors report through this trait only; hosts pick what to do with
/// the events (log lines, a progress bar, nothing).
pub trait PipelineLogger: Send {
    /// `total` is 0 when the input does not advertise a frame count.
    fn progress(&mut self, current: usize, total: usize);

    /// One call of `step` (a stage name, `read` or `write`) took
    /// `duration_ms`.
    fn timing(&mut self, step: &str, duration_ms: f64);

    /// `step` discarded the frame it was given.
    fn dropped(&mut self, _step: &str) {}

    /// Sampled gauge such as a queue depth.
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Called once when the run ends.
    fn summary(&self) {}
}

/// Discards everything.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _current: usize, _total: usize) {}
    fn timing(&mut self, _step: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running totals for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepStats {
    pub calls: usize,
    pub dropped: usize,
    pub total_ms: f64,
    pub max_ms: f64,
}

impl StepStats {
    fn record(&mut self, duration_ms: f64) {
        self.calls += 1;
        self.total_ms += duration_ms;
        self.max_ms = self.max_ms.max(duration_ms);
    }

    pub fn mean_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_ms / self.calls as f64
        }
    }

    /// Calls per second of time spent inside the step.
    pub fn rate(&self) -> Option<f64> {
        (self.total_ms > 0.0).then(|| self.calls as f64 * 1000.0 / self.total_ms)
    }
}

/// Sampled gauge: count, sum and peak.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaugeStats {
    pub samples: usize,
    pub sum: f64,
    pub peak: f64,
}

impl GaugeStats {
    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum / self.samples as f64
        }
    }
}

/// Accumulates step and gauge stats, writes progress through the `log`
/// facade every `throttle_frames` frames and a per-step table at the end.
pub struct StdoutPipelineLogger {
    throttle_frames: usize,
    steps: BTreeMap<String, StepStats>,
    gauges: BTreeMap<String, GaugeStats>,
    started: Instant,
    frames_seen: usize,
    messages: Vec<String>,
}

impl StdoutPipelineLogger {
    pub fn new(throttle_frames: usize) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            steps: BTreeMap::new(),
            gauges: BTreeMap::new(),
            started: Instant::now(),
            frames_seen: 0,
            messages: Vec::new(),
        }
    }

    pub fn step(&self, step: &str) -> Option<&StepStats> {
        self.steps.get(step)
    }

    pub fn gauge(&self, name: &str) -> Option<&GaugeStats> {
        self.gauges.get(name)
    }

    /// End-of-run table, or `None` when nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.steps.is_empty() && self.gauges.is_empty() {
            return None;
        }

        let wall = self.started.elapsed().as_secs_f64();
        let mut out = format!("{} frame(s) in {wall:.2}s", self.frames_seen);
        if wall > 0.0 && self.frames_seen > 0 {
            out.push_str(&format!(", {:.1} frames/s", self.frames_seen as f64 / wall));
        }

        if !self.steps.is_empty() {
            out.push_str(&format!(
                "\n{:<22} {:>7} {:>9} {:>9} {:>9} {:>7}",
                "step", "calls", "mean_ms", "max_ms", "per_sec", "dropped"
            ));
            for (name, stats) in &self.steps {
                let rate = stats
                    .rate()
                    .map_or_else(|| "-".to_string(), |r| format!("{r:.0}"));
                out.push_str(&format!(
                    "\n{name:<22} {:>7} {:>9.2} {:>9.2} {rate:>9} {:>7}",
                    stats.calls,
                    stats.mean_ms(),
                    stats.max_ms,
                    stats.dropped
                ));
            }
        }

        for (name, gauge) in &self.gauges {
            out.push_str(&format!(
                "\n{name}: mean {:.1}, peak {:.0} over {} sample(s)",
                gauge.mean(),
                gauge.peak,
                gauge.samples
            ));
        }

        Some(out)
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(25)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, current: usize, total: usize) {
        self.frames_seen = current;
        let last = total > 0 && current == total;
        if current % self.throttle_frames != 0 && !last {
            return;
        }
        if total > 0 {
            log::info!(
                "Frame {current}/{total} ({:.0}%)",
                current as f64 * 100.0 / total as f64
            );
        } else {
            log::info!("Frame {current}");
        }
    }

    fn timing(&mut self, step: &str, duration_ms: f64) {
        self.steps.entry(step.to_string()).or_default().record(duration_ms);
    }

    fn dropped(&mut self, step: &str) {
        self.steps.entry(step.to_string()).or_default().dropped += 1;
    }

    fn metric(&mut self, name: &str, value: f64) {
        let gauge = self.gauges.entry(name.to_string()).or_default();
        gauge.samples += 1;
        gauge.sum += value;
        gauge.peak = gauge.peak.max(value);
    }

    fn info(&mut self, message: &str) {
        self.messages.push(message.to_string());
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("Run summary: {text}");
        }
    }
}
