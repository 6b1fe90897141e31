//! Timeline of the steps a request went through.
use std::time::{Duration, Instant};
use tracing::{Level, debug, trace};

#[derive(Debug, Clone)]
struct Marker {
    name: String,
    time: Instant,
}

#[derive(Debug, Default)]
pub struct MarkerLog {
    markers: Vec<Marker>,
    finished: bool,
}

impl MarkerLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, sequence: u64) {
        let name = name.into();
        trace!(sequence, marker = %name);
        if self.finished {
            return;
        }
        self.markers.push(Marker {
            name,
            time: Instant::now(),
        });
    }

    pub fn names(&self) -> Vec<&str> {
        self.markers.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn total_duration(&self) -> Duration {
        match (self.markers.first(), self.markers.last()) {
            (Some(first), Some(last)) => last.time.duration_since(first.time),
            _ => Duration::ZERO,
        }
    }

    /// Closes the log and emits the timeline as one debug event.
    pub fn finish(&mut self, header: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !tracing::enabled!(Level::DEBUG) {
            return;
        }

        let mut previous = match self.markers.first() {
            Some(first) => first.time,
            None => return,
        };
        let timeline = self
            .markers
            .iter()
            .map(|marker| {
                let delta = marker.time.duration_since(previous);
                previous = marker.time;
                format!("{} +{}ms", marker.name, delta.as_millis())
            })
            .collect::<Vec<_>>()
            .join(", ");
        debug!(
            total_ms = self.total_duration().as_millis() as u64,
            %timeline,
            "{header}"
        );
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
