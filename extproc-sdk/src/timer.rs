// Copyright 2025 The kmesh Authors
//
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

use std::time::{Duration, Instant, SystemTime};

/// Re-armable stopwatch used to attribute handler wall time per phase.
///
/// Elapsed time is measured on the monotonic clock; the start instant is
/// also captured on the wall clock so it can be reported in RFC 3339 form.
#[derive(Debug, Clone)]
pub struct Timer {
    started_at: SystemTime,
    start: Instant,
    end: Option<Instant>,
}

impl Timer {
    /// A timer armed at the moment of construction.
    pub fn new() -> Self {
        Timer { started_at: SystemTime::now(), start: Instant::now(), end: None }
    }

    /// Re-arms the timer, discarding any previous measurement.
    pub fn tic(&mut self) {
        self.started_at = SystemTime::now();
        self.start = Instant::now();
        self.end = None;
    }

    /// Stops the timer and returns the elapsed interval.
    pub fn toc(&mut self) -> Duration {
        let end = Instant::now();
        self.end = Some(end);
        end.duration_since(self.start)
    }

    /// Elapsed time of the last measurement, or time since arming if the
    /// timer is still running.
    pub fn duration(&self) -> Duration {
        self.end.unwrap_or_else(Instant::now).duration_since(self.start)
    }

    pub fn duration_ns(&self) -> u128 {
        self.duration().as_nanos()
    }

    /// Wall-clock start of the current measurement, nanoseconds since the
    /// Unix epoch.
    pub fn started_ns(&self) -> u128 {
        self.started_at
            .duration_since(std::time::UNIX_EPOCH)
            .map(|since| since.as_nanos())
            .unwrap_or_default()
    }

    /// Wall-clock start of the current measurement, RFC 3339 formatted.
    pub fn started_iso(&self) -> String {
        humantime::format_rfc3339_millis(self.started_at).to_string()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Timer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toc_freezes_the_measurement() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = timer.toc();
        assert!(elapsed >= Duration::from_millis(5));
        assert_eq!(timer.duration(), elapsed);
    }

    #[test]
    fn tic_rearms_and_overwrites_the_previous_measurement() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(10));
        let first = timer.toc();
        timer.tic();
        let second = timer.toc();
        assert!(second < first);
        assert_eq!(timer.duration(), second);
    }

    #[test]
    fn started_iso_is_rfc3339() {
        let timer = Timer::new();
        let stamp = timer.started_iso();
        assert!(stamp.ends_with('Z'));
        assert!(stamp.contains('T'));
        assert!(timer.started_ns() > 0);
    }
}
