use regex::Regex;

/// One parsed progress report. Transient: handed to the observer and
/// discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Elapsed media time in seconds.
    pub time_processed: f64,
    pub fps: Option<f64>,
    pub speed: Option<f64>,
}

/// Extracts progress metrics from one line of the transcoder's textual
/// protocol, e.g.
/// `frame=10 fps=30.0 q=-1.0 size=100kB time=00:01:05.50 bitrate=128kbits/s speed=2.0x`.
///
/// The `time=` field is the anchor: without it the line is not a progress
/// line. `fps=` and `speed=` are optional. The protocol pads values with
/// whitespace, so padding around `=` is tolerated.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    time: Regex,
    fps: Regex,
    speed: Regex,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        let time = Regex::new(r"time=\s*(\d+):(\d+):(\d+\.\d+)").expect("valid regex");
        let fps = Regex::new(r"fps=\s*(\d+\.?\d*)").expect("valid regex");
        let speed = Regex::new(r"speed=\s*(\d+\.?\d*)x").expect("valid regex");
        Self { time, fps, speed }
    }

    pub fn parse(&self, line: &str) -> Option<ProgressSample> {
        let captures = self.time.captures(line)?;
        let hours: f64 = captures[1].parse().ok()?;
        let minutes: f64 = captures[2].parse().ok()?;
        let seconds: f64 = captures[3].parse().ok()?;
        let time_processed = hours * 3600.0 + minutes * 60.0 + seconds;

        let fps = self
            .fps
            .captures(line)
            .and_then(|c| c[1].parse::<f64>().ok());
        let speed = self
            .speed
            .captures(line)
            .and_then(|c| c[1].parse::<f64>().ok());

        Some(ProgressSample {
            time_processed,
            fps,
            speed,
        })
    }
}

/// Reassembles text lines from chunks split at arbitrary byte offsets by
/// the OS pipe.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and yields every completed line, in arrival order.
    /// Carriage returns count as terminators too; the transcoder rewrites
    /// its stats line with `\r`.
    pub fn push<F>(&mut self, chunk: &[u8], mut visit: F)
    where
        F: FnMut(&str),
    {
        self.pending.extend_from_slice(chunk);
        let mut start = 0;
        for index in 0..self.pending.len() {
            let byte = self.pending[index];
            if byte == b'\n' || byte == b'\r' {
                let line = &self.pending[start..index];
                if !line.is_empty() {
                    visit(&String::from_utf8_lossy(line));
                }
                start = index + 1;
            }
        }
        self.pending.drain(..start);
    }

    /// Hands back the trailing unterminated line, if any.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_stats_line() {
        let parser = ProgressParser::new();
        let sample = parser
            .parse(
                "frame=10 fps=30.0 q=-1.0 size=100kB time=00:01:05.50 bitrate=128kbits/s speed=2.0x",
            )
            .expect("progress line");
        assert_eq!(sample.time_processed, 65.5);
        assert_eq!(sample.fps, Some(30.0));
        assert_eq!(sample.speed, Some(2.0));
    }

    #[test]
    fn time_field_is_mandatory() {
        let parser = ProgressParser::new();
        assert_eq!(parser.parse("frame=10 fps=30.0"), None);
        assert_eq!(parser.parse(""), None);
    }

    #[test]
    fn fps_and_speed_are_optional() {
        let parser = ProgressParser::new();
        let sample = parser.parse("time=01:00:00.00").expect("progress line");
        assert_eq!(sample.time_processed, 3600.0);
        assert_eq!(sample.fps, None);
        assert_eq!(sample.speed, None);
    }

    #[test]
    fn tolerates_padded_values() {
        let parser = ProgressParser::new();
        let sample = parser
            .parse("frame=  123 fps= 45 q=28.0 time=00:00:05.00 speed= 1.5x")
            .expect("progress line");
        assert_eq!(sample.time_processed, 5.0);
        assert_eq!(sample.fps, Some(45.0));
        assert_eq!(sample.speed, Some(1.5));
    }

    #[test]
    fn key_value_progress_protocol_also_matches() {
        // `-progress` output spells the anchor as out_time=HH:MM:SS.micros,
        // which still carries the time= anchor.
        let parser = ProgressParser::new();
        let sample = parser.parse("out_time=00:00:02.500000").expect("anchor");
        assert_eq!(sample.time_processed, 2.5);
    }

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut buffer = LineBuffer::new();
        let mut lines = Vec::new();
        buffer.push(b"time=00:00:01", |line| lines.push(line.to_string()));
        assert!(lines.is_empty());
        buffer.push(b".00 speed=1.0x\ntime=00:00:0", |line| {
            lines.push(line.to_string())
        });
        assert_eq!(lines, vec!["time=00:00:01.00 speed=1.0x"]);
        assert_eq!(buffer.finish(), Some("time=00:00:0".to_string()));
    }

    #[test]
    fn carriage_returns_terminate_lines() {
        let mut buffer = LineBuffer::new();
        let mut lines = Vec::new();
        buffer.push(b"a\rb\r\nc", |line| lines.push(line.to_string()));
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(buffer.finish(), Some("c".to_string()));
    }
}
