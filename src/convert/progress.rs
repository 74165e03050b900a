/// One `-progress` block reported by ffmpeg.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressUpdate {
    /// 0 when the duration is unknown
    pub percent: f64,
    /// ffmpeg reported `progress=end`
    pub finished: bool,
}

/// Consumes the `key=value` lines ffmpeg writes with `-progress pipe:1`.
///
/// ffmpeg emits a block of keys per report and closes each block with a
/// `progress=continue` or `progress=end` line; one update is yielded per block.
#[derive(Debug)]
pub struct ProgressParser {
    duration_us: Option<f64>,
    out_time_us: Option<i64>,
}

impl ProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_us: duration_secs
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| d * 1_000_000.0),
            out_time_us: None,
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<ProgressUpdate> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            // `out_time_ms` is also microseconds, kept for older ffmpeg builds
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_us = Some(us);
                }
                None
            }
            "progress" => Some(ProgressUpdate {
                percent: self.percent(),
                finished: value == "end",
            }),
            _ => None,
        }
    }

    fn percent(&self) -> f64 {
        match (self.out_time_us, self.duration_us) {
            (Some(time), Some(duration)) => (time.max(0) as f64 / duration * 100.0).clamp(0.0, 100.0),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut ProgressParser, text: &str) -> Vec<ProgressUpdate> {
        text.lines().filter_map(|line| parser.feed(line)).collect()
    }

    #[test]
    fn test_progress_blocks() {
        let mut parser = ProgressParser::new(Some(10.0));
        let updates = feed_all(
            &mut parser,
            "frame=10\nfps=0.0\nout_time_us=2500000\nout_time=00:00:02.500000\nspeed=5x\nprogress=continue\n\
             frame=40\nout_time_us=10000000\nprogress=end\n",
        );

        assert_eq!(
            updates,
            [
                ProgressUpdate {
                    percent: 25.0,
                    finished: false
                },
                ProgressUpdate {
                    percent: 100.0,
                    finished: true
                },
            ]
        );
    }

    #[test]
    fn test_unknown_duration_reports_zero() {
        let mut parser = ProgressParser::new(None);
        let updates = feed_all(&mut parser, "out_time_us=5000000\nprogress=continue\n");
        assert_eq!(updates[0].percent, 0.0);

        let mut parser = ProgressParser::new(Some(0.0));
        let updates = feed_all(&mut parser, "out_time_us=5000000\nprogress=continue\n");
        assert_eq!(updates[0].percent, 0.0);
    }

    #[test]
    fn test_garbage_is_ignored() {
        let mut parser = ProgressParser::new(Some(4.0));
        let updates = feed_all(
            &mut parser,
            "not a progress line\nout_time_us=N/A\nout_time_us=-100\nprogress=continue\n\
             out_time_us=8000000\nprogress=continue\n",
        );
        assert_eq!(updates[0].percent, 0.0);
        // past the end is clamped
        assert_eq!(updates[1].percent, 100.0);
    }
}
