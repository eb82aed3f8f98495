//! Per-frame stage timings, and aggregation over a whole run.

use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTimes {
    pub frame_read: Duration,
    pub resize: Duration,
    pub to_tensor: Duration,
    pub forward_pass: Duration,
    pub bbox_extraction: Duration,
    pub nms: Duration,
    pub tracking: Duration,
    pub counting: Duration,
    pub annotation: Duration,
    pub frame_write: Duration,
}

impl FrameTimes {
    pub fn total(&self) -> Duration {
        self.fields().iter().sum()
    }

    fn fields(&self) -> [Duration; 10] {
        [
            self.frame_read,
            self.resize,
            self.to_tensor,
            self.forward_pass,
            self.bbox_extraction,
            self.nms,
            self.tracking,
            self.counting,
            self.annotation,
            self.frame_write,
        ]
    }

    fn from_fields(f: [Duration; 10]) -> Self {
        Self {
            frame_read: f[0],
            resize: f[1],
            to_tensor: f[2],
            forward_pass: f[3],
            bbox_extraction: f[4],
            nms: f[5],
            tracking: f[6],
            counting: f[7],
            annotation: f[8],
            frame_write: f[9],
        }
    }
}

#[derive(Debug, Default)]
pub struct AggregatedTimes {
    frames: Vec<FrameTimes>,
}

impl AggregatedTimes {
    pub fn push(&mut self, times: FrameTimes) {
        self.frames.push(times);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn considered(&self, skip_first: bool) -> &[FrameTimes] {
        if skip_first && self.frames.len() > 1 {
            &self.frames[1..]
        } else {
            &self.frames
        }
    }

    pub fn avg(&self, skip_first: bool) -> FrameTimes {
        let frames = self.considered(skip_first);
        if frames.is_empty() {
            return FrameTimes::default();
        }
        let mut sums = [Duration::ZERO; 10];
        for frame in frames {
            for (sum, value) in sums.iter_mut().zip(frame.fields()) {
                *sum += value;
            }
        }
        let n = frames.len() as u32;
        FrameTimes::from_fields(sums.map(|sum| sum / n))
    }

    pub fn min(&self, skip_first: bool) -> FrameTimes {
        self.fold(skip_first, Duration::min)
    }

    pub fn max(&self, skip_first: bool) -> FrameTimes {
        self.fold(skip_first, Duration::max)
    }

    fn fold(&self, skip_first: bool, pick: fn(Duration, Duration) -> Duration) -> FrameTimes {
        let frames = self.considered(skip_first);
        let Some(first) = frames.first() else {
            return FrameTimes::default();
        };
        let mut acc = first.fields();
        for frame in &frames[1..] {
            for (a, value) in acc.iter_mut().zip(frame.fields()) {
                *a = pick(*a, value);
            }
        }
        FrameTimes::from_fields(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(forward_ms: u64) -> FrameTimes {
        FrameTimes {
            forward_pass: Duration::from_millis(forward_ms),
            ..Default::default()
        }
    }

    #[test]
    fn test_avg_skips_first_frame() {
        let mut agg = AggregatedTimes::default();
        agg.push(times(500));
        agg.push(times(10));
        agg.push(times(30));

        assert_eq!(agg.avg(true).forward_pass, Duration::from_millis(20));
        assert_eq!(agg.avg(false).forward_pass, Duration::from_millis(180));
    }

    #[test]
    fn test_min_max() {
        let mut agg = AggregatedTimes::default();
        agg.push(times(500));
        agg.push(times(10));
        agg.push(times(30));

        assert_eq!(agg.min(true).forward_pass, Duration::from_millis(10));
        assert_eq!(agg.max(true).forward_pass, Duration::from_millis(30));
        assert_eq!(agg.max(false).forward_pass, Duration::from_millis(500));
    }

    #[test]
    fn test_empty_aggregate() {
        let agg = AggregatedTimes::default();
        assert!(agg.is_empty());
        assert_eq!(agg.avg(true).total(), Duration::ZERO);
        assert_eq!(agg.min(false).total(), Duration::ZERO);
    }
}
