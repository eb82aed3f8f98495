//! Entry/exit counting across a horizontal line.
//!
//! Every tracked identity keeps a short history of its centroids. On each new
//! observation the vertical displacement against the mean of that history
//! decides the direction of motion; an identity is counted at most once, the
//! first time it moves up past [CountingLine::up_limit] or down past
//! [CountingLine::down_limit].

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::tracker::TrackedObject;

pub const DEFAULT_HISTORY_LEN: usize = 32;

/// Placement of the counting line, in frame pixel rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountingLine {
    /// Moving up, a centroid above this row is counted as an exit.
    pub up_limit: f32,
    /// Moving down, a centroid below this row is counted as an entry.
    pub down_limit: f32,
    /// Row the line is drawn at.
    pub draw_y: f32,
    /// Downward displacement must stay below this to count, when set.
    pub max_down_step: Option<f32>,
}

impl CountingLine {
    /// Line around the middle of a frame `height` rows high.
    pub fn for_height(height: u32) -> Self {
        Self::with_offsets(height, -20.0, 4.0, -10.0)
    }

    /// Line with limits given as offsets from the middle row.
    pub fn with_offsets(height: u32, up_offset: f32, down_offset: f32, draw_offset: f32) -> Self {
        let mid = (height / 2) as f32;
        Self {
            up_limit: mid + up_offset,
            down_limit: mid + down_offset,
            draw_y: mid + draw_offset,
            max_down_step: Some(1.1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crossing {
    /// Moved up across the line: leaving.
    Up,
    /// Moved down across the line: entering.
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossingEvent {
    pub id: u64,
    pub crossing: Crossing,
    pub frame: u64,
    pub centroid: (f32, f32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub entered: u64,
    pub exited: u64,
}

impl Counts {
    /// People currently inside, never below zero.
    pub fn inside(&self) -> u64 {
        self.entered.saturating_sub(self.exited)
    }
}

#[derive(Debug, Clone)]
pub struct TrackableObject {
    pub id: u64,
    pub centroids: VecDeque<(f32, f32)>,
    pub counted: bool,
    pub last_seen: u64,
}

impl TrackableObject {
    fn new(id: u64, centroid: (f32, f32), frame: u64) -> Self {
        Self {
            id,
            centroids: VecDeque::from([centroid]),
            counted: false,
            last_seen: frame,
        }
    }

    fn mean_y(&self) -> f32 {
        let sum: f32 = self.centroids.iter().map(|c| c.1).sum();
        sum / self.centroids.len() as f32
    }
}

pub struct LineCounter {
    line: CountingLine,
    history_len: usize,
    objects: HashMap<u64, TrackableObject>,
    counts: Counts,
}

impl LineCounter {
    pub fn new(line: CountingLine, history_len: usize) -> Self {
        Self {
            line,
            history_len: history_len.max(1),
            objects: HashMap::new(),
            counts: Counts::default(),
        }
    }

    pub fn line(&self) -> &CountingLine {
        &self.line
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    pub fn object(&self, id: u64) -> Option<&TrackableObject> {
        self.objects.get(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Records one observation of `id` and returns the crossing it caused.
    pub fn observe(&mut self, id: u64, centroid: (f32, f32), frame: u64) -> Option<Crossing> {
        if !self.objects.contains_key(&id) {
            self.objects
                .insert(id, TrackableObject::new(id, centroid, frame));
            return None;
        }
        let object = self.objects.get_mut(&id)?;

        let y = centroid.1;
        let direction = y - object.mean_y();
        object.centroids.push_back(centroid);
        while object.centroids.len() > self.history_len {
            object.centroids.pop_front();
        }
        object.last_seen = frame;

        if object.counted {
            return None;
        }

        let crossing = if direction < 0.0 && y < self.line.up_limit {
            Some(Crossing::Up)
        } else if direction > 0.0
            && self.line.max_down_step.map_or(true, |bound| direction < bound)
            && y > self.line.down_limit
        {
            Some(Crossing::Down)
        } else {
            None
        };

        match crossing {
            Some(Crossing::Up) => self.counts.exited += 1,
            Some(Crossing::Down) => self.counts.entered += 1,
            None => return None,
        }
        object.counted = true;
        log::debug!("Object {id} counted {crossing:?} at {centroid:?}");
        crossing
    }

    /// Observes every object of a frame, in order.
    pub fn update(&mut self, objects: &[TrackedObject], frame: u64) -> Vec<CrossingEvent> {
        objects
            .iter()
            .filter_map(|object| {
                self.observe(object.id, object.centroid, frame)
                    .map(|crossing| CrossingEvent {
                        id: object.id,
                        crossing,
                        frame,
                        centroid: object.centroid,
                    })
            })
            .collect()
    }

    /// Forgets objects not observed within the last `max_idle` frames.
    pub fn prune(&mut self, frame: u64, max_idle: u64) -> usize {
        let before = self.objects.len();
        self.objects
            .retain(|_, object| frame.saturating_sub(object.last_seen) <= max_idle);
        before - self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> CountingLine {
        // 280 rows high: up limit 120, down limit 144.
        CountingLine::for_height(280)
    }

    fn feed(counter: &mut LineCounter, id: u64, ys: &[f32]) -> Vec<Option<Crossing>> {
        ys.iter()
            .enumerate()
            .map(|(frame, y)| counter.observe(id, (100.0, *y), frame as u64))
            .collect()
    }

    #[test]
    fn test_line_for_height() {
        let line = line();
        assert_eq!(line.up_limit, 120.0);
        assert_eq!(line.down_limit, 144.0);
        assert_eq!(line.draw_y, 130.0);
        assert_eq!(line.max_down_step, Some(1.1));
    }

    #[test]
    fn test_moving_up_counts_one_exit() {
        let mut counter = LineCounter::new(line(), DEFAULT_HISTORY_LEN);
        let ys: Vec<f32> = (0..20).map(|i| 160.0 - 4.0 * i as f32).collect();

        let crossings = feed(&mut counter, 1, &ys);

        let ups = crossings.iter().filter(|c| **c == Some(Crossing::Up)).count();
        assert_eq!(ups, 1);
        assert_eq!(counter.counts(), Counts { entered: 0, exited: 1 });
        // Counted on the first observation above the up limit.
        let first = crossings.iter().position(|c| c.is_some()).unwrap();
        assert!(ys[first] < 120.0);
        assert!(ys[first - 1] >= 120.0);
        assert!(counter.object(1).unwrap().counted);
    }

    #[test]
    fn test_slow_descent_counts_one_entry() {
        let mut counter = LineCounter::new(line(), DEFAULT_HISTORY_LEN);
        // Half a row per frame keeps the displacement from the mean under the
        // 1.1 bound for the first few observations.
        let ys: Vec<f32> = (0..10).map(|i| 143.0 + 0.5 * i as f32).collect();

        let crossings = feed(&mut counter, 7, &ys);

        // 143.5 and 144.0 are not below the down limit yet.
        assert!(crossings[..3].iter().all(Option::is_none));
        assert_eq!(crossings[3], Some(Crossing::Down));
        assert!(crossings[4..].iter().all(Option::is_none));
        assert_eq!(counter.counts(), Counts { entered: 1, exited: 0 });
    }

    #[test]
    fn test_fast_descent_exceeds_down_bound() {
        let mut counter = LineCounter::new(line(), DEFAULT_HISTORY_LEN);
        let ys: Vec<f32> = (0..20).map(|i| 100.0 + 5.0 * i as f32).collect();

        feed(&mut counter, 3, &ys);

        assert_eq!(counter.counts(), Counts::default());
        assert!(!counter.object(3).unwrap().counted);
    }

    #[test]
    fn test_unbounded_descent_counts_once() {
        let mut line = line();
        line.max_down_step = None;
        let mut counter = LineCounter::new(line, DEFAULT_HISTORY_LEN);
        let ys: Vec<f32> = (0..20).map(|i| 100.0 + 5.0 * i as f32).collect();

        let crossings = feed(&mut counter, 3, &ys);

        let downs = crossings.iter().filter(|c| **c == Some(Crossing::Down)).count();
        assert_eq!(downs, 1);
        assert_eq!(counter.counts(), Counts { entered: 1, exited: 0 });
    }

    #[test]
    fn test_counted_track_is_never_recounted() {
        let mut counter = LineCounter::new(line(), DEFAULT_HISTORY_LEN);
        // Up through the line, then back down, then up again.
        let mut ys: Vec<f32> = (0..15).map(|i| 160.0 - 5.0 * i as f32).collect();
        ys.extend((0..40).map(|i| 90.0 + 0.5 * i as f32));
        ys.extend((0..15).map(|i| 160.0 - 5.0 * i as f32));

        let crossings = feed(&mut counter, 9, &ys);

        assert_eq!(crossings.iter().filter(|c| c.is_some()).count(), 1);
        assert_eq!(counter.counts(), Counts { entered: 0, exited: 1 });
    }

    #[test]
    fn test_first_observation_never_counts() {
        let mut counter = LineCounter::new(line(), DEFAULT_HISTORY_LEN);
        assert_eq!(counter.observe(1, (10.0, 10.0), 0), None);
        assert_eq!(counter.observe(2, (10.0, 270.0), 0), None);
        assert_eq!(counter.counts(), Counts::default());
        assert_eq!(counter.len(), 2);
    }

    #[test]
    fn test_stationary_object_is_not_counted() {
        let mut counter = LineCounter::new(line(), DEFAULT_HISTORY_LEN);
        let crossings = feed(&mut counter, 1, &[100.0; 10]);
        assert!(crossings.iter().all(Option::is_none));
    }

    #[test]
    fn test_update_reports_events_per_identity() {
        let mut counter = LineCounter::new(line(), DEFAULT_HISTORY_LEN);
        let bbox = crate::bbox::Bbox::new(0.0, 0.0, 1.0, 1.0, 1.0, 0);
        let object = |id, y| TrackedObject {
            id,
            centroid: (50.0, y),
            bbox,
        };

        counter.update(&[object(1, 130.0), object(2, 130.0)], 0);
        let events = counter.update(&[object(1, 110.0), object(2, 135.0)], 1);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, 1);
        assert_eq!(events[0].crossing, Crossing::Up);
        assert_eq!(events[0].frame, 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut counter = LineCounter::new(line(), 4);
        feed(&mut counter, 1, &[200.0; 10]);
        assert_eq!(counter.object(1).unwrap().centroids.len(), 4);
    }

    #[test]
    fn test_prune_forgets_idle_objects() {
        let mut counter = LineCounter::new(line(), DEFAULT_HISTORY_LEN);
        counter.observe(1, (0.0, 0.0), 0);
        counter.observe(2, (0.0, 0.0), 50);

        assert_eq!(counter.prune(60, 40), 1);
        assert!(counter.object(1).is_none());
        assert!(counter.object(2).is_some());
    }

    #[test]
    fn test_inside_saturates() {
        let counts = Counts {
            entered: 2,
            exited: 5,
        };
        assert_eq!(counts.inside(), 0);
    }
}
