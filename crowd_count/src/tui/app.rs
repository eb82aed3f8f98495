use std::collections::VecDeque;
use std::path::PathBuf;

use counting_common::frame_times::FrameTimes;
use counting_common::line_counter::{Counts, Crossing, CrossingEvent};

use crate::worker::{Control, FrameUpdate, WorkerEvent};

const MAX_LOG: usize = 200;
const PEOPLE_HISTORY_SIZE: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Finished,
}

#[derive(Debug, Clone)]
pub struct PerformanceStats {
    pub inference_ms: f64,
    pub preprocess_ms: f64,
    pub postprocess_ms: f64,
    pub total_ms: f64,
}

impl From<&FrameTimes> for PerformanceStats {
    fn from(ft: &FrameTimes) -> Self {
        let ms = |d: std::time::Duration| d.as_secs_f64() * 1000.0;
        let preprocess_ms = ms(ft.frame_read + ft.resize + ft.to_tensor);
        let inference_ms = ms(ft.forward_pass);
        let postprocess_ms = ms(ft.bbox_extraction + ft.nms + ft.tracking + ft.counting + ft.annotation);
        Self {
            inference_ms,
            preprocess_ms,
            postprocess_ms,
            total_ms: ms(ft.total()),
        }
    }
}

/// Dashboard state, fed by worker events and key presses.
pub struct App {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub state: RunState,
    pub frame_number: u64,
    pub people: usize,
    pub fps: f64,
    /// Only present in track mode.
    pub counts: Option<Counts>,
    pub parameters: Vec<(&'static str, String)>,
    /// Newest entries last.
    pub log: VecDeque<String>,
    pub people_history: VecDeque<u64>,
    pub perf: Option<PerformanceStats>,
    pub report_path: Option<PathBuf>,
    should_quit: bool,
}

impl App {
    pub fn new(parameters: Vec<(&'static str, String)>) -> Self {
        Self {
            source: String::from("Loading..."),
            width: 0,
            height: 0,
            state: RunState::Running,
            frame_number: 0,
            people: 0,
            fps: 0.0,
            counts: None,
            parameters,
            log: VecDeque::with_capacity(MAX_LOG),
            people_history: VecDeque::with_capacity(PEOPLE_HISTORY_SIZE),
            perf: None,
            report_path: None,
            should_quit: false,
        }
    }

    fn push_log(&mut self, line: String) {
        self.log.push_back(line);
        if self.log.len() > MAX_LOG {
            self.log.pop_front();
        }
    }

    fn push_crossing(&mut self, event: &CrossingEvent) {
        let what = match event.crossing {
            Crossing::Up => "exited",
            Crossing::Down => "entered",
        };
        self.push_log(format!("frame {:>6}  ID {} {what}", event.frame, event.id));
    }

    fn on_frame(&mut self, update: FrameUpdate) {
        self.frame_number = update.frame_number;
        self.people = update.people;
        self.fps = update.fps;
        if update.counts.is_some() {
            self.counts = update.counts;
        }
        for event in &update.events {
            self.push_crossing(event);
        }
        self.people_history.push_back(update.people as u64);
        if self.people_history.len() > PEOPLE_HISTORY_SIZE {
            self.people_history.pop_front();
        }
        self.perf = Some(PerformanceStats::from(&update.times));
    }

    pub fn update(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Started { source, width, height } => {
                self.push_log(format!("Started {source}"));
                self.source = source;
                self.width = width;
                self.height = height;
            }
            WorkerEvent::Frame(update) => self.on_frame(update),
            WorkerEvent::Warning(message) => self.push_log(format!("warning: {message}")),
            WorkerEvent::ReportSaved(path) => {
                self.push_log(format!("Report saved to {}", path.display()));
                self.report_path = Some(path);
            }
            WorkerEvent::Finished { report_path } => {
                self.state = RunState::Finished;
                match &report_path {
                    Some(path) => self.push_log(format!("Finished, report at {}", path.display())),
                    None => self.push_log("Finished".to_string()),
                }
                if report_path.is_some() {
                    self.report_path = report_path;
                }
            }
        }
    }

    /// Flips between running and paused, returning the command for the worker.
    pub fn toggle_pause(&mut self) -> Option<Control> {
        match self.state {
            RunState::Running => {
                self.state = RunState::Paused;
                Some(Control::Pause)
            }
            RunState::Paused => {
                self.state = RunState::Running;
                Some(Control::Play)
            }
            RunState::Finished => None,
        }
    }

    pub fn stop(&mut self) -> Option<Control> {
        (self.state != RunState::Finished).then_some(Control::Stop)
    }

    pub fn snapshot(&mut self) -> Option<Control> {
        (self.state != RunState::Finished).then_some(Control::Snapshot)
    }

    pub fn quit(&mut self) -> Option<Control> {
        self.should_quit = true;
        self.stop()
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Largest people count in the sparkline window.
    pub fn peak_people(&self) -> u64 {
        self.people_history.iter().copied().max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(number: u64, people: usize, events: Vec<CrossingEvent>) -> WorkerEvent {
        WorkerEvent::Frame(FrameUpdate {
            frame_number: number,
            people,
            counts: Some(Counts {
                entered: events.len() as u64,
                exited: 0,
            }),
            fps: 12.5,
            events,
            times: FrameTimes::default(),
        })
    }

    #[test]
    fn test_frames_update_counts_and_log() {
        let mut app = App::new(Vec::new());
        app.update(WorkerEvent::Started {
            source: "door.mp4".to_string(),
            width: 500,
            height: 280,
        });
        app.update(frame(0, 2, Vec::new()));
        app.update(frame(
            3,
            3,
            vec![CrossingEvent {
                id: 5,
                crossing: Crossing::Down,
                frame: 3,
                centroid: (0.0, 150.0),
            }],
        ));

        assert_eq!(app.source, "door.mp4");
        assert_eq!(app.frame_number, 3);
        assert_eq!(app.counts.map(|c| c.entered), Some(1));
        assert_eq!(app.peak_people(), 3);
        assert!(app.log.back().unwrap().contains("ID 5 entered"));
    }

    #[test]
    fn test_pause_toggle_and_finish() {
        let mut app = App::new(Vec::new());
        assert_eq!(app.toggle_pause(), Some(Control::Pause));
        assert_eq!(app.state, RunState::Paused);
        assert_eq!(app.toggle_pause(), Some(Control::Play));

        app.update(WorkerEvent::Finished {
            report_path: Some(PathBuf::from("out.counts.json")),
        });
        assert_eq!(app.state, RunState::Finished);
        assert_eq!(app.toggle_pause(), None);
        assert_eq!(app.snapshot(), None);
        assert_eq!(app.quit(), None);
        assert!(app.should_quit());
    }

    #[test]
    fn test_quit_stops_running_worker() {
        let mut app = App::new(Vec::new());
        assert_eq!(app.quit(), Some(Control::Stop));
    }

    #[test]
    fn test_log_is_bounded() {
        let mut app = App::new(Vec::new());
        for i in 0..(MAX_LOG + 10) {
            app.update(WorkerEvent::Warning(format!("w{i}")));
        }
        assert_eq!(app.log.len(), MAX_LOG);
        assert_eq!(app.log.front().unwrap(), "warning: w10");
    }
}
