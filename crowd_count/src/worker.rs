//! The frame loop, run on its own thread and steered over a control channel.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use counting_common::frame_meta::FrameMeta;
use counting_common::frame_times::{AggregatedTimes, FrameTimes};
use counting_common::line_counter::{Counts, CrossingEvent};
use counting_common::video_meta::CountReport;

use crate::modes::FrameProcessor;
use crate::video_io::{
    FrameReader, FrameSink, FrameSource, FrameWriter, InputSource, ReadStatus, SinkTarget,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Play,
    Pause,
    Stop,
    /// Write the report as it stands now.
    Snapshot,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Started {
        source: String,
        width: u32,
        height: u32,
    },
    Frame(FrameUpdate),
    Warning(String),
    ReportSaved(PathBuf),
    Finished {
        report_path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone)]
pub struct FrameUpdate {
    pub frame_number: u64,
    pub people: usize,
    pub counts: Option<Counts>,
    /// Processed frames per second since the start of the run.
    pub fps: f64,
    pub events: Vec<CrossingEvent>,
    pub times: FrameTimes,
}

/// Loop settings that do not depend on where frames come from.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Process every n-th frame read.
    pub stride: u64,
    pub max_runtime: Duration,
    pub report_path: PathBuf,
}

/// Everything a worker needs to run on its own.
pub struct WorkerJob {
    pub source: InputSource,
    pub processor: Box<dyn FrameProcessor + Send>,
    pub width: u32,
    pub height: u32,
    pub live: bool,
    /// Encode the annotated frames to this file.
    pub save_video: Option<PathBuf>,
    pub output_fps: u32,
    pub settings: LoopSettings,
}

/// Runs `job` on a new thread. The loop ends at end of stream, on a read
/// failure, on [Control::Stop], after the run-time cap, or once the control
/// channel is disconnected.
pub fn spawn_worker(
    job: WorkerJob,
    control_rx: Receiver<Control>,
    event_tx: Sender<WorkerEvent>,
) -> JoinHandle<anyhow::Result<CountReport>> {
    thread::spawn(move || {
        let WorkerJob {
            source,
            processor,
            width,
            height,
            live,
            save_video,
            output_fps,
            settings,
        } = job;

        let mut reader = match FrameSource::open(&source, width, height) {
            Ok(reader) => reader,
            Err(err) => {
                let _ = event_tx.send(WorkerEvent::Warning(format!("{err:#}")));
                let _ = event_tx.send(WorkerEvent::Finished { report_path: None });
                return Err(err);
            }
        };

        let mut targets = Vec::new();
        if live {
            targets.push(SinkTarget::Display);
        }
        if let Some(path) = save_video {
            targets.push(SinkTarget::File(path));
        }
        let mut writers: Vec<Box<dyn FrameWriter>> = Vec::new();
        for target in targets {
            match FrameSink::open(target.clone(), width, height, output_fps) {
                Ok(sink) => writers.push(Box::new(sink)),
                Err(err) => warn(&event_tx, format!("Output {target:?} disabled: {err:#}")),
            }
        }

        let report = CountReport::new(source.to_string(), processor.mode().to_string(), width, height);
        run_loop(
            &mut reader,
            writers,
            processor,
            report,
            &settings,
            &control_rx,
            &event_tx,
        )
    })
}

fn warn(event_tx: &Sender<WorkerEvent>, message: String) {
    log::warn!("{message}");
    let _ = event_tx.send(WorkerEvent::Warning(message));
}

fn save_snapshot(report: &CountReport, elapsed: Duration, path: &Path, event_tx: &Sender<WorkerEvent>) {
    let mut snapshot = report.clone();
    snapshot.finish(elapsed.as_secs_f64());
    match snapshot.save(path) {
        Ok(()) => {
            log::info!("Report written to {path:?}");
            let _ = event_tx.send(WorkerEvent::ReportSaved(path.to_path_buf()));
        }
        Err(err) => warn(event_tx, format!("Could not write report: {err:#}")),
    }
}

/// How long a silent input is waited on before warning about it.
const STALL_WARNING: Duration = Duration::from_secs(10);

enum Flow {
    Continue,
    Stop,
}

/// Frame loop proper, independent of gstreamer.
pub fn run_loop<R: FrameReader + ?Sized>(
    reader: &mut R,
    mut writers: Vec<Box<dyn FrameWriter>>,
    mut processor: Box<dyn FrameProcessor + Send>,
    mut report: CountReport,
    settings: &LoopSettings,
    control_rx: &Receiver<Control>,
    event_tx: &Sender<WorkerEvent>,
) -> anyhow::Result<CountReport> {
    let _span = tracing::info_span!("worker", mode = %processor.mode()).entered();
    let stride = settings.stride.max(1);
    let mut agg_times = AggregatedTimes::default();
    let mut paused = false;
    let mut waiting_since: Option<Instant> = None;
    let start = Instant::now();

    let _ = event_tx.send(WorkerEvent::Started {
        source: report.input.clone(),
        width: report.width,
        height: report.height,
    });
    log::info!("Processing {} in {} mode", report.input, report.mode);

    let handle = |command: Control, paused: &mut bool, report: &CountReport| -> Flow {
        match command {
            Control::Play => *paused = false,
            Control::Pause => *paused = true,
            Control::Stop => {
                log::info!("Stop requested");
                return Flow::Stop;
            }
            Control::Snapshot => save_snapshot(report, start.elapsed(), &settings.report_path, event_tx),
        }
        Flow::Continue
    };

    'frames: loop {
        loop {
            match control_rx.try_recv() {
                Ok(command) => {
                    if let Flow::Stop = handle(command, &mut paused, &report) {
                        break 'frames;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::info!("Controller went away, stopping");
                    break 'frames;
                }
            }
        }
        while paused {
            match control_rx.recv() {
                Ok(command) => {
                    if let Flow::Stop = handle(command, &mut paused, &report) {
                        break 'frames;
                    }
                }
                Err(_) => break 'frames,
            }
        }

        if start.elapsed() >= settings.max_runtime {
            log::info!("Run-time cap of {:?} reached", settings.max_runtime);
            break;
        }

        let read_start = Instant::now();
        let mut frame = match reader.read() {
            ReadStatus::Frame(frame) => frame,
            ReadStatus::Pending => {
                if waiting_since.get_or_insert(read_start).elapsed() >= STALL_WARNING {
                    warn(event_tx, format!("No frames for {STALL_WARNING:?}, still waiting"));
                    waiting_since = None;
                }
                continue;
            }
            ReadStatus::Ended => break,
        };
        waiting_since = None;
        // Counted from one, so with a stride of 3 the third frame is the first kept.
        if (frame.number + 1) % stride != 0 {
            continue;
        }
        let mut times = FrameTimes {
            frame_read: read_start.elapsed(),
            ..Default::default()
        };

        let outcome = match processor.process(&mut frame.image, &mut times) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn(event_tx, format!("Frame {} failed: {err:#}", frame.number));
                continue;
            }
        };

        let write_start = Instant::now();
        let mut failed = Vec::new();
        for (i, writer) in writers.iter_mut().enumerate() {
            if let Err(err) = writer.write(&frame.image) {
                warn(event_tx, format!("Dropping output after write failure: {err:#}"));
                failed.push(i);
            }
        }
        for i in failed.into_iter().rev() {
            writers.remove(i);
        }
        times.frame_write = write_start.elapsed();

        report.push_events(&outcome.events);
        report.push_frame(FrameMeta {
            frame_number: frame.number,
            timestamp_ms: frame.timestamp_ms,
            people: outcome.people,
            bboxes: outcome.bboxes,
            counts: outcome.counts,
        });

        let elapsed = start.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            report.frames.len() as f64 / elapsed
        } else {
            0.0
        };
        log::debug!("{times:?}");
        agg_times.push(times);
        let _ = event_tx.send(WorkerEvent::Frame(FrameUpdate {
            frame_number: frame.number,
            people: outcome.people,
            counts: outcome.counts,
            fps,
            events: outcome.events,
            times,
        }));
    }

    for writer in writers.iter_mut() {
        if let Err(err) = writer.finish() {
            warn(event_tx, format!("{err:#}"));
        }
    }

    let elapsed = start.elapsed();
    report.finish(elapsed.as_secs_f64());
    log::info!(
        "Processed {} frames in {:.2} s, approx. {:.2} FPS",
        report.frames.len(),
        report.elapsed_secs,
        report.approx_fps
    );
    if let Some(counts) = report.frames.iter().rev().find_map(|f| f.counts) {
        log::info!(
            "Entered: {}, exited: {}, inside: {}",
            counts.entered,
            counts.exited,
            counts.inside()
        );
    }
    if !agg_times.is_empty() {
        log::info!("Average frame times: {:?}", agg_times.avg(true));
        log::info!("Min frame times: {:?}", agg_times.min(true));
        log::info!("Max frame times: {:?}", agg_times.max(true));
    }

    let report_path = match report.save(&settings.report_path) {
        Ok(()) => {
            log::info!("Report written to {:?}", settings.report_path);
            Some(settings.report_path.clone())
        }
        Err(err) => {
            warn(event_tx, format!("Could not write report: {err:#}"));
            None
        }
    };
    let _ = event_tx.send(WorkerEvent::Finished { report_path });

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    use counting_common::line_counter::Crossing;
    use image::RgbImage;

    use super::*;
    use crate::modes::{FrameOutcome, Mode};
    use crate::video_io::Frame;

    struct FakeReader {
        frames: VecDeque<Frame>,
    }

    impl FakeReader {
        fn new(count: u64) -> Self {
            let frames = (0..count)
                .map(|number| Frame {
                    number,
                    timestamp_ms: number * 40,
                    image: RgbImage::new(8, 8),
                })
                .collect();
            Self { frames }
        }
    }

    impl FrameReader for FakeReader {
        fn read(&mut self) -> ReadStatus {
            match self.frames.pop_front() {
                Some(frame) => ReadStatus::Frame(frame),
                None => ReadStatus::Ended,
            }
        }
    }

    /// A live input that has gone quiet without ending.
    struct SilentReader;

    impl FrameReader for SilentReader {
        fn read(&mut self) -> ReadStatus {
            std::thread::sleep(Duration::from_millis(5));
            ReadStatus::Pending
        }
    }

    /// Sees one person per frame, and one crossing on the second frame.
    struct FakeProcessor {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl FrameProcessor for FakeProcessor {
        fn mode(&self) -> Mode {
            Mode::Track
        }

        fn process(&mut self, _frame: &mut RgbImage, _times: &mut FrameTimes) -> anyhow::Result<FrameOutcome> {
            let mut seen = self.seen.lock().unwrap();
            let index = seen.len() as u64;
            seen.push(index);
            let events = if seen.len() == 2 {
                vec![CrossingEvent {
                    id: 1,
                    crossing: Crossing::Down,
                    frame: 1,
                    centroid: (4.0, 6.0),
                }]
            } else {
                Vec::new()
            };
            let entered = if seen.len() >= 2 { 1 } else { 0 };
            Ok(FrameOutcome {
                people: 1,
                bboxes: Vec::new(),
                counts: Some(Counts { entered, exited: 0 }),
                events,
            })
        }
    }

    struct CountingWriter {
        written: Arc<Mutex<usize>>,
    }

    impl FrameWriter for CountingWriter {
        fn write(&mut self, _image: &RgbImage) -> anyhow::Result<()> {
            *self.written.lock().unwrap() += 1;
            Ok(())
        }

        fn finish(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn settings(name: &str, stride: u64) -> LoopSettings {
        LoopSettings {
            stride,
            max_runtime: Duration::from_secs(60),
            report_path: std::env::temp_dir().join(name),
        }
    }

    fn processor() -> (Box<dyn FrameProcessor + Send>, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Box::new(FakeProcessor { seen: seen.clone() }), seen)
    }

    fn report() -> CountReport {
        CountReport::new("fake", "track", 8, 8)
    }

    #[test]
    fn test_stride_and_report() {
        let settings = settings("crowd_count_worker_stride.counts.json", 3);
        let (processor, seen) = processor();
        let written = Arc::new(Mutex::new(0));
        let writer = Box::new(CountingWriter {
            written: written.clone(),
        });
        let (_control_tx, control_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let report = run_loop(
            &mut FakeReader::new(10),
            vec![writer],
            processor,
            report(),
            &settings,
            &control_rx,
            &event_tx,
        )
        .unwrap();

        // Every third frame, starting with the third.
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(*written.lock().unwrap(), 3);
        let numbers: Vec<u64> = report.frames.iter().map(|f| f.frame_number).collect();
        assert_eq!(numbers, vec![2, 5, 8]);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.totals.entered, 1);

        let events: Vec<WorkerEvent> = event_rx.try_iter().collect();
        assert!(matches!(events.first(), Some(WorkerEvent::Started { .. })));
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Finished { report_path: Some(_) })
        ));
        let saved = CountReport::load(&settings.report_path).unwrap();
        assert_eq!(saved.frames.len(), 3);
        std::fs::remove_file(&settings.report_path).ok();
    }

    #[test]
    fn test_stop_before_first_frame() {
        let settings = settings("crowd_count_worker_stop.counts.json", 1);
        let (processor, seen) = processor();
        let (control_tx, control_rx) = mpsc::channel();
        let (event_tx, _event_rx) = mpsc::channel();
        control_tx.send(Control::Stop).unwrap();

        let report = run_loop(
            &mut FakeReader::new(10),
            Vec::new(),
            processor,
            report(),
            &settings,
            &control_rx,
            &event_tx,
        )
        .unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert!(report.frames.is_empty());
        std::fs::remove_file(&settings.report_path).ok();
    }

    #[test]
    fn test_disconnected_controller_stops() {
        let settings = settings("crowd_count_worker_disconnect.counts.json", 1);
        let (processor, seen) = processor();
        let (control_tx, control_rx) = mpsc::channel::<Control>();
        let (event_tx, _event_rx) = mpsc::channel();
        drop(control_tx);

        run_loop(
            &mut FakeReader::new(10),
            Vec::new(),
            processor,
            report(),
            &settings,
            &control_rx,
            &event_tx,
        )
        .unwrap();

        assert!(seen.lock().unwrap().is_empty());
        std::fs::remove_file(&settings.report_path).ok();
    }

    #[test]
    fn test_paused_loop_resumes_on_play() {
        let settings = settings("crowd_count_worker_pause.counts.json", 1);
        let (processor, seen) = processor();
        let (control_tx, control_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        control_tx.send(Control::Pause).unwrap();
        let sender = control_tx.clone();
        let resumer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            sender.send(Control::Snapshot).unwrap();
            sender.send(Control::Play).unwrap();
        });

        let report = run_loop(
            &mut FakeReader::new(5),
            Vec::new(),
            processor,
            report(),
            &settings,
            &control_rx,
            &event_tx,
        )
        .unwrap();

        resumer.join().unwrap();
        assert_eq!(seen.lock().unwrap().len(), 5);
        assert_eq!(report.frames.len(), 5);
        let saved = event_rx
            .try_iter()
            .filter(|e| matches!(e, WorkerEvent::ReportSaved(_)))
            .count();
        assert_eq!(saved, 1);
        std::fs::remove_file(&settings.report_path).ok();
    }

    #[test]
    fn test_runtime_cap_stops_loop() {
        let mut settings = settings("crowd_count_worker_cap.counts.json", 1);
        settings.max_runtime = Duration::ZERO;
        let (processor, seen) = processor();
        let (_control_tx, control_rx) = mpsc::channel();
        let (event_tx, _event_rx) = mpsc::channel();

        run_loop(
            &mut FakeReader::new(5),
            Vec::new(),
            processor,
            report(),
            &settings,
            &control_rx,
            &event_tx,
        )
        .unwrap();

        assert!(seen.lock().unwrap().is_empty());
        std::fs::remove_file(&settings.report_path).ok();
    }

    #[test]
    fn test_stop_reaches_loop_while_input_is_silent() {
        let settings = settings("crowd_count_worker_silent_stop.counts.json", 1);
        let (processor, seen) = processor();
        let (control_tx, control_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            control_tx.send(Control::Stop).unwrap();
            // Keep the channel open so only the stop can end the loop.
            std::thread::sleep(Duration::from_millis(500));
        });

        let report = run_loop(
            &mut SilentReader,
            Vec::new(),
            processor,
            report(),
            &settings,
            &control_rx,
            &event_tx,
        )
        .unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert!(report.frames.is_empty());
        assert!(event_rx
            .try_iter()
            .any(|e| matches!(e, WorkerEvent::Finished { .. })));
        stopper.join().unwrap();
        std::fs::remove_file(&settings.report_path).ok();
    }

    #[test]
    fn test_runtime_cap_applies_while_input_is_silent() {
        let mut settings = settings("crowd_count_worker_silent_cap.counts.json", 1);
        settings.max_runtime = Duration::from_millis(50);
        let (processor, _seen) = processor();
        let (_control_tx, control_rx) = mpsc::channel();
        let (event_tx, _event_rx) = mpsc::channel();

        let start = Instant::now();
        run_loop(
            &mut SilentReader,
            Vec::new(),
            processor,
            report(),
            &settings,
            &control_rx,
            &event_tx,
        )
        .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        std::fs::remove_file(&settings.report_path).ok();
    }
}
