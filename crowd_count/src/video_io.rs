//! Frame input and output through gstreamer `appsink`/`appsrc` pipelines.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    File(PathBuf),
    /// Video4Linux device path.
    Camera(String),
    Image(PathBuf),
}

impl InputSource {
    /// Parses `camera`, `camera:N`, `/dev/videoN` or a file path.
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        if input == "camera" || input == "webcam" {
            return Ok(Self::Camera("/dev/video0".to_string()));
        }
        if let Some(index) = input.strip_prefix("camera:") {
            let index: u32 = index
                .parse()
                .with_context(|| format!("Invalid camera index {index:?}"))?;
            return Ok(Self::Camera(format!("/dev/video{index}")));
        }
        if input.starts_with("/dev/video") {
            return Ok(Self::Camera(input.to_string()));
        }

        let path = PathBuf::from(input);
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("mp4" | "mkv" | "avi" | "mov" | "webm") => Ok(Self::File(path)),
            Some("jpeg" | "jpg" | "png") => Ok(Self::Image(path)),
            Some(unk) => anyhow::bail!("Unhandled file extension: {unk}"),
            None => anyhow::bail!("Input path does not have a valid file extension: {path:?}"),
        }
    }

    /// Base path for outputs written next to the input.
    pub fn output_base(&self) -> PathBuf {
        match self {
            Self::File(path) | Self::Image(path) => path.clone(),
            Self::Camera(device) => {
                let name = Path::new(device)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "camera".to_string());
                PathBuf::from(format!("{name}.stream"))
            }
        }
    }

    fn pipeline_description(&self, width: u32, height: u32) -> anyhow::Result<String> {
        let scale = format!(
            "videoconvert ! videoscale ! video/x-raw,format=RGB,width={width},height={height}"
        );
        match self {
            Self::File(path) => {
                let location = path
                    .to_str()
                    .with_context(|| format!("Non UTF-8 input path {path:?}"))?;
                Ok(format!(
                    "filesrc location=\"{location}\" ! decodebin ! {scale} ! \
                     appsink name=sink max-buffers=4 sync=false"
                ))
            }
            Self::Camera(device) => Ok(format!(
                "v4l2src device=\"{device}\" ! {scale} ! \
                 appsink name=sink max-buffers=1 drop=true sync=false"
            )),
            Self::Image(path) => anyhow::bail!("{path:?} is a still image, not a stream"),
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) | Self::Image(path) => write!(f, "{}", path.display()),
            Self::Camera(device) => write!(f, "camera {device}"),
        }
    }
}

/// Bytes per row gstreamer uses for packed RGB, rows aligned to 4 bytes.
fn rgb_stride(width: u32) -> usize {
    (width as usize * 3 + 3) & !3
}

/// Copies tightly packed RGB rows out of a possibly row-aligned buffer.
pub fn strip_row_padding(data: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
    let row = width as usize * 3;
    let rows = height as usize;
    if data.len() == row * rows {
        return Some(data.to_vec());
    }
    let stride = rgb_stride(width);
    if data.len() < stride * rows {
        return None;
    }
    let mut packed = Vec::with_capacity(row * rows);
    for chunk in data.chunks(stride).take(rows) {
        packed.extend_from_slice(&chunk[..row]);
    }
    Some(packed)
}

/// Inverse of [strip_row_padding], for buffers handed to gstreamer.
pub fn add_row_padding(data: &[u8], width: u32) -> Vec<u8> {
    let row = width as usize * 3;
    let stride = rgb_stride(width);
    if row == stride || row == 0 {
        return data.to_vec();
    }
    let mut padded = Vec::with_capacity(data.len() / row * stride);
    for chunk in data.chunks(row) {
        padded.extend_from_slice(chunk);
        padded.resize(padded.len() + stride - chunk.len(), 0);
    }
    padded
}

/// A decoded frame at processing size.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Index in the source stream, starting at 0.
    pub number: u64,
    pub timestamp_ms: u64,
    pub image: RgbImage,
}

/// Result of a single bounded wait for the next frame.
#[derive(Debug)]
pub enum ReadStatus {
    Frame(Frame),
    /// Nothing arrived within the wait, the stream may still deliver.
    Pending,
    /// The stream is over or broken.
    Ended,
}

/// Something frames can be pulled from, one at a time.
pub trait FrameReader {
    /// Waits a bounded time for the next frame.
    fn read(&mut self) -> ReadStatus;
}

/// Decodes a video file or camera into RGB frames of a fixed size.
pub struct FrameSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    width: u32,
    height: u32,
    frames_read: u64,
}

impl FrameSource {
    pub fn open(source: &InputSource, width: u32, height: u32) -> anyhow::Result<Self> {
        gst::init()?;

        let description = source.pipeline_description(width, height)?;
        log::debug!("Input pipeline: {description}");
        let pipeline = gst::parse::launch(&description)
            .context("Failed to build input pipeline")?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow::anyhow!("Input description is not a pipeline"))?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.dynamic_cast::<gst_app::AppSink>().ok())
            .context("Failed to get appsink")?;

        pipeline
            .set_state(gst::State::Playing)
            .with_context(|| format!("Failed to start reading {source}"))?;
        log::info!("Reading {source} at {width}x{height}");

        Ok(Self {
            pipeline,
            appsink,
            width,
            height,
            frames_read: 0,
        })
    }

    /// Logs and reports a pipeline error, if one is pending on the bus.
    fn pipeline_failed(&self) -> bool {
        let Some(bus) = self.pipeline.bus() else {
            return false;
        };
        match bus.pop_filtered(&[gst::MessageType::Error]) {
            Some(msg) => {
                if let gst::MessageView::Error(err) = msg.view() {
                    let name = err.src().map(|e| e.name().to_string());
                    log::error!("Error from element {name:?}: {}", err.error());
                }
                true
            }
            None => false,
        }
    }
}

impl FrameReader for FrameSource {
    fn read(&mut self) -> ReadStatus {
        let Some(sample) = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(100))
        else {
            if self.appsink.is_eos() {
                log::info!("Input reached end of stream after {} frames", self.frames_read);
                return ReadStatus::Ended;
            }
            if self.pipeline_failed() {
                return ReadStatus::Ended;
            }
            return ReadStatus::Pending;
        };

        let Some(buffer) = sample.buffer() else {
            return ReadStatus::Ended;
        };
        let timestamp_ms = buffer.pts().map(|pts| pts.mseconds()).unwrap_or_default();
        let Ok(map) = buffer.map_readable() else {
            return ReadStatus::Ended;
        };
        let Some(data) = strip_row_padding(map.as_slice(), self.width, self.height) else {
            log::warn!(
                "Frame buffer of {} bytes does not fit {}x{} RGB",
                map.as_slice().len(),
                self.width,
                self.height
            );
            return ReadStatus::Ended;
        };
        let Some(image) = RgbImage::from_vec(self.width, self.height, data) else {
            return ReadStatus::Ended;
        };

        let number = self.frames_read;
        self.frames_read += 1;
        ReadStatus::Frame(Frame {
            number,
            timestamp_ms,
            image,
        })
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to stop input pipeline: {err}");
        }
    }
}

/// Something processed frames can be handed to.
pub trait FrameWriter {
    fn write(&mut self, image: &RgbImage) -> anyhow::Result<()>;
    /// Flushes pending frames.
    fn finish(&mut self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// Live playback window.
    Display,
    /// Encode to a matroska file.
    File(PathBuf),
}

/// Pushes frames into a display or encoder pipeline.
pub struct FrameSink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    target: SinkTarget,
    width: u32,
    height: u32,
    fps: u32,
    frames_written: u64,
}

impl FrameSink {
    pub fn open(target: SinkTarget, width: u32, height: u32, fps: u32) -> anyhow::Result<Self> {
        gst::init()?;

        let fps = fps.max(1);
        let caps = format!("video/x-raw,format=RGB,width={width},height={height},framerate={fps}/1");
        let description = match &target {
            SinkTarget::Display => format!(
                "appsrc name=src is-live=true format=time caps={caps} ! \
                 videoconvert ! autovideosink sync=false"
            ),
            SinkTarget::File(path) => {
                let location = path
                    .to_str()
                    .with_context(|| format!("Non UTF-8 output path {path:?}"))?;
                format!(
                    "appsrc name=src format=time caps={caps} ! videoconvert ! \
                     x264enc speed-preset=ultrafast tune=zerolatency ! \
                     matroskamux ! filesink location=\"{location}\""
                )
            }
        };
        log::debug!("Output pipeline: {description}");

        let pipeline = gst::parse::launch(&description)
            .context("Failed to build output pipeline")?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow::anyhow!("Output description is not a pipeline"))?;
        let appsrc = pipeline
            .by_name("src")
            .and_then(|e| e.dynamic_cast::<gst_app::AppSrc>().ok())
            .context("Failed to get appsrc")?;
        pipeline
            .set_state(gst::State::Playing)
            .context("Failed to start output pipeline")?;

        if let SinkTarget::File(path) = &target {
            log::info!("Writing annotated video to {path:?}");
        }
        Ok(Self {
            pipeline,
            appsrc,
            target,
            width,
            height,
            fps,
            frames_written: 0,
        })
    }
}

impl FrameWriter for FrameSink {
    fn write(&mut self, image: &RgbImage) -> anyhow::Result<()> {
        anyhow::ensure!(
            image.dimensions() == (self.width, self.height),
            "Frame is {:?}, sink expects {}x{}",
            image.dimensions(),
            self.width,
            self.height
        );
        let frame_ns = 1_000_000_000 / self.fps as u64;
        let mut buffer = gst::Buffer::from_mut_slice(add_row_padding(image.as_raw(), self.width));
        {
            let buffer = buffer
                .get_mut()
                .context("Freshly created buffer is not writable")?;
            buffer.set_pts(Some(gst::ClockTime::from_nseconds(
                self.frames_written * frame_ns,
            )));
            buffer.set_duration(Some(gst::ClockTime::from_nseconds(frame_ns)));
        }
        self.appsrc.push_buffer(buffer)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.appsrc.end_of_stream()?;
        if let Some(bus) = self.pipeline.bus() {
            for msg in bus.iter_timed(gst::ClockTime::from_seconds(10)) {
                match msg.view() {
                    gst::MessageView::Eos(..) => break,
                    gst::MessageView::Error(err) => {
                        anyhow::bail!("Output pipeline failed: {}", err.error());
                    }
                    _ => (),
                }
            }
        }
        self.pipeline.set_state(gst::State::Null)?;
        log::debug!("Output {:?} closed after {} frames", self.target, self.frames_written);
        Ok(())
    }
}

impl Drop for FrameSink {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
