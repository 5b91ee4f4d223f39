//! Stream frame source.
//!
//! `StreamSource` picks a backend from the locator's URL scheme:
//! - `stub://name[?fail_after=N]`: synthetic gradient frames, for tests and dry runs
//! - `http://`, `https://`: MJPEG or JPEG snapshots (feature: ingest-http)
//! - anything else (`rtsp://`, `file://`, a bare file path): GStreamer decode
//!   (feature: rtsp-gstreamer)

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::time::Duration;
use url::Url;

use super::FrameSource;
use crate::frame::Frame;
#[cfg(feature = "ingest-http")]
use crate::ingest::http::HttpSource;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a stream source.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Stream locator (e.g., "rtsp://192.168.1.100:554/stream").
    pub url: String,
    /// Frame width for synthetic frames.
    pub width: u32,
    /// Frame height for synthetic frames.
    pub height: u32,
    /// Longest wait for a single frame before the read counts as failed.
    pub read_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            width: 640,
            height: 480,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Stream frame source.
pub struct StreamSource {
    backend: StreamBackend,
}

enum StreamBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-http")]
    Http(HttpSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerSource),
}

impl StreamSource {
    pub fn new(config: StreamConfig) -> Result<Self> {
        let url = config.url.trim();
        if url.is_empty() {
            return Err(anyhow!("stream locator must not be empty"));
        }
        if url.starts_with("stub://") {
            return Ok(Self {
                backend: StreamBackend::Synthetic(SyntheticSource::new(config)?),
            });
        }
        #[cfg(feature = "ingest-http")]
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(Self {
                backend: StreamBackend::Http(HttpSource::new(config)?),
            });
        }
        #[cfg(feature = "rtsp-gstreamer")]
        {
            Ok(Self {
                backend: StreamBackend::Gstreamer(GstreamerSource::new(config)?),
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            Err(anyhow!(
                "stream '{}' requires the rtsp-gstreamer feature",
                config.url
            ))
        }
    }
}

impl FrameSource for StreamSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            StreamBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-http")]
            StreamBackend::Http(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            StreamBackend::Gstreamer(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            StreamBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-http")]
            StreamBackend::Http(source) => source.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            StreamBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    fn disconnect(&mut self) {
        match &mut self.backend {
            StreamBackend::Synthetic(source) => source.disconnect(),
            #[cfg(feature = "ingest-http")]
            StreamBackend::Http(source) => source.disconnect(),
            #[cfg(feature = "rtsp-gstreamer")]
            StreamBackend::Gstreamer(source) => source.disconnect(),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            StreamBackend::Synthetic(source) => format!("{} (synthetic)", source.config.url),
            #[cfg(feature = "ingest-http")]
            StreamBackend::Http(source) => source.describe(),
            #[cfg(feature = "rtsp-gstreamer")]
            StreamBackend::Gstreamer(source) => source.config.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticSource {
    config: StreamConfig,
    /// Reads per connection before every further read fails.
    fail_after: Option<u64>,
    connected: bool,
    frame_count: u64,
}

impl SyntheticSource {
    fn new(config: StreamConfig) -> Result<Self> {
        let url = url::Url::parse(&config.url)
            .with_context(|| format!("parse stream url {}", config.url))?;
        let mut fail_after = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "fail_after" => {
                    fail_after = Some(value.parse::<u64>().map_err(|_| {
                        anyhow!("stub fail_after must be an integer, got '{}'", value)
                    })?);
                }
                other => return Err(anyhow!("unknown stub option '{}'", other)),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        Ok(Self {
            config,
            fail_after,
            connected: false,
            frame_count: 0,
        })
    }

    /// Synthetic sources are always reachable.
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        self.frame_count = 0;
        log::info!("StreamSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected"));
        }
        if self.fail_after.is_some_and(|limit| self.frame_count >= limit) {
            return Err(anyhow!("synthetic stream stalled"));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Moving diagonal gradient, so consecutive frames differ.
    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = self.config.width as usize * self.config.height as usize * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        pixels
    }
}

// ----------------------------------------------------------------------------
// Production source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerSource {
    config: StreamConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_error: Option<String>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerSource {
    /// Build `uridecodebin ! videoconvert ! appsink` with RGB output.
    fn new(config: StreamConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let uri = gst_uri(&config.url)?;
        let pipeline_description = format!(
            "uridecodebin uri={} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            uri
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build stream pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("stream pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            last_error: None,
        })
    }

    fn connect(&mut self) -> Result<()> {
        self.last_error = None;
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set stream pipeline to Playing")?;
        // Wait for the state change so an unreachable stream fails here.
        let (result, _, _) = self
            .pipeline
            .state(gstreamer::ClockTime::from_mseconds(
                self.config.read_timeout.as_millis() as u64,
            ));
        result.context("stream pipeline failed to start")?;
        self.poll_bus();
        if let Some(err) = &self.last_error {
            return Err(anyhow!("{}", err));
        }
        log::info!("StreamSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.poll_bus();
        if let Some(err) = &self.last_error {
            return Err(anyhow!("{}", err));
        }

        let timeout = gstreamer::ClockTime::from_mseconds(
            self.config.read_timeout.as_millis() as u64,
        );
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow!("stream stalled"))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        Frame::new(pixels, width, height, self.frame_count)
    }

    fn disconnect(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::debug!("stream pipeline release failed: {}", err);
        }
        self.frame_count = 0;
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("stream sample missing buffer")?;
    let caps = sample.caps().context("stream sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse stream caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map stream buffer")?;
    let pixels = copy_rows(map.as_slice(), stride, row_bytes, height as usize)?;
    Ok((pixels, width, height))
}

/// `uridecodebin` only takes URIs; a bare path becomes an absolute `file://` URI.
#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
fn gst_uri(locator: &str) -> Result<String> {
    let locator = locator.trim();
    if let Ok(url) = Url::parse(locator) {
        // One-letter schemes are Windows drive letters, not URIs.
        if url.scheme().len() > 1 {
            return Ok(url.to_string());
        }
    }
    let path = Path::new(locator)
        .canonicalize()
        .with_context(|| format!("stream file '{}' not found", locator))?;
    Url::from_file_path(&path)
        .map(|url| url.to_string())
        .map_err(|_| anyhow!("stream path '{}' cannot be expressed as a URI", path.display()))
}

/// Copy `height` rows of `row_bytes` each out of a buffer whose rows are `stride` apart.
#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
fn copy_rows(data: &[u8], stride: usize, row_bytes: usize, height: usize) -> Result<Vec<u8>> {
    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height)
            .context("stream buffer is shorter than the frame")?;
        return Ok(packed.to_vec());
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("stream buffer row is out of bounds")?,
        );
    }
    Ok(pixels)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
