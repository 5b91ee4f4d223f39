//! HTTP camera frame source.
//!
//! `HttpSource` ingests frames from cameras that serve MJPEG (multipart) streams or
//! single JPEG snapshots over HTTP. JPEGs are decoded in memory to RGB.

use anyhow::{anyhow, Context, Result};
use std::io::Read;

use image::GenericImageView;

use super::stream::StreamConfig;
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// HTTP MJPEG/JPEG frame source.
pub struct HttpSource {
    config: StreamConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    frame_count: u64,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpSource {
    pub fn new(config: StreamConfig) -> Result<Self> {
        url::Url::parse(&config.url).context("parse http stream url")?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.read_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Ok(Self {
            config,
            agent,
            stream: None,
            frame_count: 0,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .context("connect to http stream")?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.frame_count = 0;
        log::info!("StreamSource: connected to {} (http)", self.config.url);
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("http source not connected; call connect() first"))?;
        let jpeg_bytes = match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg()?,
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.agent, &self.config.url)?,
        };

        let (pixels, width, height) = decode_jpeg(&jpeg_bytes)?;
        self.frame_count += 1;
        Frame::new(pixels, width, height, self.frame_count)
    }

    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    pub fn describe(&self) -> String {
        let kind = match self.stream {
            Some(HttpStream::Mjpeg(_)) => "mjpeg",
            Some(HttpStream::SingleJpeg) => "jpeg snapshot",
            None => "http",
        };
        format!("{} ({})", self.config.url, kind)
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok((rgb.into_raw(), width, height))
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_jpeg_between_multipart_headers() {
        let mut buffer = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        let jpeg_start = buffer.len();
        buffer.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        buffer.extend_from_slice(b"\r\n--frame");

        let (start, end) = find_jpeg_bounds(&buffer).unwrap();
        assert_eq!(start, jpeg_start);
        assert_eq!(&buffer[start..end], &[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
    }

    #[test]
    fn incomplete_jpeg_is_not_returned() {
        assert!(find_jpeg_bounds(&[0xFF, 0xD8, 1, 2]).is_none());
        assert!(find_jpeg_bounds(&[1, 2, 3]).is_none());
    }
}
