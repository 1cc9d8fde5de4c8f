use std::path::Path;

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, frame, media, software::scaling};
use image::RgbImage;
use tempfile::NamedTempFile;
use tracing::info;

use crate::application::ports::FrameSource;

/// Sequential decoder over a video file. Frames come out one at a time in
/// RGB at the source resolution; there is no seeking and no frame skipping.
/// Dropping this releases the decoder, the scaler and (for uploads) the
/// temporary file, whichever way the read loop exited.
pub struct VideoFileSource {
    ictx: format::context::Input,
    decoder: codec::decoder::Video,
    scaler: scaling::Context,
    stream_index: usize,
    eof_sent: bool,
    frames: u64,
    // Held only so the uploaded bytes outlive the decoder.
    _upload: Option<NamedTempFile>,
}

// SAFETY: the scaler's raw SwsContext is only touched through `&mut self`,
// so the source can move to the worker thread but is never shared.
unsafe impl Send for VideoFileSource {}

impl VideoFileSource {
    /// Opens a video persisted from an upload; the temp file is deleted when
    /// the source is dropped.
    pub fn from_upload(file: NamedTempFile) -> Result<Self> {
        let mut source = Self::open(file.path())?;
        source._upload = Some(file);
        Ok(source)
    }

    pub fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("could not initialise ffmpeg")?;

        let ictx = format::input(&path).context("could not open video file")?;
        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .context("no video stream in file")?;
        let stream_index = stream.index();

        let decoder_ctx = codec::context::Context::from_parameters(stream.parameters())
            .context("could not build decoder context")?;
        let decoder = decoder_ctx.decoder().video().context("could not open video decoder")?;

        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            scaling::Flags::BILINEAR,
        )
        .context("could not create RGB scaler")?;

        info!(
            path = %path.display(),
            width = decoder.width(),
            height = decoder.height(),
            "opened video file"
        );

        Ok(Self {
            ictx,
            decoder,
            scaler,
            stream_index,
            eof_sent: false,
            frames: 0,
            _upload: None,
        })
    }

    fn take_decoded(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }

        let mut rgb = frame::Video::empty();
        self.scaler.run(&decoded, &mut rgb).context("RGB conversion failed")?;

        // Compact to a plain buffer, dropping any stride padding.
        let (w, h) = (self.decoder.width(), self.decoder.height());
        let stride = rgb.stride(0);
        let raw = rgb.data(0);
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for row in 0..h as usize {
            let start = row * stride;
            data.extend_from_slice(&raw[start..start + w as usize * 3]);
        }

        let image = RgbImage::from_raw(w, h, data).context("bad frame dimensions")?;
        self.frames += 1;
        Ok(Some(image))
    }
}

impl FrameSource for VideoFileSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        loop {
            // Drain the decoder before feeding it another packet.
            if let Some(image) = self.take_decoded()? {
                return Ok(Some(image));
            }
            if self.eof_sent {
                info!(frames = self.frames, "video stream exhausted");
                return Ok(None);
            }

            match self.ictx.packets().next() {
                Some((stream, packet)) if stream.index() == self.stream_index => {
                    self.decoder.send_packet(&packet).context("decoder rejected packet")?;
                }
                Some(_) => continue, // audio or data stream
                None => {
                    self.decoder.send_eof().context("decoder rejected EOF")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}
