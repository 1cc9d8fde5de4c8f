use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use tracing::info;
use v4l::format::FourCC;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::application::ports::FrameSource;

/// Capture format requested from the default camera. The driver may adjust
/// to the nearest mode it supports.
pub struct CaptureConfig {
    pub fourcc: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { fourcc: "MJPG".into(), width: 1280, height: 720, fps: 30 }
    }
}

/// V4L2 camera capture over a memory-mapped stream.
pub struct WebcamCapture {
    // The stream borrows the device for its whole life, so the device is
    // heap-pinned via a raw pointer and reclaimed in Drop after the stream
    // is gone. This keeps the device closed on every exit path.
    stream: Option<Stream<'static>>,
    device: *mut Device,
    fourcc: FourCC,
    width: u32,
    height: u32,
}

// The raw pointer is an owning handle; Device itself is Send.
unsafe impl Send for WebcamCapture {}

impl WebcamCapture {
    /// Opens the camera device and configures format, frame interval and the
    /// MMAP stream.
    pub fn open(device_path: &str, cfg: &CaptureConfig) -> Result<Self> {
        let dev = Device::with_path(device_path)
            .with_context(|| format!("could not open camera {device_path}"))?;

        let mut fmt = dev.format()?;
        let b = cfg.fourcc.as_bytes();
        if b.len() != 4 {
            return Err(anyhow!("FourCC must be 4 characters"));
        }
        fmt.fourcc = FourCC::new(&[b[0], b[1], b[2], b[3]]);
        fmt.width = cfg.width;
        fmt.height = cfg.height;
        let actual_fmt = dev.set_format(&fmt)?;

        let mut params = dev.params()?;
        params.interval.numerator = 1;
        params.interval.denominator = cfg.fps;
        let _ = dev.set_params(&params);

        let device = Box::into_raw(Box::new(dev));
        let dev_ref: &'static Device = unsafe { &*device };
        let stream = match Stream::with_buffers(dev_ref, v4l::buffer::Type::VideoCapture, 4) {
            Ok(s) => s,
            Err(e) => {
                unsafe { drop(Box::from_raw(device)) };
                return Err(e).context("could not start capture stream");
            }
        };

        info!(
            "camera open: {}x{} [{}] at {} fps",
            actual_fmt.width, actual_fmt.height, actual_fmt.fourcc, cfg.fps
        );

        Ok(Self {
            stream: Some(stream),
            device,
            fourcc: actual_fmt.fourcc,
            width: actual_fmt.width,
            height: actual_fmt.height,
        })
    }

    fn next_rgb(&mut self) -> Result<RgbImage> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(anyhow!("capture stream already released"));
        };
        let (data, _) = stream.next()?;
        let fcc = self.fourcc.str().map_err(|_| anyhow!("invalid FourCC"))?;

        match fcc {
            "MJPG" => {
                // MJPG is a sequence of standalone JPEGs.
                let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
                Ok(img.to_rgb8())
            }
            "YUYV" => Ok(yuyv_to_rgb(data, self.width, self.height)),
            other => Err(anyhow!("camera format {other} not supported")),
        }
    }
}

impl FrameSource for WebcamCapture {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        // A camera never signals end-of-stream; read errors are hard errors.
        self.next_rgb().map(Some)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        // Stop streaming before closing the device.
        self.stream.take();
        unsafe { drop(Box::from_raw(self.device)) };
    }
}

/// YUYV (YUV 4:2:2) to RGB using the BT.601 conversion. Every 4-byte chunk
/// [Y0, U, Y1, V] yields two horizontally adjacent pixels.
fn yuyv_to_rgb(yuyv: &[u8], w: u32, h: u32) -> RgbImage {
    let mut out = RgbImage::new(w, h);

    for (i, chunk) in yuyv.chunks_exact(4).enumerate() {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;

        let to_rgb = |y: f32| {
            [
                (y + 1.402 * v).clamp(0.0, 255.0) as u8,
                (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8,
                (y + 1.772 * u).clamp(0.0, 255.0) as u8,
            ]
        };

        let pixel_idx = i as u32 * 2;
        let x = pixel_idx % w;
        let y = pixel_idx / w;

        if y < h {
            out.put_pixel(x, y, image::Rgb(to_rgb(y0)));
            if x + 1 < w {
                out.put_pixel(x + 1, y, image::Rgb(to_rgb(y1)));
            }
        }
    }
    out
}
