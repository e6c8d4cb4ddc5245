//! Local file video source using FFmpeg.

use ffmpeg_next as ffmpeg;
use image::{DynamicImage, RgbImage};

use super::source::{VideoMetadata, VideoSource};
use crate::error::{DataError, Result};

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    metadata: VideoMetadata,
    eof_sent: bool,
    frame_count: u64,
}

fn decode_err(what: &str, err: ffmpeg::Error) -> DataError {
    DataError::DecodeFailure(format!("{}: {}", what, err))
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &str) -> Result<Self> {
        ffmpeg::init().map_err(|e| decode_err("initialize ffmpeg", e))?;
        let input = ffmpeg::format::input(&path)
            .map_err(|e| decode_err(&format!("open '{}'", path), e))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| DataError::DecodeFailure(format!("'{}' has no video track", path)))?;
        let stream_index = input_stream.index();
        let fps = f64::from(input_stream.avg_frame_rate());
        let declared_frames = input_stream.frames();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| decode_err("load video decoder parameters", e))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| decode_err("open ffmpeg video decoder", e))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| decode_err("create ffmpeg scaler", e))?;

        let duration = input.duration();
        let metadata = VideoMetadata {
            fps,
            width: decoder.width(),
            height: decoder.height(),
            frame_count: (declared_frames > 0).then_some(declared_frames as u64),
            duration_s: (duration > 0)
                .then(|| duration as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)),
        };
        log::info!(
            "FileSource: opened {} ({}x{} @ {:.2} fps, {} frames)",
            path,
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata
                .frame_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            metadata,
            eof_sent: false,
            frame_count: 0,
        })
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<DynamicImage> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .map_err(|e| decode_err("scale frame to RGB", e))?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let image = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            DataError::DecodeFailure(format!("frame {} has a short pixel buffer", self.frame_count))
        })?;
        self.frame_count += 1;
        Ok(DynamicImage::ImageRgb8(image))
    }
}

impl VideoSource for FfmpegFileSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            // Drain what the decoder already holds before feeding it more.
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.eof_sent {
                log::debug!("{}: end of stream after {} frames", self.path, self.frame_count);
                return Ok(None);
            }
            let mut fed = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .map_err(|e| decode_err("send packet to ffmpeg decoder", e))?;
                fed = true;
                break;
            }
            if !fed {
                self.decoder
                    .send_eof()
                    .map_err(|e| decode_err("flush ffmpeg decoder", e))?;
                self.eof_sent = true;
            }
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let plane = data.get(..row_bytes * height as usize).ok_or_else(|| {
            DataError::DecodeFailure("ffmpeg frame plane is truncated".to_string())
        })?;
        return Ok((plane.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).ok_or_else(|| {
            DataError::DecodeFailure("ffmpeg frame row is out of bounds".to_string())
        })?);
    }

    Ok((pixels, width, height))
}
