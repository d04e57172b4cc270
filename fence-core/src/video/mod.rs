//! FFmpeg bridge.
//!
//! Decode side: [`VideoReader`] opens a video file and yields RGB24 frames
//! strictly in decode order until exhaustion.  Encode side: [`VideoWriter`]
//! and [`save_to_video`] turn an annotated frame sequence back into an MP4
//! (MPEG-4 codec) at a fixed frame rate.  Decode and encode are deliberately
//! separate: the pipeline collects all annotated frames first and the writer
//! consumes the finished sequence.

use anyhow::{bail, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{
    codec, decoder, encoder, format, frame, media, software::scaling, util::rational::Rational,
};
use std::path::Path;
use tracing::{debug, info};

/// Output pixel format for the encoder (YUV420p is universally compatible).
const ENCODE_FORMAT: format::Pixel = format::Pixel::YUV420P;
/// Scaling flags; bilinear is fast and good enough for pixel-format shuffles.
const SCALE_FLAGS: scaling::Flags = scaling::Flags::BILINEAR;
/// Encoder bit rate; the output is a short annotated demo clip.
const ENCODE_BIT_RATE: usize = 4_000_000;

/// Default output frame rate.  Fixed rather than derived from the source,
/// an accepted simplification.
pub const DEFAULT_FPS: u32 = 30;

/// A single decoded video frame in RGB24 format, along with its presentation
/// timestamp (in the source stream's time-base units).
pub struct RgbFrame {
    pub data: Vec<u8>, // packed RGB24, row-major
    pub width: u32,
    pub height: u32,
    pub pts: i64,
}

// ── Decode ───────────────────────────────────────────────────────────────────

/// Sequential decoder for the video stream of one input file.  No seeking,
/// no skipping: frames come out exactly in decode order.
pub struct VideoReader {
    ictx: format::context::Input,
    decoder: decoder::Video,
    to_rgb: scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    decoded: frame::Video,
    rgb: frame::Video,
    eof_sent: bool,
    frame_count: u64,
}

impl VideoReader {
    /// Open `path` and prepare the decoder for its best video stream.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ffmpeg::init().context("failed to initialise FFmpeg")?;

        let ictx = format::input(&path).context("could not open input file")?;

        let stream_index = ictx
            .streams()
            .best(media::Type::Video)
            .context("no video stream found in input")?
            .index();

        let stream = ictx.stream(stream_index).unwrap();
        let decoder_ctx = codec::context::Context::from_parameters(stream.parameters())
            .context("failed to build decoder context")?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .context("failed to open video decoder")?;

        let width = decoder.width();
        let height = decoder.height();
        let src_pixel_fmt = decoder.format();

        info!(width, height, ?src_pixel_fmt, "opened input video stream");

        let to_rgb = scaling::Context::get(
            src_pixel_fmt,
            width,
            height,
            format::Pixel::RGB24,
            width,
            height,
            SCALE_FLAGS,
        )
        .context("failed to create to-RGB scaler")?;

        Ok(Self {
            ictx,
            decoder,
            to_rgb,
            stream_index,
            width,
            height,
            decoded: frame::Video::empty(),
            rgb: frame::Video::empty(),
            eof_sent: false,
            frame_count: 0,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Decode and return the next frame, or `None` once the stream is
    /// exhausted and the decoder fully drained.
    pub fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                return Ok(Some(self.compact_rgb()?));
            }
            if self.eof_sent {
                return Ok(None);
            }

            // Feed the decoder one video packet; non-video packets are
            // skipped (the writer produces a video-only file anyway).
            let stream_index = self.stream_index;
            let mut fed = false;
            for (stream, packet) in self.ictx.packets() {
                if stream.index() == stream_index {
                    self.decoder
                        .send_packet(&packet)
                        .context("decoder send_packet")?;
                    fed = true;
                    break;
                }
            }
            if !fed {
                self.decoder.send_eof().ok();
                self.eof_sent = true;
            }
        }
    }

    /// Convert the decoded frame to RGB24 and strip any stride padding.
    fn compact_rgb(&mut self) -> Result<RgbFrame> {
        self.to_rgb
            .run(&self.decoded, &mut self.rgb)
            .context("to-RGB scaling failed")?;

        let stride = self.rgb.stride(0);
        let raw = self.rgb.data(0);
        let row_len = self.width as usize * 3;
        let mut data = Vec::with_capacity(row_len * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * stride;
            data.extend_from_slice(&raw[start..start + row_len]);
        }

        let pts = self.decoded.pts().unwrap_or(self.frame_count as i64);
        self.frame_count += 1;
        if self.frame_count % 100 == 0 {
            debug!(frames = self.frame_count, "decoded frames");
        }

        Ok(RgbFrame {
            data,
            width: self.width,
            height: self.height,
            pts,
        })
    }
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Encoder for a fixed-resolution, fixed-frame-rate MP4 output file.
/// Resolution is set at creation and every written frame must match it.
pub struct VideoWriter {
    octx: format::context::Output,
    encoder: encoder::Video,
    to_yuv: scaling::Context,
    rgb_frame: frame::Video,
    yuv_frame: frame::Video,
    stream_index: usize,
    width: u32,
    height: u32,
    time_base: Rational,
    frame_index: i64,
}

impl VideoWriter {
    /// Open an encoder writing to `path` at the given resolution and frame
    /// rate.  The MPEG-4 video codec is used; it ships with every FFmpeg
    /// build, so no external encoder library is required.
    pub fn create<P: AsRef<Path>>(path: P, width: u32, height: u32, fps: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("output resolution {width}x{height} is not encodable");
        }
        if fps == 0 {
            bail!("frame rate must be positive");
        }

        ffmpeg::init().context("failed to initialise FFmpeg")?;

        let mut octx = format::output(&path).context("could not create output context")?;

        let global_header = octx
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);

        let encoder_codec = encoder::find(codec::Id::MPEG4)
            .context("MPEG-4 encoder not found in this FFmpeg build")?;

        let time_base = Rational::new(1, fps as i32);

        let encoder_ctx = codec::context::Context::new_with_codec(encoder_codec);
        let mut encoder_builder = encoder_ctx.encoder().video()?;
        encoder_builder.set_width(width);
        encoder_builder.set_height(height);
        encoder_builder.set_format(ENCODE_FORMAT);
        encoder_builder.set_time_base(time_base);
        encoder_builder.set_frame_rate(Some(Rational::new(fps as i32, 1)));
        encoder_builder.set_bit_rate(ENCODE_BIT_RATE);
        if global_header {
            encoder_builder.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder_builder
            .open_as(encoder_codec)
            .context("failed to open MPEG-4 encoder")?;

        let stream_index = {
            let mut stream = octx.add_stream(encoder_codec)?;
            stream.set_parameters(&encoder);
            stream.index()
        };

        octx.write_header().context("failed to write output header")?;

        let to_yuv = scaling::Context::get(
            format::Pixel::RGB24,
            width,
            height,
            ENCODE_FORMAT,
            width,
            height,
            SCALE_FLAGS,
        )
        .context("failed to create to-YUV scaler")?;

        info!(width, height, fps, "opened output video stream");

        Ok(Self {
            octx,
            encoder,
            to_yuv,
            rgb_frame: frame::Video::new(format::Pixel::RGB24, width, height),
            yuv_frame: frame::Video::empty(),
            stream_index,
            width,
            height,
            time_base,
            frame_index: 0,
        })
    }

    /// Encode one frame.  Frames whose dimensions differ from the writer's
    /// resolution are rejected rather than silently corrupting the encode.
    pub fn write(&mut self, frame: &RgbFrame) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            bail!(
                "frame {} is {}x{}, writer expects {}x{}",
                self.frame_index,
                frame.width,
                frame.height,
                self.width,
                self.height
            );
        }

        // Copy the packed rows into the output AVFrame, honouring its stride.
        let stride = self.rgb_frame.stride(0);
        let row_len = self.width as usize * 3;
        let plane = self.rgb_frame.data_mut(0);
        for row in 0..self.height as usize {
            let dst = row * stride;
            let src = row * row_len;
            plane[dst..dst + row_len].copy_from_slice(&frame.data[src..src + row_len]);
        }

        self.to_yuv
            .run(&self.rgb_frame, &mut self.yuv_frame)
            .context("to-YUV scaling failed")?;

        self.yuv_frame.set_pts(Some(self.frame_index));
        self.encoder
            .send_frame(&self.yuv_frame)
            .context("encoder send_frame")?;
        self.frame_index += 1;

        self.drain()
    }

    /// Flush the encoder and finalise the container.
    pub fn finish(mut self) -> Result<()> {
        self.encoder.send_eof().ok();
        self.drain()?;
        self.octx
            .write_trailer()
            .context("failed to write output trailer")?;
        info!(frames = self.frame_index, "encode complete");
        Ok(())
    }

    /// Drain all pending packets from the encoder and write them to the muxer.
    fn drain(&mut self) -> Result<()> {
        let mut encoded = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(self.stream_index);
            encoded.rescale_ts(
                self.time_base,
                self.octx.stream(self.stream_index).unwrap().time_base(),
            );
            encoded
                .write_interleaved(&mut self.octx)
                .context("failed to write encoded packet")?;
        }
        Ok(())
    }
}

/// Encode `frames` to `out_path` at `fps`.  The first frame's dimensions fix
/// the output resolution for the whole file.  An empty sequence is rejected
/// before any encoder resource is touched.
pub fn save_to_video<P: AsRef<Path>>(frames: &[RgbFrame], out_path: P, fps: u32) -> Result<()> {
    let first = frames
        .first()
        .context("refusing to encode an empty frame sequence")?;

    let mut writer = VideoWriter::create(&out_path, first.width, first.height, fps)?;
    for frame in frames {
        writer.write(frame)?;
    }
    writer.finish()
}

/// Return the approximate total frame count for a video file (used for
/// progress reporting).  Falls back to 0 if the count cannot be determined.
pub fn total_frames<P: AsRef<Path>>(input_path: P) -> u64 {
    ffmpeg::init().ok();
    let Ok(ictx) = format::input(&input_path) else {
        return 0;
    };
    let Some(stream) = ictx.streams().best(media::Type::Video) else {
        return 0;
    };
    // nb_frames is set by most muxers; fall back to duration × fps estimate.
    let nb = stream.frames();
    if nb > 0 {
        return nb as u64;
    }
    let dur = stream.duration(); // in stream time-base units
    let tb = stream.time_base();
    let fps = stream.avg_frame_rate();
    if dur > 0 && tb.denominator() > 0 && fps.numerator() > 0 {
        let seconds = dur as f64 * tb.numerator() as f64 / tb.denominator() as f64;
        let fps_f = fps.numerator() as f64 / fps.denominator() as f64;
        return (seconds * fps_f).round() as u64;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_rejects_empty_sequence() {
        let err = save_to_video(&[], "/tmp/should_never_exist.mp4", DEFAULT_FPS).unwrap_err();
        assert!(err.to_string().contains("empty frame sequence"));
    }

    #[test]
    fn open_failure_is_an_error_not_a_panic() {
        assert!(VideoReader::open("/definitely/not/a/video.mp4").is_err());
    }

    #[test]
    fn total_frames_is_zero_for_missing_file() {
        assert_eq!(total_frames("/definitely/not/a/video.mp4"), 0);
    }
}
