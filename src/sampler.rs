//! Frame sampling.
//!
//! Decodes an episode video sequentially with FFmpeg and keeps every Nth
//! decoded frame. Each kept frame is tagged with its decode index in the
//! original video, which is the frame index used everywhere downstream.
//! [`sample_episode`] persists the kept frames as JPEG files and
//! [`sample_dataset`] does so for every episode of a [`DatasetLayout`],
//! producing the [`EpisodeManifest`] consumed by the request encoder.

use std::fs;
use std::path::{Path, PathBuf};

use ffmpeg_next::{
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::Pixel,
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::{DynamicImage, RgbImage};

use crate::configuration::{PipelineOptions, SampleOptions};
use crate::dataset::{DatasetLayout, resolve_task};
use crate::episode::{EpisodeFrames, EpisodeManifest, FrameRecord, MANIFEST_FILE_NAME};
use crate::error::AnnotationError;
use crate::progress::{OperationType, ProgressTracker};
use crate::strip::encode_jpeg;

/// File name of a sampled frame.
pub fn frame_file_name(frame_index: u64) -> String {
    format!("frame_{frame_index:06}.jpg")
}

/// Directory name holding one episode's sampled frames.
pub fn episode_dir_name(episode_index: u64) -> String {
    format!("episode_{episode_index:06}")
}

/// Decode `path` and call `handler` for every `step`-th frame.
///
/// The handler receives the decode index (0-based position in the original
/// video) and the frame as an RGB image. Returns the number of frames
/// passed to the handler.
///
/// # Errors
///
/// Returns [`AnnotationError::InvalidInterval`] for a zero step,
/// [`AnnotationError::FileOpen`] / [`AnnotationError::NoVideoStream`] if
/// the video cannot be used, decoding errors, handler errors, or
/// [`AnnotationError::Cancelled`].
pub fn sample_video<P, F>(
    path: P,
    step: u64,
    pipeline: &PipelineOptions,
    mut handler: F,
) -> Result<u64, AnnotationError>
where
    P: AsRef<Path>,
    F: FnMut(u64, DynamicImage) -> Result<(), AnnotationError>,
{
    if step == 0 {
        return Err(AnnotationError::InvalidInterval);
    }
    let path = path.as_ref();
    log::debug!("Sampling every {step} frame(s) from {}", path.display());

    ffmpeg_next::init().map_err(|error| AnnotationError::FileOpen {
        path: path.to_path_buf(),
        reason: format!("FFmpeg initialisation failed: {error}"),
    })?;

    let mut input_context =
        ffmpeg_next::format::input(&path).map_err(|error| AnnotationError::FileOpen {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;

    let (video_stream_index, stream_frames, codec_parameters) = {
        let stream = input_context
            .streams()
            .best(Type::Video)
            .ok_or(AnnotationError::NoVideoStream)?;
        (stream.index(), stream.frames(), stream.parameters())
    };

    let decoder_context = CodecContext::from_parameters(codec_parameters)?;
    let mut decoder = decoder_context.decoder().video()?;

    let width = decoder.width();
    let height = decoder.height();
    let mut scaler = ScalingContext::get(
        decoder.format(),
        width,
        height,
        Pixel::RGB24,
        width,
        height,
        ScalingFlags::BILINEAR,
    )?;

    let expected = (stream_frames > 0).then(|| (stream_frames as u64).div_ceil(step));
    let mut tracker = ProgressTracker::new(
        pipeline.progress.clone(),
        OperationType::FrameSampling,
        expected,
        pipeline.batch_size,
    );

    let mut state = SamplerState {
        step,
        width,
        height,
        decoded: 0,
        sampled: 0,
    };

    for (stream, packet) in input_context.packets() {
        if stream.index() != video_stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        state.receive_frames(&mut decoder, &mut scaler, pipeline, &mut tracker, &mut handler)?;
    }

    decoder.send_eof()?;
    state.receive_frames(&mut decoder, &mut scaler, pipeline, &mut tracker, &mut handler)?;
    tracker.finish();

    log::debug!(
        "Decoded {} frame(s), kept {} from {}",
        state.decoded,
        state.sampled,
        path.display()
    );
    Ok(state.sampled)
}

struct SamplerState {
    step: u64,
    width: u32,
    height: u32,
    decoded: u64,
    sampled: u64,
}

impl SamplerState {
    fn receive_frames<F>(
        &mut self,
        decoder: &mut VideoDecoder,
        scaler: &mut ScalingContext,
        pipeline: &PipelineOptions,
        tracker: &mut ProgressTracker,
        handler: &mut F,
    ) -> Result<(), AnnotationError>
    where
        F: FnMut(u64, DynamicImage) -> Result<(), AnnotationError>,
    {
        let mut decoded_frame = VideoFrame::empty();
        let mut rgb_frame = VideoFrame::empty();

        while decoder.receive_frame(&mut decoded_frame).is_ok() {
            let frame_index = self.decoded;
            self.decoded += 1;
            if frame_index % self.step != 0 {
                continue;
            }
            if pipeline.is_cancelled() {
                return Err(AnnotationError::Cancelled);
            }

            scaler.run(&decoded_frame, &mut rgb_frame)?;
            let image = convert_frame_to_image(&rgb_frame, self.width, self.height)?;
            handler(frame_index, image)?;
            self.sampled += 1;
            tracker.advance(None, Some(frame_index));
        }
        Ok(())
    }
}

/// Sample one episode video into `episode_dir`.
///
/// Existing frame files are kept as they are unless
/// [`SampleOptions::overwrite`] is set, so an interrupted run can be
/// resumed cheaply.
///
/// # Errors
///
/// Same as [`sample_video`], plus I/O and encoding errors.
pub fn sample_episode<P: AsRef<Path>>(
    video_path: P,
    episode_dir: &Path,
    options: &SampleOptions,
    pipeline: &PipelineOptions,
) -> Result<Vec<FrameRecord>, AnnotationError> {
    options.validate()?;
    fs::create_dir_all(episode_dir)?;

    let mut records = Vec::new();
    sample_video(video_path, options.step, pipeline, |frame_index, image| {
        let path = episode_dir.join(frame_file_name(frame_index));
        if options.overwrite || !path.exists() {
            fs::write(&path, encode_jpeg(&image, options.jpeg_quality)?)?;
        }
        records.push(FrameRecord { frame_index, path });
        Ok(())
    })?;
    Ok(records)
}

/// An episode that could not be sampled.
#[derive(Debug)]
pub struct FailedEpisode {
    /// Episode index.
    pub episode_index: u64,
    /// Video that was expected.
    pub video_path: PathBuf,
    /// Why it failed.
    pub error: AnnotationError,
}

/// Outcome of [`sample_dataset`].
#[derive(Debug)]
pub struct SampleReport {
    /// Manifest of every episode that was sampled.
    pub manifest: EpisodeManifest,
    /// Where the manifest was written.
    pub manifest_path: PathBuf,
    /// Episodes that were skipped.
    pub failed: Vec<FailedEpisode>,
}

/// Sample every episode of a dataset into `out_dir` and write the manifest.
///
/// Frames land in `out_dir/episode_{index:06}/frame_{index:06}.jpg`. An
/// episode whose video is missing or fails to decode is logged and skipped.
///
/// # Errors
///
/// Returns dataset metadata errors, I/O errors writing the manifest, or
/// [`AnnotationError::Cancelled`].
pub fn sample_dataset(
    layout: &DatasetLayout,
    out_dir: &Path,
    options: &SampleOptions,
    pipeline: &PipelineOptions,
) -> Result<SampleReport, AnnotationError> {
    options.validate()?;
    fs::create_dir_all(out_dir)?;

    let tasks = layout.tasks()?;
    let entries = layout.episodes(options.max_episodes)?;
    log::debug!("Sampling {} episode(s) from {}", entries.len(), layout.root().display());

    let mut episodes = Vec::with_capacity(entries.len());
    let mut failed = Vec::new();

    for entry in &entries {
        let video_path = layout.video_path(entry.episode_index);
        let episode_dir = out_dir.join(episode_dir_name(entry.episode_index));

        let result = if video_path.exists() {
            sample_episode(&video_path, &episode_dir, options, pipeline)
        } else {
            Err(AnnotationError::FileOpen {
                path: video_path.clone(),
                reason: "video not found".to_string(),
            })
        };

        match result {
            Ok(frames) => episodes.push(EpisodeFrames {
                episode_index: entry.episode_index,
                task_index: entry.task_index.unwrap_or(0),
                task: resolve_task(entry, &tasks),
                frames,
            }),
            Err(AnnotationError::Cancelled) => return Err(AnnotationError::Cancelled),
            Err(error) => {
                log::warn!("episode {}: {error}", entry.episode_index);
                failed.push(FailedEpisode {
                    episode_index: entry.episode_index,
                    video_path,
                    error,
                });
            }
        }
    }

    let manifest = EpisodeManifest::new(episodes);
    let manifest_path = out_dir.join(MANIFEST_FILE_NAME);
    manifest.save(&manifest_path)?;

    Ok(SampleReport {
        manifest,
        manifest_path,
        failed,
    })
}

/// Copy an RGB24 frame into a tightly packed [`DynamicImage`].
///
/// FFmpeg frames frequently carry per-row padding (stride > width × 3),
/// which is stripped here.
fn convert_frame_to_image(
    rgb_frame: &VideoFrame,
    width: u32,
    height: u32,
) -> Result<DynamicImage, AnnotationError> {
    let stride = rgb_frame.stride(0);
    let row_bytes = (width as usize) * 3;
    let data = rgb_frame.data(0);

    let buffer = if stride == row_bytes {
        data[..row_bytes * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_bytes * (height as usize));
        for row in 0..(height as usize) {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + row_bytes]);
        }
        buffer
    };

    let rgb_image = RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
        AnnotationError::VideoDecodeError(
            "Failed to construct RGB image from decoded frame data".to_string(),
        )
    })?;
    Ok(DynamicImage::ImageRgb8(rgb_image))
}
