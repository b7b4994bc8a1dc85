// crates/seidemann-core/src/imaging.rs

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::{Mmap, MmapMut};
use ndarray::{Array3, ArrayViewMut3};
use ndarray_npy::{write_zeroed_npy, ViewMutElement, ViewMutNpyExt, WritableElement};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::container::{FrameBlock, FrameSource, ImagingSeries, SessionBundle};
use crate::converter::{ConversionOptions, DataInterface};
use crate::error::{ConversionError, Result};

/// Frames written when a conversion runs in stub mode.
pub const STUB_FRAMES: usize = 100;

/// Shape and axis order of a raw video file. The four axes index a
/// row-major array of shape `[.., .., .., ..]` where each logical axis sits
/// at its configured position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoStructure {
    pub rows: usize,
    pub columns: usize,
    pub num_channels: usize,
    pub frame_axis: usize,
    pub num_channels_axis: usize,
    pub rows_axis: usize,
    pub columns_axis: usize,
}

impl Default for VideoStructure {
    fn default() -> Self {
        Self {
            rows: 512,
            columns: 512,
            num_channels: 1,
            frame_axis: 1,
            num_channels_axis: 0,
            rows_axis: 2,
            columns_axis: 3,
        }
    }
}

impl VideoStructure {
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.columns == 0 || self.num_channels == 0 {
            return Err(ConversionError::Config(format!(
                "video dimensions must be positive, got {} rows x {} columns x {} channels",
                self.rows, self.columns, self.num_channels
            )));
        }
        let mut axes = [
            self.frame_axis,
            self.num_channels_axis,
            self.rows_axis,
            self.columns_axis,
        ];
        axes.sort_unstable();
        if axes != [0, 1, 2, 3] {
            return Err(ConversionError::Config(format!(
                "video axes (frame {}, channel {}, rows {}, columns {}) are not a permutation of 0..4",
                self.frame_axis, self.num_channels_axis, self.rows_axis, self.columns_axis
            )));
        }
        Ok(())
    }

    /// Samples in one frame across all channels.
    pub fn frame_len(&self) -> usize {
        self.rows * self.columns * self.num_channels
    }

    /// Element strides for (frame, channel, row, column).
    fn strides(&self, num_frames: usize) -> [usize; 4] {
        let mut shape = [0usize; 4];
        shape[self.frame_axis] = num_frames;
        shape[self.num_channels_axis] = self.num_channels;
        shape[self.rows_axis] = self.rows;
        shape[self.columns_axis] = self.columns;

        let mut by_position = [1usize; 4];
        for position in (0..3).rev() {
            by_position[position] = by_position[position + 1] * shape[position + 1];
        }
        [
            by_position[self.frame_axis],
            by_position[self.num_channels_axis],
            by_position[self.rows_axis],
            by_position[self.columns_axis],
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawDtype {
    Uint8,
    #[default]
    Uint16,
    Int16,
    Uint32,
    Float32,
    Float64,
}

impl RawDtype {
    pub fn item_size(&self) -> usize {
        match self {
            RawDtype::Uint8 => 1,
            RawDtype::Uint16 | RawDtype::Int16 => 2,
            RawDtype::Uint32 | RawDtype::Float32 => 4,
            RawDtype::Float64 => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RawDtype::Uint8 => "uint8",
            RawDtype::Uint16 => "uint16",
            RawDtype::Int16 => "int16",
            RawDtype::Uint32 => "uint32",
            RawDtype::Float32 => "float32",
            RawDtype::Float64 => "float64",
        }
    }
}

/// Little-endian raw frames mapped read-only for the interface's lifetime.
#[derive(Debug)]
pub struct MemmapImaging {
    path: PathBuf,
    mmap: Mmap,
    structure: VideoStructure,
    dtype: RawDtype,
    offset: usize,
    sampling_frequency: f64,
    num_frames: usize,
    strides: [usize; 4],
}

impl MemmapImaging {
    pub fn open(
        path: &Path,
        structure: VideoStructure,
        dtype: RawDtype,
        offset: usize,
        sampling_frequency: f64,
    ) -> Result<Self> {
        structure.validate()?;
        if !(sampling_frequency.is_finite() && sampling_frequency > 0.0) {
            return Err(ConversionError::Config(format!(
                "sampling frequency must be positive, got {sampling_frequency}"
            )));
        }

        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len <= offset {
            return Err(ConversionError::Shape(format!(
                "{} holds {len} bytes, nothing after offset {offset}",
                path.display()
            )));
        }

        let frame_bytes = structure.frame_len() * dtype.item_size();
        let payload = len - offset;
        if payload % frame_bytes != 0 {
            return Err(ConversionError::Shape(format!(
                "{} has {} bytes after offset, not a multiple of the {frame_bytes}-byte frame",
                path.display(),
                payload
            )));
        }
        let num_frames = payload / frame_bytes;

        let mmap = unsafe { Mmap::map(&file)? };
        info!(
            path = %path.display(),
            frames = num_frames,
            dtype = dtype.as_str(),
            "raw video mapped"
        );

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            structure,
            dtype,
            offset,
            sampling_frequency,
            num_frames,
            strides: structure.strides(num_frames),
        })
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn image_size(&self) -> (usize, usize) {
        (self.structure.rows, self.structure.columns)
    }

    pub fn num_channels(&self) -> usize {
        self.structure.num_channels
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn dtype(&self) -> RawDtype {
        self.dtype
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames `start..end` of one channel as `(frames, rows, columns)`.
    pub fn get_frames(&self, start: usize, end: usize, channel: usize) -> Result<Array3<f64>> {
        self.check_range(start, end, channel)?;
        let shape = (end - start, self.structure.rows, self.structure.columns);
        let array = match self.dtype {
            RawDtype::Uint8 => self.collect(start, shape, channel, |b| b[0] as f64),
            RawDtype::Uint16 => {
                self.collect(start, shape, channel, |b| u16::from_le_bytes([b[0], b[1]]) as f64)
            }
            RawDtype::Int16 => {
                self.collect(start, shape, channel, |b| i16::from_le_bytes([b[0], b[1]]) as f64)
            }
            RawDtype::Uint32 => self.collect(start, shape, channel, |b| {
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64
            }),
            RawDtype::Float32 => self.collect(start, shape, channel, |b| {
                f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64
            }),
            RawDtype::Float64 => self.collect(start, shape, channel, |b| {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }),
        };
        Ok(array)
    }

    /// Leading frames of one channel in the file's own dtype.
    pub fn frame_block(&self, channel: usize, limit: Option<usize>) -> Result<FrameBlock> {
        let end = limit.map_or(self.num_frames, |limit| limit.min(self.num_frames));
        self.check_range(0, end, channel)?;
        let shape = (end, self.structure.rows, self.structure.columns);
        let block = match self.dtype {
            RawDtype::Uint8 => FrameBlock::U8(self.collect(0, shape, channel, |b| b[0])),
            RawDtype::Uint16 => FrameBlock::U16(
                self.collect(0, shape, channel, |b| u16::from_le_bytes([b[0], b[1]])),
            ),
            RawDtype::Int16 => FrameBlock::I16(
                self.collect(0, shape, channel, |b| i16::from_le_bytes([b[0], b[1]])),
            ),
            RawDtype::Uint32 => FrameBlock::U32(self.collect(0, shape, channel, |b| {
                u32::from_le_bytes([b[0], b[1], b[2], b[3]])
            })),
            RawDtype::Float32 => FrameBlock::F32(self.collect(0, shape, channel, |b| {
                f32::from_le_bytes([b[0], b[1], b[2], b[3]])
            })),
            RawDtype::Float64 => FrameBlock::F64(self.collect(0, shape, channel, |b| {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            })),
        };
        Ok(block)
    }

    fn check_range(&self, start: usize, end: usize, channel: usize) -> Result<()> {
        if start > end || end > self.num_frames {
            return Err(ConversionError::Shape(format!(
                "frame range {start}..{end} outside 0..{}",
                self.num_frames
            )));
        }
        if channel >= self.structure.num_channels {
            return Err(ConversionError::Shape(format!(
                "channel {channel} outside 0..{}",
                self.structure.num_channels
            )));
        }
        Ok(())
    }

    /// Raw bytes of one sample.
    fn sample(&self, frame: usize, channel: usize, row: usize, column: usize) -> &[u8] {
        let [frame_stride, channel_stride, row_stride, column_stride] = self.strides;
        let item = self.dtype.item_size();
        let element =
            frame * frame_stride + channel * channel_stride + row * row_stride + column * column_stride;
        let at = self.offset + element * item;
        &self.mmap[at..at + item]
    }

    fn collect<T, F>(
        &self,
        start: usize,
        shape: (usize, usize, usize),
        channel: usize,
        decode: F,
    ) -> Array3<T>
    where
        F: Fn(&[u8]) -> T,
    {
        Array3::from_shape_fn(shape, |(frame, row, column)| {
            decode(self.sample(start + frame, channel, row, column))
        })
    }
}

/// Leading frames of one channel, written to `.npy` without holding them in
/// memory: a zeroed scratch `.npy` is mapped writable, filled frame by frame
/// from the source map, then copied into the output.
#[derive(Debug, Clone)]
pub struct MappedFrames {
    imaging: Arc<MemmapImaging>,
    channel: usize,
    frames: usize,
}

impl MappedFrames {
    pub fn new(imaging: Arc<MemmapImaging>, channel: usize, limit: Option<usize>) -> Result<Self> {
        let frames = limit.map_or(imaging.num_frames(), |limit| limit.min(imaging.num_frames()));
        imaging.check_range(0, frames, channel)?;
        Ok(Self {
            imaging,
            channel,
            frames,
        })
    }

    fn stage<T, F>(&self, scratch: &File, decode: F) -> Result<()>
    where
        T: WritableElement + ViewMutElement,
        F: Fn(&[u8]) -> T,
    {
        let (rows, columns) = self.imaging.image_size();
        write_zeroed_npy::<T, _>(scratch, (self.frames, rows, columns))?;
        let mut map = unsafe { MmapMut::map_mut(scratch)? };
        {
            let mut view = ArrayViewMut3::<T>::view_mut_npy(&mut map)?;
            for ((frame, row, column), value) in view.indexed_iter_mut() {
                *value = decode(self.imaging.sample(frame, self.channel, row, column));
            }
        }
        map.flush()?;
        Ok(())
    }
}

impl FrameSource for MappedFrames {
    fn dtype(&self) -> &'static str {
        self.imaging.dtype().as_str()
    }

    fn shape(&self) -> [usize; 3] {
        let (rows, columns) = self.imaging.image_size();
        [self.frames, rows, columns]
    }

    fn write_npy(&self, writer: &mut dyn Write) -> Result<()> {
        let mut scratch = tempfile::tempfile()?;
        match self.imaging.dtype() {
            RawDtype::Uint8 => self.stage(&scratch, |b| b[0])?,
            RawDtype::Uint16 => self.stage(&scratch, |b| u16::from_le_bytes([b[0], b[1]]))?,
            RawDtype::Int16 => self.stage(&scratch, |b| i16::from_le_bytes([b[0], b[1]]))?,
            RawDtype::Uint32 => {
                self.stage(&scratch, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))?
            }
            RawDtype::Float32 => {
                self.stage(&scratch, |b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))?
            }
            RawDtype::Float64 => self.stage(&scratch, |b| {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            })?,
        }
        scratch.seek(SeekFrom::Start(0))?;
        let bytes = io::copy(&mut scratch, writer)?;
        debug!(frames = self.frames, bytes, "mapped frames copied");
        Ok(())
    }
}

pub struct ImagingInterface {
    imaging: Arc<MemmapImaging>,
    channel: usize,
}

impl ImagingInterface {
    pub const SERIES_NAME: &'static str = "TwoPhotonSeries";

    pub fn new(imaging: MemmapImaging, channel: usize) -> Result<Self> {
        if channel >= imaging.num_channels() {
            return Err(ConversionError::Config(format!(
                "imaging channel {channel} outside 0..{}",
                imaging.num_channels()
            )));
        }
        Ok(Self {
            imaging: Arc::new(imaging),
            channel,
        })
    }

    pub fn imaging(&self) -> &MemmapImaging {
        self.imaging.as_ref()
    }
}

impl DataInterface for ImagingInterface {
    fn name(&self) -> &'static str {
        "imaging"
    }

    fn source_files(&self) -> Vec<PathBuf> {
        vec![self.imaging.path().to_path_buf()]
    }

    fn metadata(&self) -> Result<Value> {
        let (rows, columns) = self.imaging.image_size();
        Ok(json!({
            "Ophys": {
                "TwoPhotonSeries": [{
                    "name": Self::SERIES_NAME,
                    "rate": self.imaging.sampling_frequency(),
                    "dimension": [rows, columns],
                    "unit": "n.a.",
                }],
                "ImagingPlane": [{
                    "imaging_rate": self.imaging.sampling_frequency(),
                }],
            }
        }))
    }

    fn add_to_bundle(&self, bundle: &mut SessionBundle, options: &ConversionOptions) -> Result<()> {
        let limit = options.stub_test.then_some(STUB_FRAMES);
        let frames = MappedFrames::new(Arc::clone(&self.imaging), self.channel, limit)?;
        info!(
            frames = frames.shape()[0],
            total = self.imaging.num_frames(),
            stub = options.stub_test,
            "imaging frames selected"
        );
        bundle.add_imaging(ImagingSeries {
            name: Self::SERIES_NAME.to_string(),
            description: "Raw two-photon imaging frames.".to_string(),
            rate: self.imaging.sampling_frequency(),
            frames: Arc::new(frames),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::ReadNpyExt;

    fn small(frame_axis: usize, num_channels_axis: usize) -> VideoStructure {
        VideoStructure {
            rows: 2,
            columns: 3,
            num_channels: 2,
            frame_axis,
            num_channels_axis,
            rows_axis: 2,
            columns_axis: 3,
        }
    }

    /// Pixel value encodes (frame, channel, row, column).
    fn pixel(frame: usize, channel: usize, row: usize, column: usize) -> u16 {
        (frame * 1000 + channel * 100 + row * 10 + column) as u16
    }

    fn write_video(dir: &Path, name: &str, channel_major: bool, frames: usize) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0xAB; 4]).unwrap();
        let (outer, inner) = if channel_major { (2, frames) } else { (frames, 2) };
        for a in 0..outer {
            for b in 0..inner {
                let (frame, channel) = if channel_major { (b, a) } else { (a, b) };
                for row in 0..2 {
                    for column in 0..3 {
                        file.write_all(&pixel(frame, channel, row, column).to_le_bytes())
                            .unwrap();
                    }
                }
            }
        }
        path
    }

    #[test]
    fn axis_order_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let channel_major = write_video(dir.path(), "cm.bin", true, 4);
        let frame_major = write_video(dir.path(), "fm.bin", false, 4);

        let a = MemmapImaging::open(&channel_major, small(1, 0), RawDtype::Uint16, 4, 30.0).unwrap();
        let b = MemmapImaging::open(&frame_major, small(0, 1), RawDtype::Uint16, 4, 30.0).unwrap();

        assert_eq!(a.num_frames(), 4);
        assert_eq!(b.num_frames(), 4);
        let frames_a = a.get_frames(1, 3, 1).unwrap();
        let frames_b = b.get_frames(1, 3, 1).unwrap();
        assert_eq!(frames_a, frames_b);
        assert_eq!(frames_a[[1, 1, 2]], pixel(2, 1, 1, 2) as f64);
    }

    #[test]
    fn frame_block_preserves_dtype_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_video(dir.path(), "v.bin", true, 5);
        let imaging = MemmapImaging::open(&path, small(1, 0), RawDtype::Uint16, 4, 30.0).unwrap();

        match imaging.frame_block(0, Some(2)).unwrap() {
            FrameBlock::U16(frames) => {
                assert_eq!(frames.dim(), (2, 2, 3));
                assert_eq!(frames[[1, 0, 1]], pixel(1, 0, 0, 1));
            }
            other => panic!("unexpected block {}", other.dtype()),
        }
        assert_eq!(imaging.frame_block(0, Some(100)).unwrap().shape(), [5, 2, 3]);
    }

    #[test]
    fn mapped_frames_match_in_memory_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_video(dir.path(), "v.bin", false, 5);
        let imaging =
            Arc::new(MemmapImaging::open(&path, small(0, 1), RawDtype::Uint16, 4, 30.0).unwrap());

        let mapped = MappedFrames::new(Arc::clone(&imaging), 1, Some(3)).unwrap();
        assert_eq!(mapped.shape(), [3, 2, 3]);
        assert_eq!(mapped.dtype(), "uint16");

        let mut bytes = Vec::new();
        mapped.write_npy(&mut bytes).unwrap();
        let frames = Array3::<u16>::read_npy(&bytes[..]).unwrap();
        match imaging.frame_block(1, Some(3)).unwrap() {
            FrameBlock::U16(expected) => assert_eq!(frames, expected),
            other => panic!("unexpected block {}", other.dtype()),
        }
        assert_eq!(frames[[2, 1, 0]], pixel(2, 1, 1, 0));

        let all = MappedFrames::new(Arc::clone(&imaging), 0, None).unwrap();
        assert_eq!(all.shape()[0], 5);
        assert!(MappedFrames::new(imaging, 2, None).is_err());
    }

    #[test]
    fn leftover_bytes_are_a_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_video(dir.path(), "v.bin", true, 2);
        let err = MemmapImaging::open(&path, small(1, 0), RawDtype::Uint16, 2, 30.0);
        assert!(matches!(err, Err(ConversionError::Shape(_))));
    }

    #[test]
    fn invalid_axes_are_rejected() {
        let mut structure = VideoStructure::default();
        assert!(structure.validate().is_ok());
        structure.rows_axis = 0;
        assert!(matches!(structure.validate(), Err(ConversionError::Config(_))));
    }

    #[test]
    fn out_of_range_requests_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_video(dir.path(), "v.bin", true, 2);
        let imaging = MemmapImaging::open(&path, small(1, 0), RawDtype::Uint16, 4, 30.0).unwrap();
        assert!(imaging.get_frames(0, 3, 0).is_err());
        assert!(imaging.get_frames(0, 1, 2).is_err());
    }
}
