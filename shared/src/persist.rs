/*!
Frame-sequence files.

File layout (all little-endian):

```text
u16 width
u16 height
frame 0: width*height samples, column-major
frame 1: ...
```

Samples are either raw `u16` values or `f32` degrees Celsius; the file does
not record which, so readers must know the variant they asked for.
*/

use crate::error::{Result, SharedError};
use crate::matrix::ImageMatrix;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// A sample type that can be stored in a frame-sequence file
pub trait Sample: Copy + Default {
    /// Encoded size in bytes
    const SIZE: usize;

    fn write_le(self, out: &mut Vec<u8>);

    /// Decode from exactly [`Self::SIZE`] bytes
    fn read_le(bytes: &[u8]) -> Self;
}

impl Sample for u16 {
    const SIZE: usize = 2;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl Sample for f32 {
    const SIZE: usize = 4;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Appends frames of one fixed geometry to a frame-sequence stream
pub struct FrameSequenceWriter<W: Write, T: Sample> {
    writer: W,
    width: usize,
    height: usize,
    frames_written: u64,
    scratch: Vec<u8>,
    _sample: std::marker::PhantomData<T>,
}

impl<T: Sample> FrameSequenceWriter<BufWriter<File>, T> {
    /// Create (or truncate) a file and write the header
    pub fn create<P: AsRef<Path>>(path: P, width: usize, height: usize) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        debug!("Created frame sequence file {}", path.as_ref().display());
        Self::new(BufWriter::new(file), width, height)
    }
}

impl<W: Write, T: Sample> FrameSequenceWriter<W, T> {
    /// Wrap a writer and emit the header
    pub fn new(mut writer: W, width: usize, height: usize) -> Result<Self> {
        let w = u16::try_from(width)
            .map_err(|_| SharedError::invalid_file_format(format!("width {} exceeds u16", width)))?;
        let h = u16::try_from(height).map_err(|_| {
            SharedError::invalid_file_format(format!("height {} exceeds u16", height))
        })?;

        writer.write_all(&w.to_le_bytes())?;
        writer.write_all(&h.to_le_bytes())?;

        Ok(Self {
            writer,
            width,
            height,
            frames_written: 0,
            scratch: Vec::with_capacity(width * height * T::SIZE),
            _sample: std::marker::PhantomData,
        })
    }

    /// Append one frame
    pub fn write_frame(&mut self, frame: &ImageMatrix<T>) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(SharedError::invalid_frame(format!(
                "Frame is {}x{}, sequence is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        self.scratch.clear();
        for sample in frame.to_column_major() {
            sample.write_le(&mut self.scratch);
        }
        self.writer.write_all(&self.scratch)?;
        self.frames_written += 1;

        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush and hand back the underlying writer
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Frames loaded from a frame-sequence file
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSequence<T> {
    pub width: usize,
    pub height: usize,
    pub frames: Vec<ImageMatrix<T>>,
}

impl<T: Sample> FrameSequence<T> {
    /// Decode a frame-sequence from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(SharedError::invalid_file_format(format!(
                "File has {} bytes, header needs 4",
                data.len()
            )));
        }

        let width = u16::from_le_bytes([data[0], data[1]]) as usize;
        let height = u16::from_le_bytes([data[2], data[3]]) as usize;
        let frame_bytes = width * height * T::SIZE;
        let body = &data[4..];

        if frame_bytes == 0 {
            if body.is_empty() {
                return Ok(Self { width, height, frames: Vec::new() });
            }
            return Err(SharedError::invalid_file_format(format!(
                "Zero-sized {}x{} frames with {} trailing bytes",
                width,
                height,
                body.len()
            )));
        }

        if body.len() % frame_bytes != 0 {
            return Err(SharedError::invalid_file_format(format!(
                "Body of {} bytes is not a multiple of the {} byte frame size",
                body.len(),
                frame_bytes
            )));
        }

        let mut frames = Vec::with_capacity(body.len() / frame_bytes);
        for chunk in body.chunks_exact(frame_bytes) {
            let samples: Vec<T> = chunk.chunks_exact(T::SIZE).map(T::read_le).collect();
            frames.push(ImageMatrix::from_column_major(width, height, &samples)?);
        }

        Ok(Self { width, height, frames })
    }
}

/// Load a whole frame-sequence file
pub fn read_frame_sequence<T: Sample, P: AsRef<Path>>(path: P) -> Result<FrameSequence<T>> {
    let mut data = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut data)?;
    FrameSequence::from_bytes(&data)
}
