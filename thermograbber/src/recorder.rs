/*!
Background frame recording.

The capture loop hands decoded images to a writer thread over a bounded
channel. `send` blocks when the channel is full, so a slow disk slows the
capture loop down instead of dropping frames.
*/

use crossbeam_channel::{bounded, Receiver, Sender};
use shared::{Calibration, FrameSequenceWriter, ImageMatrix, Sample};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// What to store for each frame
#[derive(Debug, Clone, Copy)]
pub enum RecordMode {
    Raw,
    Celsius(Calibration),
}

impl RecordMode {
    fn suffix(&self) -> &'static str {
        match self {
            RecordMode::Raw => "raw",
            RecordMode::Celsius(_) => "celsius",
        }
    }
}

/// Writes frames to a frame-sequence file on a dedicated thread
pub struct Recorder {
    sender: Option<Sender<ImageMatrix<u16>>>,
    handle: Option<JoinHandle<shared::Result<u64>>>,
    path: PathBuf,
}

impl Recorder {
    /// Create `output_dir` and start writing a timestamped recording
    pub fn start(
        output_dir: &Path,
        width: usize,
        height: usize,
        mode: RecordMode,
        channel_size: usize,
    ) -> shared::Result<Self> {
        std::fs::create_dir_all(output_dir)?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = output_dir.join(format!("thermal_{}_{}.bin", timestamp, mode.suffix()));
        info!("📁 Recording to {}", path.display());

        let (sender, receiver) = bounded::<ImageMatrix<u16>>(channel_size.max(1));
        let writer_path = path.clone();
        let handle = thread::spawn(move || {
            let result = match mode {
                RecordMode::Raw => {
                    write_frames(&writer_path, width, height, receiver, |image| image)
                }
                RecordMode::Celsius(calibration) => {
                    write_frames(&writer_path, width, height, receiver, move |image| {
                        calibration.apply(&image)
                    })
                }
            };
            if let Err(e) = &result {
                error!("❌ Recording to {} failed: {}", writer_path.display(), e);
            }
            result
        });

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            path,
        })
    }

    /// Queue a frame; `false` once the writer thread has stopped
    pub fn send(&self, image: ImageMatrix<u16>) -> bool {
        match &self.sender {
            Some(sender) => sender.send(image).is_ok(),
            None => false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the channel, wait for the writer and return the frame count
    pub fn finish(mut self) -> shared::Result<u64> {
        self.sender.take();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| shared::SharedError::new("Recorder thread panicked"))?,
            None => Ok(0),
        }
    }
}

fn write_frames<T, F>(
    path: &Path,
    width: usize,
    height: usize,
    receiver: Receiver<ImageMatrix<u16>>,
    convert: F,
) -> shared::Result<u64>
where
    T: Sample,
    F: Fn(ImageMatrix<u16>) -> ImageMatrix<T>,
{
    let mut writer = FrameSequenceWriter::<_, T>::create(path, width, height)?;

    for image in receiver {
        writer.write_frame(&convert(image))?;
    }

    let frames = writer.frames_written();
    writer.finish()?;
    info!("💾 Wrote {} frames to {}", frames, path.display());

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::read_frame_sequence;

    #[test]
    fn test_records_raw_frames() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::start(dir.path(), 2, 2, RecordMode::Raw, 1).unwrap();

        let frames = vec![
            ImageMatrix::new(2, 2, vec![1u16, 2, 3, 4]).unwrap(),
            ImageMatrix::new(2, 2, vec![5u16, 6, 7, 8]).unwrap(),
        ];
        for frame in &frames {
            assert!(recorder.send(frame.clone()));
        }

        let path = recorder.path().to_path_buf();
        assert_eq!(recorder.finish().unwrap(), 2);

        let loaded = read_frame_sequence::<u16, _>(&path).unwrap();
        assert_eq!(loaded.frames, frames);
    }

    #[test]
    fn test_records_celsius_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mode = RecordMode::Celsius(Calibration::new(1.0, -10.0));
        let recorder = Recorder::start(dir.path(), 1, 2, mode, 4).unwrap();

        assert!(recorder.send(ImageMatrix::new(1, 2, vec![10u16, 30]).unwrap()));
        let path = recorder.path().to_path_buf();
        assert!(path.to_string_lossy().ends_with("_celsius.bin"));
        assert_eq!(recorder.finish().unwrap(), 1);

        let loaded = read_frame_sequence::<f32, _>(&path).unwrap();
        assert_eq!(loaded.frames[0].as_slice(), &[0.0, 20.0]);
    }
}
