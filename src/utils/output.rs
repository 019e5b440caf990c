/// Result file writer
///
/// Line format, one record per line:
///
/// ```text
/// <elapsed_us> <bytes>    one per interval sample
/// PEAK <bytes>            exactly once, last
/// ```
use crate::config::types::{MemuseError, Result, Sample};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Destination for interval samples
pub trait SampleSink {
    fn write_sample(&mut self, sample: &Sample) -> Result<()>;
}

pub struct ResultWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    peak_written: bool,
}

impl ResultWriter {
    /// Create or truncate `path`
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            MemuseError::Output(format!(
                "Could not open output file {}: {}",
                path.display(),
                e
            ))
        })?;
        log::debug!("Opened output file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            out: Some(BufWriter::new(file)),
            peak_written: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.out.is_some()
    }

    pub fn peak_written(&self) -> bool {
        self.peak_written
    }

    /// Terminal `PEAK` record; a second call is rejected
    pub fn write_peak(&mut self, value: u64) -> Result<()> {
        if self.peak_written {
            return Err(MemuseError::Output("PEAK record already written".to_string()));
        }
        let written = writeln!(self.stream()?, "PEAK {}", value);
        written.map_err(|e| self.write_error(e))?;
        self.peak_written = true;
        log::info!("Peak memory: {} bytes", value);
        Ok(())
    }

    /// Flush and release the file; idempotent
    pub fn close(&mut self) -> Result<()> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        out.flush().map_err(|e| self.write_error(e))?;
        log::debug!("Closed output file {}", self.path.display());
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut BufWriter<File>> {
        let path = &self.path;
        self.out.as_mut().ok_or_else(|| {
            MemuseError::Output(format!("output file {} already closed", path.display()))
        })
    }

    fn write_error(&self, err: std::io::Error) -> MemuseError {
        MemuseError::Output(format!("Failed writing {}: {}", self.path.display(), err))
    }
}

impl SampleSink for ResultWriter {
    fn write_sample(&mut self, sample: &Sample) -> Result<()> {
        if self.peak_written {
            return Err(MemuseError::Output(
                "sample written after PEAK record".to_string(),
            ));
        }
        let written = writeln!(self.stream()?, "{} {}", sample.elapsed_us(), sample.value);
        written.map_err(|e| self.write_error(e))?;
        Ok(())
    }
}

impl SampleSink for Vec<Sample> {
    fn write_sample(&mut self, sample: &Sample) -> Result<()> {
        self.push(*sample);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample(index: u64, ms: u64, value: u64) -> Sample {
        Sample {
            index,
            elapsed: Duration::from_millis(ms),
            value,
        }
    }

    #[test]
    fn writes_samples_then_peak() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.txt");

        let mut writer = ResultWriter::open(&path).unwrap();
        writer.write_sample(&sample(0, 0, 4096)).unwrap();
        writer.write_sample(&sample(1, 50, 8192)).unwrap();
        writer.write_peak(12288).unwrap();
        writer.close().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "0 4096\n50000 8192\nPEAK 12288\n");
    }

    #[test]
    fn open_truncates_existing_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.txt");
        fs::write(&path, "stale contents\n").unwrap();

        let mut writer = ResultWriter::open(&path).unwrap();
        writer.write_peak(1).unwrap();
        writer.close().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "PEAK 1\n");
    }

    #[test]
    fn open_fails_for_unwritable_destination() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("missing-dir").join("out.txt");
        assert!(matches!(
            ResultWriter::open(&path),
            Err(MemuseError::Output(_))
        ));
    }

    #[test]
    fn peak_is_written_once() {
        let tmp = tempdir().unwrap();
        let mut writer = ResultWriter::open(&tmp.path().join("out.txt")).unwrap();
        writer.write_peak(10).unwrap();
        assert!(writer.write_peak(20).is_err());
        assert!(writer.write_sample(&sample(1, 50, 1)).is_err());
        writer.close().unwrap();

        let content = fs::read_to_string(writer.path()).unwrap();
        assert_eq!(content, "PEAK 10\n");
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_writes() {
        let tmp = tempdir().unwrap();
        let mut writer = ResultWriter::open(&tmp.path().join("out.txt")).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(!writer.is_open());
        assert!(writer.write_peak(1).is_err());
    }
}
