//! JSONL submission stream reader with file rotation detection
//!
//! Each line is one `Submission` (`server_id` plus the raw kill fields).
//! Malformed lines are logged and skipped.

use super::normalizer::Submission;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Where to begin reading when the file is (re)opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Read existing content first
    Beginning,
    /// Only lines appended after `start`
    End,
}

pub struct SubmissionReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    inode: Option<u64>,
    poll_interval: Duration,
    start_position: StartPosition,
    /// Bytes of a line still being written
    pending: String,
    skipped: u64,
}

impl SubmissionReader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            inode: None,
            poll_interval: Duration::from_millis(100),
            start_position: StartPosition::End,
            pending: String::new(),
            skipped: 0,
        }
    }

    pub fn with_start_position(mut self, start_position: StartPosition) -> Self {
        self.start_position = start_position;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Open the file at the configured start position
    pub async fn start(&mut self) -> std::io::Result<()> {
        self.open(self.start_position).await
    }

    async fn open(&mut self, position: StartPosition) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;

        #[cfg(unix)]
        {
            let metadata = file.metadata().await?;
            self.inode = Some(metadata.ino());
        }

        let mut reader = BufReader::new(file);
        if position == StartPosition::End {
            reader.seek(SeekFrom::End(0)).await?;
        }
        self.file = Some(reader);
        self.pending.clear();

        log::info!("📖 Reading submissions from: {}", self.path.display());
        Ok(())
    }

    /// Next complete, non-empty line, waiting for more data if necessary
    pub async fn read_line(&mut self) -> std::io::Result<String> {
        loop {
            if self.detect_rotation().await? {
                log::info!("🔄 File rotation detected, reopening: {}", self.path.display());
                // A rotated file is new content: read it from the top
                self.open(StartPosition::Beginning).await?;
            }

            let Some(reader) = self.file.as_mut() else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "File not opened",
                ));
            };

            match reader.read_line(&mut self.pending).await? {
                0 => {
                    sleep(self.poll_interval).await;
                }
                _ if !self.pending.ends_with('\n') => {
                    // Partial line; wait for the writer to finish it
                    sleep(self.poll_interval).await;
                }
                _ => {
                    let line = std::mem::take(&mut self.pending);
                    let line = line.trim();
                    if !line.is_empty() {
                        return Ok(line.to_string());
                    }
                }
            }
        }
    }

    /// Next well-formed submission
    pub async fn next_submission(&mut self) -> std::io::Result<Submission> {
        loop {
            let line = self.read_line().await?;
            match Submission::from_jsonl(&line) {
                Ok(submission) => return Ok(submission),
                Err(e) => {
                    self.skipped += 1;
                    log::warn!("⚠️  Skipping malformed submission line: {}", e);
                }
            }
        }
    }

    /// Lines dropped as malformed so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Detect if the file has been rotated (inode changed)
    async fn detect_rotation(&self) -> std::io::Result<bool> {
        #[cfg(unix)]
        {
            let metadata = tokio::fs::metadata(&self.path).await?;
            Ok(self.inode.map_or(false, |old| old != metadata.ino()))
        }

        #[cfg(not(unix))]
        {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn append(path: &std::path::Path, content: &[u8]) {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(content).await.unwrap();
        file.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_tail_reads_only_appended_submissions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("submissions.jsonl");
        tokio::fs::write(&file_path, b"{\"server_id\":1,\"victim_id\":\"0\"}\n")
            .await
            .unwrap();

        let mut reader = SubmissionReader::new(file_path.clone())
            .with_poll_interval(Duration::from_millis(10));
        reader.start().await.unwrap();

        append(&file_path, b"not json\n{\"server_id\":7,\"victim_id\":\"2\"}\n").await;

        let submission = tokio::time::timeout(Duration::from_secs(2), reader.next_submission())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.server_id, 7);
        assert_eq!(reader.skipped(), 1);
    }

    #[tokio::test]
    async fn test_reads_from_beginning_when_asked() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("submissions.jsonl");
        tokio::fs::write(&file_path, b"\n{\"server_id\":3}\n").await.unwrap();

        let mut reader = SubmissionReader::new(file_path)
            .with_start_position(StartPosition::Beginning)
            .with_poll_interval(Duration::from_millis(10));
        reader.start().await.unwrap();

        let submission = tokio::time::timeout(Duration::from_secs(2), reader.next_submission())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.server_id, 3);
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_newline() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("submissions.jsonl");
        tokio::fs::write(&file_path, b"").await.unwrap();

        let mut reader = SubmissionReader::new(file_path.clone())
            .with_poll_interval(Duration::from_millis(10));
        reader.start().await.unwrap();

        append(&file_path, b"{\"server_id\":").await;
        let writer_path = file_path.clone();
        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            append(&writer_path, b"9}\n").await;
        });

        let line = tokio::time::timeout(Duration::from_secs(2), reader.read_line())
            .await
            .unwrap()
            .unwrap();
        writer.await.unwrap();
        assert_eq!(line, "{\"server_id\":9}");
    }
}
