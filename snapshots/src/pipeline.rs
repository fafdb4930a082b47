//! Stream pipelines between the async table jobs and snapshot files
//!
//! A pipeline is an ordered chain of stages:
//!
//! - write: records → encode → [gzip] → file
//! - read: file → [gunzip] → decode → records
//!
//! Codec and compression work is blocking, so each pipeline runs its stages on
//! a `spawn_blocking` thread and exchanges records with the async side through
//! a bounded channel. Record order is preserved end to end. Dropping a
//! [`RecordReader`] early stops its worker at the next send and closes the file.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::Codec;
use crate::constants::pipeline::{CHANNEL_CAPACITY, GZIP_HEADER, IO_BUFFER_BYTES};
use crate::errors::SnapshotError;
use crate::ledger::{Record, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Encode(&'static str),
    Decode(&'static str),
    Gzip,
    Gunzip,
    FileSink,
    FileSource,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Encode(codec) => write!(f, "encode({})", codec),
            Stage::Decode(codec) => write!(f, "decode({})", codec),
            Stage::Gzip => f.write_str("gzip"),
            Stage::Gunzip => f.write_str("gunzip"),
            Stage::FileSink => f.write_str("file-sink"),
            Stage::FileSource => f.write_str("file-source"),
        }
    }
}

/// Builds the read or write pipeline for one table file
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    path: PathBuf,
    codec: Codec,
    compressed: bool,
}

impl PipelineBuilder {
    pub fn new(path: impl Into<PathBuf>, codec: Codec) -> Self {
        Self {
            path: path.into(),
            codec,
            compressed: true,
        }
    }

    /// Toggle the gzip stage (on by default)
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> Table {
        self.codec.table()
    }

    pub fn write_stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Encode(self.codec.name())];
        if self.compressed {
            stages.push(Stage::Gzip);
        }
        stages.push(Stage::FileSink);
        stages
    }

    pub fn read_stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::FileSource];
        if self.compressed {
            stages.push(Stage::Gunzip);
        }
        stages.push(Stage::Decode(self.codec.name()));
        stages
    }

    fn describe(stages: &[Stage]) -> String {
        stages
            .iter()
            .map(Stage::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Create (or overwrite) the table file and start the write stages
    pub async fn into_writer<R: Record>(self) -> Result<RecordWriter<R>, SnapshotError> {
        let table = self.codec.table();
        let file = tokio::fs::File::create(&self.path)
            .await
            .map_err(|e| {
                SnapshotError::pipeline(table, format!("create {}: {}", self.path.display(), e))
            })?
            .into_std()
            .await;

        debug!(
            "Write pipeline for {}: {} ({})",
            table,
            Self::describe(&self.write_stages()),
            self.path.display()
        );

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let codec = self.codec;
        let compressed = self.compressed;
        let worker =
            tokio::task::spawn_blocking(move || write_records(file, codec, compressed, receiver));

        Ok(RecordWriter {
            table,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Open the table file and start the read stages
    pub async fn into_reader<R: Record>(self) -> Result<RecordReader<R>, SnapshotError> {
        let table = self.codec.table();
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| {
                SnapshotError::pipeline(table, format!("open {}: {}", self.path.display(), e))
            })?
            .into_std()
            .await;

        debug!(
            "Read pipeline for {}: {} ({})",
            table,
            Self::describe(&self.read_stages()),
            self.path.display()
        );

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let codec = self.codec;
        let compressed = self.compressed;
        let worker =
            tokio::task::spawn_blocking(move || read_records(file, codec, compressed, sender));

        Ok(RecordReader {
            table,
            receiver,
            worker: Some(worker),
        })
    }
}

/// Async entry point of a write pipeline
pub struct RecordWriter<R> {
    table: Table,
    sender: Option<mpsc::Sender<R>>,
    worker: Option<JoinHandle<Result<u64, SnapshotError>>>,
}

impl<R: Record> RecordWriter<R> {
    pub async fn write(&mut self, record: R) -> Result<(), SnapshotError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| SnapshotError::pipeline(self.table, "write after pipeline closed"))?;

        if sender.send(record).await.is_err() {
            // The worker only hangs up when a stage failed; its result has the reason
            self.sender = None;
            return Err(match self.join().await {
                Err(e) => e,
                Ok(_) => SnapshotError::pipeline(self.table, "pipeline closed unexpectedly"),
            });
        }

        Ok(())
    }

    /// Flush every stage, close the file and return the number of records written
    pub async fn finish(mut self) -> Result<u64, SnapshotError> {
        self.sender = None;
        self.join().await
    }

    async fn join(&mut self) -> Result<u64, SnapshotError> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| SnapshotError::pipeline(self.table, "pipeline already closed"))?;

        worker
            .await
            .map_err(|e| SnapshotError::pipeline(self.table, format!("writer task failed: {}", e)))?
    }
}

/// Lazy, finite, forward-only sequence of decoded records
pub struct RecordReader<R> {
    table: Table,
    receiver: mpsc::Receiver<Result<R, SnapshotError>>,
    worker: Option<JoinHandle<()>>,
}

impl<R: Record> RecordReader<R> {
    pub async fn next(&mut self) -> Option<Result<R, SnapshotError>> {
        if let Some(item) = self.receiver.recv().await {
            return Some(item);
        }

        // Channel closed: a clean end unless the worker died
        let worker = self.worker.take()?;
        match worker.await {
            Ok(()) => None,
            Err(e) => Some(Err(SnapshotError::pipeline(
                self.table,
                format!("reader task failed: {}", e),
            ))),
        }
    }
}

enum FileSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FileSink {
    fn close(self) -> io::Result<()> {
        let mut writer = match self {
            FileSink::Plain(writer) => writer,
            FileSink::Gzip(encoder) => encoder.finish()?,
        };
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileSink::Plain(writer) => writer.write(buf),
            FileSink::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileSink::Plain(writer) => writer.flush(),
            FileSink::Gzip(encoder) => encoder.flush(),
        }
    }
}

fn write_records<R: Record>(
    file: File,
    codec: Codec,
    compressed: bool,
    mut receiver: mpsc::Receiver<R>,
) -> Result<u64, SnapshotError> {
    let writer = BufWriter::with_capacity(IO_BUFFER_BYTES, file);
    let mut sink = if compressed {
        FileSink::Gzip(
            GzBuilder::new()
                .mtime(0)
                .operating_system(GZIP_HEADER[9])
                .write(writer, Compression::default()),
        )
    } else {
        FileSink::Plain(writer)
    };

    codec.write_header(&mut sink)?;

    let mut written = 0u64;
    while let Some(record) = receiver.blocking_recv() {
        codec.encode(&record, &mut sink)?;
        written += 1;
    }

    sink.close()
        .map_err(|e| SnapshotError::pipeline(codec.table(), format!("close: {}", e)))?;
    Ok(written)
}

fn read_gzip_header<Rd: Read>(reader: &mut Rd, codec: Codec) -> Result<[u8; 10], SnapshotError> {
    let mut header = [0u8; 10];
    reader
        .read_exact(&mut header)
        .map_err(|e| SnapshotError::pipeline(codec.table(), format!("gzip header: {}", e)))?;

    if header != GZIP_HEADER {
        return Err(SnapshotError::pipeline(
            codec.table(),
            format!("unexpected gzip header {:02x?}", header),
        ));
    }
    Ok(header)
}

fn read_records<R: Record>(
    file: File,
    codec: Codec,
    compressed: bool,
    sender: mpsc::Sender<Result<R, SnapshotError>>,
) {
    let mut reader = BufReader::with_capacity(IO_BUFFER_BYTES, file);
    let source: Box<dyn Read + Send> = if compressed {
        match read_gzip_header(&mut reader, codec) {
            Ok(header) => Box::new(GzDecoder::new(Cursor::new(header).chain(reader))),
            Err(e) => {
                let _ = sender.blocking_send(Err(e));
                return;
            }
        }
    } else {
        Box::new(reader)
    };

    for item in codec.decoder::<R, _>(source) {
        let failed = item.is_err();
        if sender.blocking_send(item).is_err() {
            debug!("Reader for {} dropped before end of file", codec.table());
            return;
        }
        if failed {
            return;
        }
    }
}
