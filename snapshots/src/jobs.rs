//! Table job runner: dump, restore or verify one table end to end.

use anyhow::{Context, Result};
use futures::stream::{BoxStream, StreamExt};
use std::future::Future;
use tracing::{debug, info, warn};

use crate::errors::SnapshotError;
use crate::ledger::{Record, Table};
use crate::pipeline::PipelineBuilder;
use crate::progress::ProgressReporter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub records: u64,
    /// Number of bulk saves issued
    pub chunks: u64,
}

pub struct TableJob<'a> {
    pipeline: PipelineBuilder,
    expected: u64,
    progress: &'a ProgressReporter,
}

impl<'a> TableJob<'a> {
    pub fn new(pipeline: PipelineBuilder, expected: u64, progress: &'a ProgressReporter) -> Self {
        Self {
            pipeline,
            expected,
            progress,
        }
    }

    pub fn table(&self) -> Table {
        self.pipeline.table()
    }

    /// Stream every row from `cursor` into the table file
    pub async fn dump<R: Record>(self, mut cursor: BoxStream<'_, Result<R>>) -> Result<u64> {
        let table = self.table();
        let task = self.progress.start(table.name(), self.expected).await;

        let written = async {
            let mut writer = self.pipeline.into_writer::<R>().await?;
            while let Some(row) = cursor.next().await {
                let record = row.map_err(|e| {
                    SnapshotError::pipeline(table, format!("storage cursor: {:#}", e))
                })?;
                writer.write(record).await?;
                task.update().await;
            }
            Ok::<_, anyhow::Error>(writer.finish().await?)
        }
        .await;
        task.end().await;

        let written = written?;
        info!("✓ Dumped {} {} records", written, table);
        Ok(written)
    }

    /// Decode the table file and hand records to `save` in chunks of
    /// `chunk_size`; the last chunk holds the remainder.
    pub async fn restore<R, N, S, Fut>(
        self,
        chunk_size: usize,
        normalize: N,
        mut save: S,
    ) -> Result<RestoreSummary>
    where
        R: Record,
        N: Fn(&mut R),
        S: FnMut(Vec<R>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let table = self.table();
        let expected = self.expected;
        let chunk_size = chunk_size.max(1);
        let task = self.progress.start(table.name(), expected).await;

        let restored = async {
            let mut reader = self.pipeline.into_reader::<R>().await?;
            let mut summary = RestoreSummary::default();
            let mut chunk = Vec::with_capacity(chunk_size);

            while let Some(item) = reader.next().await {
                let mut record = item?;
                normalize(&mut record);
                chunk.push(record);
                task.update().await;

                if chunk.len() >= chunk_size {
                    let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
                    Self::flush(table, &mut summary, full, &mut save).await?;
                }
            }

            if !chunk.is_empty() {
                Self::flush(table, &mut summary, chunk, &mut save).await?;
            }
            Ok::<_, anyhow::Error>(summary)
        }
        .await;
        task.end().await;

        let summary = restored?;
        if summary.records != expected {
            warn!(
                "Restored {} {} records but the snapshot metadata lists {}",
                summary.records, table, expected
            );
        }
        info!(
            "✓ Restored {} {} records in {} chunks",
            summary.records, table, summary.chunks
        );
        Ok(summary)
    }

    async fn flush<R, S, Fut>(
        table: Table,
        summary: &mut RestoreSummary,
        chunk: Vec<R>,
        save: &mut S,
    ) -> Result<()>
    where
        S: FnMut(Vec<R>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let len = chunk.len() as u64;
        save(chunk).await.with_context(|| {
            format!(
                "Failed to save {} chunk {} ({} records)",
                table,
                summary.chunks + 1,
                len
            )
        })?;

        summary.records += len;
        summary.chunks += 1;
        debug!("Saved {} chunk {} ({} records)", table, summary.chunks, len);
        Ok(())
    }

    /// Feed records in file order, paired with their predecessor, to
    /// `predicate`; stop at the first rejection.
    pub async fn verify<R, N, P>(self, normalize: N, predicate: P) -> Result<u64>
    where
        R: Record,
        N: Fn(&mut R),
        P: Fn(&R, Option<&R>) -> Result<(), String>,
    {
        let table = self.table();
        let expected = self.expected;
        let task = self.progress.start(table.name(), expected).await;

        let verified = async {
            let mut reader = self.pipeline.into_reader::<R>().await?;
            let mut previous: Option<R> = None;
            let mut index = 0u64;

            while let Some(item) = reader.next().await {
                let mut current = item?;
                normalize(&mut current);
                index += 1;
                task.update().await;

                if let Err(reason) = predicate(&current, previous.as_ref()) {
                    warn!("Record {} of {} rejected: {}", index, table, reason);
                    return Err(SnapshotError::VerificationFailure {
                        table,
                        index,
                        reason,
                    }
                    .into());
                }

                previous = Some(current);
            }

            if index != expected {
                return Err(SnapshotError::VerificationFailure {
                    table,
                    index,
                    reason: format!(
                        "file holds {} records but the snapshot metadata lists {}",
                        index, expected
                    ),
                }
                .into());
            }
            Ok::<_, anyhow::Error>(index)
        }
        .await;
        task.end().await;

        let index = verified?;
        info!("✓ Verified {} {} records", index, table);
        Ok(index)
    }
}
