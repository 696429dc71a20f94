//! Per-run counters

use serde::Serialize;

/// Counters for one ingestion run.
///
/// Owned by the caller and passed `&mut` into the runner, so a run that
/// fails midway still leaves its partial counts readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTelemetry {
    /// Candidate files found by discovery
    pub discovered: usize,
    /// Files fully ingested
    pub processed: usize,
    /// Files dropped as unchanged or unreadable
    pub skipped: usize,
    /// Documents minted this run
    pub documents_created: usize,
    /// Chunks embedded and indexed this run
    pub chunks_indexed: usize,
    /// Raw bytes of processed files
    pub bytes_processed: u64,
}

impl RunTelemetry {
    pub fn summary(&self) -> String {
        format!(
            "{} of {} files processed ({} skipped), {} documents, {} chunks, {} bytes",
            self.processed,
            self.discovered,
            self.skipped,
            self.documents_created,
            self.chunks_indexed,
            self.bytes_processed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_reads_back_counts() {
        let telemetry = RunTelemetry {
            discovered: 10,
            processed: 7,
            skipped: 3,
            documents_created: 7,
            chunks_indexed: 21,
            bytes_processed: 4096,
        };
        assert_eq!(
            telemetry.summary(),
            "7 of 10 files processed (3 skipped), 7 documents, 21 chunks, 4096 bytes"
        );
    }
}
