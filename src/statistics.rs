use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ticker {
    /// Point lookups served from a level-0 file.
    GetHitL0,
    GetHitL1,
    GetHitL2AndUp,
}

const NUM_TICKERS: usize = 3;

/// Distributions recorded per lookup batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Histogram {
    /// Index plus filter blocks read per level.
    NumIndexAndFilterBlocksReadPerLevel,
    NumDataBlocksReadPerLevel,
    NumSstReadPerLevel,
    /// Keys handed to a single table in one batched read.
    SstBatchSize,
}

const NUM_HISTOGRAMS: usize = 4;

/// Count, sum, min and max of recorded samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
}

#[derive(Debug)]
struct HistogramCell {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for HistogramCell {
    fn default() -> Self {
        HistogramCell {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }
}

/// Lock-free tickers and histograms shared by every reader of a column family.
#[derive(Debug, Default)]
pub struct Statistics {
    tickers: [AtomicU64; NUM_TICKERS],
    histograms: [HistogramCell; NUM_HISTOGRAMS],
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self, ticker: Ticker, count: u64) {
        self.tickers[ticker as usize].fetch_add(count, Ordering::Relaxed);
    }

    pub fn ticker(&self, ticker: Ticker) -> u64 {
        self.tickers[ticker as usize].load(Ordering::Relaxed)
    }

    pub fn record_in_histogram(&self, histogram: Histogram, value: u64) {
        let cell = &self.histograms[histogram as usize];
        cell.count.fetch_add(1, Ordering::Relaxed);
        cell.sum.fetch_add(value, Ordering::Relaxed);
        cell.min.fetch_min(value, Ordering::Relaxed);
        cell.max.fetch_max(value, Ordering::Relaxed);
    }

    pub fn histogram(&self, histogram: Histogram) -> HistogramSummary {
        let cell = &self.histograms[histogram as usize];
        let count = cell.count.load(Ordering::Relaxed);
        HistogramSummary {
            count,
            sum: cell.sum.load(Ordering::Relaxed),
            min: if count == 0 {
                0
            } else {
                cell.min.load(Ordering::Relaxed)
            },
            max: cell.max.load(Ordering::Relaxed),
        }
    }
}
