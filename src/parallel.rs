use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use tracing::debug;

use crate::{
    Error, Result,
    config::ConfigResolver,
    converter::VariantRowConverter,
    key::RowKeyCodec,
    options::StorageOptions,
    store::{Row, VariantStore},
    variant::Variant,
};

/// Trait for types that consume decoded variants in parallel.
///
/// Each worker thread receives its own clone of the processor. Shared results
/// are usually collected behind an `Arc` inside the processor.
pub trait RowProcessor: Send + Clone {
    /// Process a single decoded variant
    fn process_variant(&mut self, variant: Variant) -> Result<()>;

    /// Called when a thread finishes its share of a batch
    /// Default implementation does nothing
    fn on_batch_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Set the thread ID for this processor
    ///
    /// Each thread should call this method with its own unique ID.
    fn set_tid(&mut self, _tid: usize) {
        // Default implementation does nothing
    }

    /// Get the thread ID for this processor
    fn get_tid(&self) -> Option<usize> {
        None
    }
}

/// Cooperative cancellation flag shared between a scan and its caller
///
/// Workers check the flag between rows; a row that has started decoding is
/// always finished.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);
impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Decodes batches of rows across a pool of worker threads
///
/// Rows are processed in batches of `scan_batch_size`. Before each batch the
/// resolver's `begin_batch` runs once, so configuration revalidation costs one
/// store round trip per batch rather than one per row. Within a batch the rows
/// are split into contiguous chunks, one per worker.
pub struct ScanDecoder<R: ConfigResolver> {
    converter: VariantRowConverter,
    resolver: R,
    num_threads: usize,
    batch_size: usize,
    token: CancellationToken,
}
impl<R: ConfigResolver> ScanDecoder<R> {
    pub fn new(resolver: R, options: &StorageOptions) -> Self {
        Self {
            converter: VariantRowConverter::new(options),
            resolver,
            num_threads: options.effective_threads(),
            batch_size: options.scan_batch_size.max(1),
            token: CancellationToken::new(),
        }
    }

    /// Replaces the cancellation token, e.g. to share one across scans
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// A handle that cancels scans run by this decoder
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Decodes rows and feeds every variant to the processor
    ///
    /// Study configuration rows kept in the same store are skipped, so the
    /// rows of an unbounded scan can be passed in as they are.
    ///
    /// # Arguments
    ///
    /// * `rows` - The rows to decode
    /// * `processor` - The processor cloned into each worker thread
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - The number of variants processed
    /// * `Err(Error::Cancelled)` - If the token was cancelled during the scan
    /// * `Err(Error)` - The first row-level error, which stops the scan
    pub fn decode_rows<P: RowProcessor>(&self, rows: &[Row], processor: P) -> Result<usize> {
        let num_threads = self.num_threads.clamp(1, rows.len().max(1));
        let mut processors: Vec<P> = (0..num_threads)
            .map(|tid| {
                let mut processor = processor.clone();
                processor.set_tid(tid);
                processor
            })
            .collect();

        let processed = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);

        for (batch_idx, batch) in rows.chunks(self.batch_size).enumerate() {
            if self.token.is_cancelled() {
                return Err(Error::Cancelled(processed.load(Ordering::Relaxed)));
            }
            self.resolver.begin_batch()?;

            let per_thread = batch.len().div_ceil(num_threads);
            let results: Vec<Result<()>> = thread::scope(|scope| {
                let handles: Vec<_> = processors
                    .iter_mut()
                    .zip(batch.chunks(per_thread))
                    .map(|(processor, chunk)| {
                        let processed = &processed;
                        let abort = &abort;
                        scope.spawn(move || self.decode_chunk(chunk, processor, processed, abort))
                    })
                    .collect();
                handles
                    .into_iter()
                    .enumerate()
                    .map(|(tid, handle)| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err(Error::WorkerPanic(tid)))
                    })
                    .collect()
            });
            for result in results {
                result?;
            }
            debug!(
                "Finished batch {} ({} rows, {} processed so far)",
                batch_idx,
                batch.len(),
                processed.load(Ordering::Relaxed)
            );
        }

        let processed = processed.load(Ordering::Relaxed);
        if self.token.is_cancelled() {
            return Err(Error::Cancelled(processed));
        }
        Ok(processed)
    }

    fn decode_chunk<P: RowProcessor>(
        &self,
        rows: &[Row],
        processor: &mut P,
        processed: &AtomicUsize,
        abort: &AtomicBool,
    ) -> Result<()> {
        for row in rows {
            if self.token.is_cancelled() || abort.load(Ordering::Relaxed) {
                break;
            }
            if self.converter.helper().is_configuration_key(&row.key) {
                continue;
            }
            let outcome = self
                .converter
                .decode_row(row, &self.resolver)
                .and_then(|variant| processor.process_variant(variant));
            if let Err(err) = outcome {
                abort.store(true, Ordering::Relaxed);
                return Err(err);
            }
            processed.fetch_add(1, Ordering::Relaxed);
        }
        processor.on_batch_complete()
    }

    /// Scans positions `start..end` of a chromosome and decodes every row found
    pub fn scan_region<S, P>(
        &self,
        store: &S,
        chromosome: &str,
        start: u64,
        end: u64,
        processor: P,
    ) -> Result<usize>
    where
        S: VariantStore + ?Sized,
        P: RowProcessor,
    {
        let (start_key, stop_key) = RowKeyCodec::region_bounds(chromosome, start, end)?;
        let rows = store.scan(&start_key, &stop_key)?;
        debug!(
            "Scanning {} rows of {}:{}-{}",
            rows.len(),
            chromosome,
            start,
            end
        );
        self.decode_rows(&rows, processor)
    }
}
