//! Thread-per-consumer orchestration around a [`StreamFanout`].
//!
//! Each consumer runs on its own scoped thread with its own
//! [`ReaderHandle`]; the calling thread drives the transfer.

use crate::config::FanoutConfig;
use crate::fanout::{ReaderHandle, StreamFanout};
use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::thread;
use tracing::{debug, warn};

type ConsumerFn<'a, T> = Box<dyn FnOnce(ReaderHandle) -> Result<T> + Send + 'a>;

/// Result of one consumer
#[derive(Debug)]
pub struct ConsumerOutcome<T> {
    pub name: String,
    pub result: Result<T>,
}

/// Result of a pipeline run
#[derive(Debug)]
pub struct PipelineReport<T> {
    /// Bytes read from the source
    pub bytes_read: u64,

    /// One entry per consumer, in registration order
    pub outcomes: Vec<ConsumerOutcome<T>>,
}

impl<T> PipelineReport<T> {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConsumerOutcome<T>> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Consumer results in registration order, or the first failure.
    pub fn into_results(self) -> Result<Vec<T>> {
        self.outcomes
            .into_iter()
            .map(|o| {
                let name = o.name;
                o.result
                    .with_context(|| format!("Consumer '{}' failed", name))
            })
            .collect()
    }
}

/// Runs several consumers over one source, each on its own thread.
pub struct FanoutPipeline<'a, T> {
    config: FanoutConfig,
    consumers: Vec<(String, ConsumerFn<'a, T>)>,
}

impl<'a, T: Send> FanoutPipeline<'a, T> {
    pub fn new(config: FanoutConfig) -> Self {
        Self {
            config,
            consumers: Vec::new(),
        }
    }

    /// Registers a consumer. `name` labels its thread and its outcome.
    pub fn consumer<F>(mut self, name: impl Into<String>, consumer: F) -> Self
    where
        F: FnOnce(ReaderHandle) -> Result<T> + Send + 'a,
    {
        self.consumers.push((name.into(), Box::new(consumer)));
        self
    }

    /// Streams `source` to every consumer and waits for all of them.
    ///
    /// A failing or panicking consumer does not stop the others; it shows up
    /// in its [`ConsumerOutcome`]. A source failure fails the whole run.
    pub fn run<R: Read>(self, source: R) -> Result<PipelineReport<T>> {
        let fanout = StreamFanout::with_config(source, self.config)?;
        let readers = self
            .consumers
            .iter()
            .map(|_| fanout.new_reader())
            .collect::<crate::Result<Vec<_>>>()?;

        debug!(consumers = readers.len(), "Starting fanout pipeline");

        let (transferred, outcomes) = thread::scope(|s| -> Result<_> {
            let mut running = Vec::with_capacity(readers.len());
            for ((name, consumer), reader) in self.consumers.into_iter().zip(readers) {
                let spawned = thread::Builder::new()
                    .name(format!("fanout-{}", name))
                    .spawn_scoped(s, move || consumer(reader));
                match spawned {
                    Ok(handle) => running.push((name, handle)),
                    Err(err) => {
                        // Unblocks consumers already started so the scope can end
                        fanout.close();
                        return Err(err)
                            .with_context(|| format!("Failed to spawn consumer '{}'", name));
                    }
                }
            }

            let transferred = fanout.run();

            let outcomes = running
                .into_iter()
                .map(|(name, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("Consumer '{}' panicked", name)));
                    if let Err(err) = &result {
                        warn!(consumer = %name, error = %err, "Fanout consumer failed");
                    }
                    ConsumerOutcome { name, result }
                })
                .collect::<Vec<_>>();

            Ok((transferred, outcomes))
        })?;

        fanout.close();
        let bytes_read = transferred.context("Fanout transfer failed")?;
        debug!(bytes_read, "Fanout pipeline finished");

        Ok(PipelineReport {
            bytes_read,
            outcomes,
        })
    }
}
