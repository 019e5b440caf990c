/// Memory sampler
///
/// `Idle -> Sampling -> Drained`. One anchor sample (the scope's peak at
/// elapsed 0) is followed by one sample per interval carrying the largest
/// live-counter value seen during that interval. Inside an interval the
/// counter is read back-to-back (optionally paced by `poll_delay`) so that
/// short spikes between interval boundaries are not lost.
use crate::config::types::{Result, Sample};
use crate::exec::CommandSupervisor;
use crate::kernel::cgroup::CounterReader;
use crate::kernel::signal::ShutdownProbe;
use crate::utils::output::SampleSink;
use std::time::{Duration, Instant};

/// Source of live memory readings; any error is fatal to sampling
pub trait CounterSource {
    fn read_counter(&mut self) -> Result<u64>;
}

impl CounterSource for CounterReader {
    fn read_counter(&mut self) -> Result<u64> {
        self.read()
    }
}

/// Liveness of the measured command
pub trait ChildLiveness {
    fn poll_running(&mut self) -> Result<bool>;
}

impl ChildLiveness for CommandSupervisor {
    fn poll_running(&mut self) -> Result<bool> {
        CommandSupervisor::poll_running(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Sampling,
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingOutcome {
    /// The command exited; `samples` includes the anchor
    Drained { samples: u64 },
    /// Shutdown was requested; the interval in progress was dropped
    Interrupted { samples: u64 },
}

pub struct MemorySampler {
    interval: Duration,
    poll_delay: Duration,
    state: SamplerState,
}

impl MemorySampler {
    pub fn new(interval: Duration, poll_delay: Duration) -> Self {
        Self {
            interval,
            poll_delay,
            state: SamplerState::Idle,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Sample until the command exits or shutdown is requested
    pub fn run(
        &mut self,
        anchor_peak: u64,
        counter: &mut dyn CounterSource,
        child: &mut dyn ChildLiveness,
        sink: &mut dyn SampleSink,
        shutdown: &dyn ShutdownProbe,
    ) -> Result<SamplingOutcome> {
        self.state = SamplerState::Sampling;
        log::debug!(
            "Sampling every {:?} (poll delay {:?})",
            self.interval,
            self.poll_delay
        );

        let start = Instant::now();
        sink.write_sample(&Sample {
            index: 0,
            elapsed: Duration::ZERO,
            value: anchor_peak,
        })?;
        let mut samples = 1u64;
        let mut next_boundary = self.interval;

        loop {
            if shutdown.shutdown_requested() {
                return Ok(self.interrupted(samples));
            }
            if !child.poll_running()? {
                self.state = SamplerState::Drained;
                log::debug!("Command exited, sampler drained after {} samples", samples);
                return Ok(SamplingOutcome::Drained { samples });
            }

            let mut max = 0u64;
            let elapsed = loop {
                max = max.max(counter.read_counter()?);

                let now = start.elapsed();
                if now > next_boundary {
                    break now;
                }
                if shutdown.shutdown_requested() {
                    return Ok(self.interrupted(samples));
                }
                if !self.poll_delay.is_zero() {
                    std::thread::sleep(self.poll_delay);
                }
            };

            sink.write_sample(&Sample {
                index: samples,
                elapsed,
                value: max,
            })?;
            samples += 1;
            next_boundary += self.interval;
        }
    }

    fn interrupted(&mut self, samples: u64) -> SamplingOutcome {
        self.state = SamplerState::Drained;
        log::info!("Sampling interrupted after {} samples", samples);
        SamplingOutcome::Interrupted { samples }
    }
}
