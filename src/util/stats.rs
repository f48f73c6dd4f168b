// Transfer statistics
// (c) 2024 Ross Younger

use human_repr::{HumanCount, HumanDuration, HumanThroughput};
use std::{fmt::Display, time::Duration};

/// Human friendly output helper
#[derive(Debug, Clone, Copy)]
pub struct DataRate {
    /// Bytes per second; if None, we were unable to compute a rate.
    rate: Option<f64>,
}

impl DataRate {
    pub fn new(bytes: u64, time: Option<Duration>) -> Self {
        match time {
            None => Self { rate: None },
            Some(time) if time.is_zero() => Self { rate: None }, // divide by zero is not meaningful
            Some(time) => Self {
                rate: Some((bytes as f64) / time.as_secs_f64()),
            },
        }
    }
    pub fn byte_rate(&self) -> Option<f64> {
        self.rate
    }
    pub fn bit_rate(&self) -> Option<f64> {
        self.rate.map(|r| r * 8.)
    }

    /// Display adapter for the rate in bits per second (`8Mbit/s`)
    pub fn bits(&self) -> BitRate {
        BitRate(self.bit_rate())
    }
}

impl Display for DataRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.byte_rate() {
            None => f.write_str("unknown"),
            Some(rate) => rate.human_throughput_bytes().fmt(f),
        }
    }
}

/// See [`DataRate::bits`]
#[derive(Debug, Clone, Copy)]
pub struct BitRate(Option<f64>);

impl Display for BitRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            None => f.write_str("unknown"),
            Some(rate) => rate.human_throughput("bit").fmt(f),
        }
    }
}

/// One-line summary of a finished transfer, as shown to the sender
pub(crate) fn transfer_summary(payload_bytes: u64, elapsed: Option<Duration>) -> String {
    let size = payload_bytes.human_count_bytes();
    let rate = DataRate::new(payload_bytes, elapsed);
    let elapsed_str = elapsed
        .map(|d| d.human_duration().to_string())
        .unwrap_or("unknown".to_string());
    format!("Transferred {size} in {elapsed_str}; average {}", rate.bits())
}
