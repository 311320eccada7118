// ABOUTME: Read-only progress monitor - polls source and target counts while a copy runs elsewhere
// ABOUTME: Shows one progress bar per table with the copy rate in rows/min and an ETA

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::endpoint::Connector;
use crate::error::{Result, SyncError};
use crate::inventory::{TableInventory, TableSpec};

/// Copy rate estimated from the first and latest observation.
#[derive(Debug, Clone, Default)]
pub struct RateTracker {
    first: Option<(Duration, u64)>,
    last: Option<(Duration, u64)>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `copied` rows observed `at` since monitoring started.
    pub fn record(&mut self, at: Duration, copied: u64) {
        if self.first.is_none() {
            self.first = Some((at, copied));
        }
        self.last = Some((at, copied));
    }

    /// Rows per minute between the first and latest observation.
    pub fn rows_per_minute(&self) -> Option<f64> {
        let ((t0, c0), (t1, c1)) = (self.first?, self.last?);
        let minutes = t1.checked_sub(t0)?.as_secs_f64() / 60.0;
        if minutes <= 0.0 || c1 <= c0 {
            return None;
        }
        Some((c1 - c0) as f64 / minutes)
    }

    /// Time left to reach `total` at the current rate.
    pub fn eta(&self, total: u64) -> Option<Duration> {
        let (_, copied) = self.last?;
        if copied >= total {
            return Some(Duration::ZERO);
        }
        let rate = self.rows_per_minute()?;
        Some(Duration::from_secs_f64((total - copied) as f64 / rate * 60.0))
    }
}

fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        Some(d) if d.is_zero() => "done".to_string(),
        Some(d) => {
            let secs = d.as_secs();
            format!("ETA {:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
        None => "ETA --:--:--".to_string(),
    }
}

struct TableBar {
    bar: ProgressBar,
    rate: RateTracker,
}

/// Polls counts on both endpoints and renders progress. Never writes.
pub struct Monitor<'a> {
    source: &'a dyn Connector,
    target: &'a dyn Connector,
    interval: Duration,
}

impl<'a> Monitor<'a> {
    pub fn new(source: &'a dyn Connector, target: &'a dyn Connector, interval: Duration) -> Self {
        Self {
            source,
            target,
            interval,
        }
    }

    /// Run until a message arrives on `shutdown`.
    pub async fn run(
        &self,
        inventory: &TableInventory,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let started = Instant::now();
        let multi = MultiProgress::new();
        let style = ProgressStyle::with_template(
            "{msg:32} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {prefix}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

        let mut bars: Vec<TableBar> = inventory
            .iter()
            .map(|spec| {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(style.clone());
                bar.set_message(spec.target_name());
                TableBar {
                    bar,
                    rate: RateTracker::new(),
                }
            })
            .collect();

        tracing::info!(
            "Monitoring {} table(s) every {:?}; press Ctrl+C to stop",
            inventory.len(),
            self.interval
        );

        loop {
            // A poll blocked on an unreachable endpoint must not delay shutdown
            let interrupted = tokio::select! {
                biased;
                _ = self.refresh(inventory, &mut bars, started) => false,
                _ = shutdown.recv() => true,
            };
            if interrupted {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        for table in &bars {
            table.bar.abandon();
        }
        tracing::info!("Monitor stopped");
        Ok(())
    }

    /// Poll every table once and update its bar.
    async fn refresh(&self, inventory: &TableInventory, bars: &mut [TableBar], started: Instant) {
        for (spec, table) in inventory.iter().zip(bars.iter_mut()) {
            match self.poll(spec).await {
                Ok((source_count, target_count)) => {
                    table.rate.record(started.elapsed(), target_count);
                    table.bar.set_length(source_count);
                    table.bar.set_position(target_count.min(source_count));
                    let rate = table
                        .rate
                        .rows_per_minute()
                        .map(|r| format!("{:.0} rows/min", r))
                        .unwrap_or_else(|| "-- rows/min".to_string());
                    table
                        .bar
                        .set_prefix(format!("{} | {}", rate, format_eta(table.rate.eta(source_count))));
                }
                Err(e) => {
                    table.bar.set_prefix(format!("error: {}", e));
                    tracing::debug!("{}: count failed: {}", spec.target_name(), e);
                }
            }
        }
    }

    /// Source and target counts; a missing target table counts as zero.
    async fn poll(&self, spec: &TableSpec) -> Result<(u64, u64)> {
        let source_count = {
            let mut source = self.source.connect().await?;
            source.count_rows(&spec.source_schema, &spec.name).await?
        };
        let target_count = {
            let mut target = self.target.connect().await?;
            match target.count_rows(&spec.target_schema, &spec.name).await {
                Ok(count) => count,
                Err(SyncError::MissingTable { .. }) => 0,
                Err(e) => return Err(e),
            }
        };
        Ok((source_count, target_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_needs_two_observations() {
        let mut rate = RateTracker::new();
        assert_eq!(rate.rows_per_minute(), None);
        rate.record(Duration::from_secs(0), 1_000);
        assert_eq!(rate.rows_per_minute(), None);
        assert_eq!(rate.eta(5_000), None);
    }

    #[test]
    fn test_rate_and_eta() {
        let mut rate = RateTracker::new();
        rate.record(Duration::from_secs(0), 1_000);
        rate.record(Duration::from_secs(30), 1_500);
        rate.record(Duration::from_secs(60), 2_000);

        assert_eq!(rate.rows_per_minute(), Some(1_000.0));
        // 3000 rows left at 1000 rows/min
        assert_eq!(rate.eta(5_000), Some(Duration::from_secs(180)));
    }

    #[test]
    fn test_eta_when_complete() {
        let mut rate = RateTracker::new();
        rate.record(Duration::from_secs(5), 5_000);
        assert_eq!(rate.eta(5_000), Some(Duration::ZERO));
        assert_eq!(format_eta(rate.eta(5_000)), "done");
    }

    #[test]
    fn test_stalled_copy_has_no_rate() {
        let mut rate = RateTracker::new();
        rate.record(Duration::from_secs(0), 100);
        rate.record(Duration::from_secs(60), 100);
        assert_eq!(rate.rows_per_minute(), None);
        assert_eq!(format_eta(rate.eta(200)), "ETA --:--:--");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(
            format_eta(Some(Duration::from_secs(3 * 3600 + 25 * 60 + 7))),
            "ETA 03:25:07"
        );
    }
}
