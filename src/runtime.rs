use hifitime::prelude::{Duration, Epoch, TimeScale};

#[derive(Debug)]
pub struct Runtime {
    /// Current [Epoch]
    pub epoch: Epoch,

    /// Epoch of deployment
    deploy_time: Epoch,

    /// Uptime as [Duration]
    pub uptime: Duration,

    /// Completed inbox polling cycles
    pub cycles: u64,

    /// Inbound messages dispatched so far
    pub dispatched: u64,
}

impl Runtime {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            deploy_time: epoch,
            uptime: Duration::ZERO,
            cycles: 0,
            dispatched: 0,
        }
    }

    /// Latch a completed polling cycle
    pub fn new_cycle(&mut self, epoch: Epoch, dispatched: usize) {
        self.epoch = epoch;
        self.uptime = epoch - self.deploy_time;
        self.cycles += 1;
        self.dispatched += dispatched as u64;
    }

    /// Returns current epoch in [TimeScale::UTC], rounded for logging
    pub fn utc_time(&self) -> Epoch {
        self.epoch.to_time_scale(TimeScale::UTC).round(Duration::from_seconds(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_and_uptime() {
        let t0 = Epoch::from_gregorian_utc_at_midnight(2024, 1, 1);
        let mut rtm = Runtime::new(t0);

        rtm.new_cycle(t0 + Duration::from_seconds(60.0), 2);
        rtm.new_cycle(t0 + Duration::from_seconds(120.0), 0);

        assert_eq!(rtm.cycles, 2);
        assert_eq!(rtm.dispatched, 2);
        assert_eq!(rtm.uptime, Duration::from_seconds(120.0));
        assert_eq!(rtm.utc_time(), t0 + Duration::from_seconds(120.0));
    }
}
