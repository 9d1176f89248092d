//! M/M/c mean-delay prediction for service sizing.
//!
//! Given the peak arrival rate of a service, the per-VM service rate and the
//! delay bound of its SLA, the model computes the smallest number of VM
//! replicas whose predicted mean sojourn time honors the bound, together with
//! the whole delay-vs-replica-count table the placement optimizer prices SLA
//! violations from.

use log::warn;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::float;

#[derive(Debug, Clone, Serialize)]
pub struct MmcQueue {
    lambda: f64,
    mu: f64,
    max_delay: f64,
    tolerance: f64,
    delays: Vec<f64>,
}

impl MmcQueue {
    /// Creates the model for arrival rate `lambda`, per-server service rate
    /// `mu` and delay bound `max_delay`. A bound below the bare service time
    /// `1/mu` cannot be met by any number of servers, so it is clamped to
    /// `1/mu` (no queueing admitted).
    pub fn new(lambda: f64, mu: f64, max_delay: f64, tolerance: f64) -> Result<Self> {
        if !(lambda >= 0.0) || !lambda.is_finite() {
            return Err(Error::InvalidArgument(
                "arrival rate must be finite and non-negative".to_string(),
            ));
        }
        if !(mu > 0.0) || !mu.is_finite() {
            return Err(Error::InvalidArgument(
                "service rate must be finite and positive".to_string(),
            ));
        }
        let mut max_delay = max_delay;
        if float::definitely_less(max_delay, 1.0 / mu, tolerance) {
            warn!(
                "unfeasible delay bound {}: clamping to the service time {} (no queue admitted)",
                max_delay,
                1.0 / mu
            );
            max_delay = 1.0 / mu;
        }
        Ok(Self {
            lambda,
            mu,
            max_delay,
            tolerance,
            delays: Vec::new(),
        })
    }

    /// Finds the minimum number of servers `c` whose predicted mean sojourn
    /// time does not exceed the delay bound, filling the delay table for
    /// every intermediate server count along the way.
    pub fn compute_queue_parameters(&mut self) -> Result<usize> {
        self.delays.clear();
        let mut delay = f64::INFINITY;
        let mut c = 0;
        while float::definitely_greater(delay, self.max_delay, self.tolerance) {
            c += 1;
            delay = self.erlang_c_sojourn(c)?;
            self.delays.push(delay);
        }
        Ok(c)
    }

    /// Mean sojourn time of an M/M/c queue with `c` servers, through the
    /// iterative Erlang-C recurrence. An overloaded station (`rho/c >= 1`)
    /// yields an infinite sojourn.
    fn erlang_c_sojourn(&self, c: usize) -> Result<f64> {
        let rho = self.lambda / self.mu;
        if float::essentially_greater_equal(rho / c as f64, 1.0, self.tolerance) {
            return Ok(f64::INFINITY);
        }
        // Iterative form of the Erlang-B recurrence; the queueing probability
        // follows from it without evaluating any factorial directly.
        let mut pb = 1.0;
        for j in 1..=c {
            pb = (rho * pb) / (j as f64 + pb * rho);
        }
        if !pb.is_finite() {
            return Err(Error::Overflow(
                "Erlang recurrence diverged".to_string(),
            ));
        }
        let util = rho / c as f64;
        let pq = pb / (1.0 - util + util * pb);
        Ok(pq / (c as f64 * self.mu - self.lambda) + 1.0 / self.mu)
    }

    /// Predicted mean sojourn by server count: `delays()[0]` is infinite (no
    /// replica serves the load at all) and the table is non-increasing.
    pub fn delays(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.delays.len() + 1);
        out.push(f64::INFINITY);
        out.extend_from_slice(&self.delays);
        out
    }

    /// Predicted mean sojourn with `c` servers; counts beyond the computed
    /// table are clamped to its last entry.
    pub fn delay(&self, c: usize) -> f64 {
        if c == 0 {
            return f64::INFINITY;
        }
        let c = c.min(self.delays.len());
        self.delays[c - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-5;

    #[test]
    fn test_single_server_suffices() {
        // lambda=5, mu=10: W = Pq/(mu-lambda) + 1/mu <= 1.0 already with c=1.
        let mut q = MmcQueue::new(5.0, 10.0, 1.0, TOL).unwrap();
        let c = q.compute_queue_parameters().unwrap();
        assert_eq!(c, 1);
        let delays = q.delays();
        assert!(delays[0].is_infinite());
        assert!(delays[1] <= 1.0 + TOL);
        // M/M/1: W = 1/(mu - lambda) = 0.2.
        assert!((delays[1] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_overload_needs_more_servers() {
        // lambda=9, mu=10, bound 0.2: a single server gives W=1.0, so the
        // model must scale out.
        let mut q = MmcQueue::new(9.0, 10.0, 0.2, TOL).unwrap();
        let c = q.compute_queue_parameters().unwrap();
        assert!(c > 1);
        let delays = q.delays();
        assert!(delays[c] <= 0.2 + TOL);
        for w in delays.windows(2).skip(1) {
            assert!(w[1] <= w[0] + 1e-12, "delay table must be non-increasing");
        }
    }

    #[test]
    fn test_saturated_station_is_skipped() {
        // lambda=25, mu=10: c=1 and c=2 are saturated and predict infinity.
        let mut q = MmcQueue::new(25.0, 10.0, 0.5, TOL).unwrap();
        let c = q.compute_queue_parameters().unwrap();
        assert!(c >= 3);
        let delays = q.delays();
        assert!(delays[1].is_infinite());
        assert!(delays[2].is_infinite());
        assert!(delays[c].is_finite());
    }

    #[test]
    fn test_delay_bound_clamped_to_service_time() {
        // Bound below 1/mu is unreachable; it is clamped and one server
        // serves an idle stream at exactly the service time.
        let mut q = MmcQueue::new(0.0, 10.0, 0.01, TOL).unwrap();
        let c = q.compute_queue_parameters().unwrap();
        assert_eq!(c, 1);
        assert!((q.delay(1) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_delay_accessor_clamps() {
        let mut q = MmcQueue::new(5.0, 10.0, 1.0, TOL).unwrap();
        q.compute_queue_parameters().unwrap();
        assert!(q.delay(0).is_infinite());
        assert_eq!(q.delay(100), q.delay(1));
    }

    #[test]
    fn test_invalid_rates_rejected() {
        assert!(MmcQueue::new(-1.0, 10.0, 1.0, TOL).is_err());
        assert!(MmcQueue::new(1.0, 0.0, 1.0, TOL).is_err());
        assert!(MmcQueue::new(f64::INFINITY, 10.0, 1.0, TOL).is_err());
    }
}
