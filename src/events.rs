//! Standard simulation events.

// WORKLOAD EVENTS //
pub mod workload {
    use serde::Serialize;

    /// A new arrival burst of a service begins now and lasts `duration`.
    #[derive(Clone, Serialize)]
    pub struct ArrivalBurstStart {
        pub service: usize,
        pub duration: f64,
        pub arrival_rate: f64,
    }

    /// The current arrival burst of a service ends now.
    #[derive(Clone, Serialize)]
    pub struct ArrivalBurstStop {
        pub service: usize,
    }
}

// COALITION FORMATION EVENTS //
pub mod formation {
    use serde::Serialize;

    /// Activation of the coalition formation engine over the simulated
    /// interval `[start_time, stop_time]`.
    #[derive(Clone, Serialize)]
    pub struct CoalitionFormationTrigger {
        pub start_time: f64,
        pub stop_time: f64,
    }
}
