use std::sync::Arc;

use super::{command_subservices, ForwardTelemetry, TcHeaderStamp};
use crate::pus::{PusConfig, PusService, SubService};

/// ST[17] test: TC[17,1] are-you-alive and its TM[17,2] report.
#[derive(Debug, Clone)]
pub struct TestService {
    stamp: TcHeaderStamp,
}

impl TestService {
    #[must_use]
    pub fn new(config: &PusConfig) -> Self {
        Self {
            stamp: TcHeaderStamp::new(config),
        }
    }
}

impl PusService for TestService {
    fn service_type(&self) -> u8 {
        17
    }

    fn subservices(&self) -> Vec<(u8, SubService)> {
        let mut subs = command_subservices(self.stamp, &[1]);
        subs.push((2, SubService::Telemetry(Arc::new(ForwardTelemetry))));
        subs
    }
}
