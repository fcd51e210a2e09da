//! Port opener backed by the simulator

use async_trait::async_trait;
use cat_transport::{PortOpener, Transport, TransportError};

use crate::journal::SimJournal;
use crate::rig::{SimConfig, SimulatedRig};

/// Opens simulated rigs that only answer at one baud rate
///
/// Every rig opened shares one journal, so a test can see the canary probes
/// sent at the wrong rates as well as the traffic at the right one.
#[derive(Debug, Clone)]
pub struct SimOpener {
    baud_rate: u32,
    config: SimConfig,
    journal: SimJournal,
}

impl SimOpener {
    /// Rigs opened at `baud_rate` answer, all others stay silent
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            config: SimConfig::default(),
            journal: SimJournal::new(),
        }
    }

    /// Use a custom initial rig state
    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    /// Journal shared by every rig this opener creates
    pub fn journal(&self) -> SimJournal {
        self.journal.clone()
    }
}

#[async_trait]
impl PortOpener for SimOpener {
    async fn open(
        &self,
        _port: &str,
        baud_rate: u32,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let rig = SimulatedRig::from_config(self.config.clone()).with_journal(self.journal.clone());
        if baud_rate == self.baud_rate {
            Ok(Box::new(rig))
        } else {
            Ok(Box::new(rig.deaf()))
        }
    }
}
