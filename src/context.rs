//! Per-invocation test context.
//!
//! Bundles the collaborators every step needs: topology, site universe,
//! result sink, and one controller per channel family. Cloning is cheap;
//! everything is behind `Arc` so fan-out branches can own what they use.

use semitest_core::capabilities::{
    ChannelFamilyController, ResultPublisher, SiteUniverse, TopologyLookup,
};
use semitest_core::error::{TestError, TestResult};
use semitest_core::family::ChannelFamily;
use semitest_core::limits::LOWEST_CURRENT_LIMIT;
use semitest_core::partition::PinPartition;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct TestContext {
    topology: Arc<dyn TopologyLookup>,
    sites: Arc<dyn SiteUniverse>,
    publisher: Arc<dyn ResultPublisher>,
    controllers: BTreeMap<ChannelFamily, Arc<dyn ChannelFamilyController>>,
    lowest_current_limit: f64,
}

impl TestContext {
    pub fn new(
        topology: Arc<dyn TopologyLookup>,
        sites: Arc<dyn SiteUniverse>,
        publisher: Arc<dyn ResultPublisher>,
    ) -> Self {
        Self {
            topology,
            sites,
            publisher,
            controllers: BTreeMap::new(),
            lowest_current_limit: LOWEST_CURRENT_LIMIT,
        }
    }

    /// Register the controller for its family, replacing any previous one.
    pub fn with_controller(mut self, controller: Arc<dyn ChannelFamilyController>) -> Self {
        self.controllers.insert(controller.family(), controller);
        self
    }

    /// Override the current limit used by the power-down bracket.
    pub fn with_lowest_current_limit(mut self, amps: f64) -> Self {
        self.lowest_current_limit = amps;
        self
    }

    pub fn lowest_current_limit(&self) -> f64 {
        self.lowest_current_limit
    }

    pub fn topology(&self) -> &dyn TopologyLookup {
        self.topology.as_ref()
    }

    pub fn site_numbers(&self) -> Vec<u32> {
        self.sites.site_numbers()
    }

    pub fn publisher(&self) -> &dyn ResultPublisher {
        self.publisher.as_ref()
    }

    pub fn controller(&self, family: ChannelFamily) -> TestResult<Arc<dyn ChannelFamilyController>> {
        self.controllers
            .get(&family)
            .cloned()
            .ok_or(TestError::FamilyNotAvailable(family))
    }

    /// Resolve `pins` and check a controller exists for every family they use.
    pub fn resolve(&self, pins: &[String]) -> TestResult<PinPartition> {
        let partition = PinPartition::resolve(self.topology(), pins)?;
        for family in partition.families() {
            self.controller(family)?;
        }
        Ok(partition)
    }
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("families", &self.controllers.keys().collect::<Vec<_>>())
            .field("lowest_current_limit", &self.lowest_current_limit)
            .finish()
    }
}
