//! Shares one `ResourceMonitor` between `GroupQueue`'s admission check and the
//! HTTP `/status` route, so both read the same CPU/memory snapshot instead of
//! sampling `/proc` twice per tick.

use std::sync::Mutex;

use agentflow_queue::Capacity;
use agentflow_resource::{ResourceMonitor, ResourceStats};

pub struct SharedResourceMonitor(Mutex<ResourceMonitor>);

impl SharedResourceMonitor {
    pub fn new(base_max: usize) -> Self {
        Self(Mutex::new(ResourceMonitor::new(base_max)))
    }
}

impl Capacity for SharedResourceMonitor {
    fn current_max(&self) -> usize {
        self.0.lock().expect("resource monitor mutex poisoned").update()
    }
}

impl agentflow_http::state::ResourceStatsSource for SharedResourceMonitor {
    fn stats(&self) -> ResourceStats {
        self.0.lock().expect("resource monitor mutex poisoned").stats()
    }
}
