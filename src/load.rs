//! In-process load generator for the association write path.
//!
//! Widgets are named `widget_sn_<n>`. Each association picks a random owner
//! and peer from that pool and cycles the port through P, R, Q. A fixed seed
//! replays the same sequence.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::error::{PortmeshError, Result};
use crate::service::WidgetService;
use crate::types::{PortSet, PortType, Widget};

/// Associations between progress reports.
pub const REPORT_EVERY: usize = 1000;

const PORT_CYCLE: [PortType; 3] = [PortType::P, PortType::R, PortType::Q];

/// What to generate.
#[derive(Clone, Debug)]
pub struct LoadPlan {
    /// Size of the widget pool.
    pub widgets: usize,
    /// Associations to write.
    pub associations: usize,
    /// RNG seed.
    pub seed: u64,
    /// Create every pool widget before writing associations.
    pub create_widgets: bool,
}

impl Default for LoadPlan {
    fn default() -> Self {
        Self {
            widgets: 1000,
            associations: 10_000,
            seed: 0,
            create_widgets: true,
        }
    }
}

/// Outcome of [`run`].
#[derive(Clone, Debug, Default)]
pub struct LoadReport {
    /// Widgets created in the durable store.
    pub widgets_created: usize,
    /// Association writes that succeeded.
    pub associations: usize,
    /// Wall time spent writing associations.
    pub elapsed: Duration,
}

impl LoadReport {
    /// Association writes per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.associations as f64 / secs
    }
}

/// Serial number of pool widget `n`.
pub fn widget_serial(n: usize) -> String {
    format!("widget_sn_{n}")
}

/// Runs `plan` against `service`. `on_progress` receives the running count
/// and the time taken by the last [`REPORT_EVERY`] writes.
pub fn run(
    service: &WidgetService,
    plan: &LoadPlan,
    mut on_progress: impl FnMut(usize, Duration),
) -> Result<LoadReport> {
    if plan.widgets == 0 {
        return Err(PortmeshError::invalid("load plan needs at least one widget"));
    }
    let mut report = LoadReport::default();

    if plan.create_widgets {
        for n in 0..plan.widgets {
            let widget = Widget::new(format!("widget_name_{n}"), widget_serial(n), PortSet::all());
            match service.create_widget(&widget) {
                Ok(_) => report.widgets_created += 1,
                // Pools are reused across runs against the same database.
                Err(PortmeshError::InvalidArgument(_)) => {}
                Err(err) => return Err(err),
            }
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(plan.seed);
    let started = Instant::now();
    let mut window = started;
    for i in 1..=plan.associations {
        let owner = widget_serial(rng.gen_range(0..plan.widgets));
        let peer = widget_serial(rng.gen_range(0..plan.widgets));
        let port = PORT_CYCLE[i % PORT_CYCLE.len()];
        service.create_connection(&owner, port, &peer)?;
        report.associations += 1;
        if i % REPORT_EVERY == 0 {
            on_progress(i, window.elapsed());
            window = Instant::now();
        }
    }
    report.elapsed = started.elapsed();

    info!(
        widgets_created = report.widgets_created,
        associations = report.associations,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "load.finished"
    );
    Ok(report)
}
