use tracing::{debug, warn};

use crate::{
    io::ScratchLayout,
    result::{Error, Result},
    types::{FetchPlan, FetchUnit, MeetingManifest, UnitId},
    vendors::VendorAdapter,
};

/// A meeting along with the units it needs
#[derive(Debug, Clone)]
pub struct MeetingPlan {
    pub manifest: MeetingManifest,
    pub plan: FetchPlan,
}

/// Plans of the meetings of one date
#[derive(Debug, Default)]
pub struct DatePlan {
    pub meetings: Vec<MeetingPlan>,
    /// Manifests rejected before any download
    pub invalid: Vec<(MeetingManifest, Error)>,
}

impl DatePlan {
    /// Every unit of the date, each shared stream only once
    pub fn merged(&self) -> FetchPlan {
        let mut merged = FetchPlan::default();
        for meeting in &self.meetings {
            merged.merge(meeting.plan.clone());
        }
        merged
    }
}

/// Turns manifests into units placed in the scratch tree
#[derive(Debug)]
pub struct Planner<'a> {
    adapter: &'a dyn VendorAdapter,
    layout: &'a ScratchLayout,
}

impl<'a> Planner<'a> {
    pub fn new(adapter: &'a dyn VendorAdapter, layout: &'a ScratchLayout) -> Self {
        Self { adapter, layout }
    }

    /// Validate the manifest then plan its units, in manifest order
    pub fn plan(&self, manifest: &MeetingManifest) -> Result<FetchPlan> {
        manifest.validate()?;
        if manifest.is_empty() {
            warn!("Meeting {manifest} has no video");
            return Ok(FetchPlan::default());
        }

        let ext = manifest.vendor.unit_extension();
        let id = manifest.id();
        let units = self
            .adapter
            .plan_units(manifest)?
            .into_iter()
            .map(|descriptor| {
                let owner = descriptor.shared_stream.as_deref().unwrap_or(&id);
                FetchUnit::new(
                    UnitId::new(owner, descriptor.index),
                    descriptor.index,
                    self.adapter.resource_locator_for(&descriptor),
                    self.layout.unit_path(manifest, owner, descriptor.index, ext),
                    descriptor.expected_size,
                )
            })
            .collect::<Vec<_>>();

        debug!("Meeting {id}: {} units planned", units.len());
        Ok(FetchPlan { units })
    }

    /// Plan every manifest, keeping the invalid ones aside
    pub fn plan_all(&self, manifests: Vec<MeetingManifest>) -> DatePlan {
        let mut date_plan = DatePlan::default();
        for manifest in manifests {
            match self.plan(&manifest) {
                Ok(plan) => date_plan.meetings.push(MeetingPlan { manifest, plan }),
                Err(err) => {
                    warn!("{err}");
                    date_plan.invalid.push((manifest, err));
                }
            }
        }
        date_plan
    }
}
