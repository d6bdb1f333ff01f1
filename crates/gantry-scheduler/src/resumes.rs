//! Builds this process is currently resuming.
//!
//! Shared by the build starter and the tracker so a build is driven by at
//! most one resume, whichever of them gets to it first.

use std::sync::Arc;

use dashmap::DashSet;
use gantry_core::BuildId;

#[derive(Clone, Default)]
pub struct Resumes {
    running: Arc<DashSet<BuildId>>,
}

impl Resumes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for a resume; `None` if it is already claimed.
    pub fn claim(&self, id: BuildId) -> Option<Claim> {
        self.running.insert(id).then(|| Claim {
            id,
            running: Arc::clone(&self.running),
        })
    }

    pub fn contains(&self, id: BuildId) -> bool {
        self.running.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

/// Releases the build when the resume holding it ends, however it ends.
pub struct Claim {
    id: BuildId,
    running: Arc<DashSet<BuildId>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.running.remove(&self.id);
    }
}
