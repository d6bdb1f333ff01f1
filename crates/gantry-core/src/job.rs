//! Job configuration.

use crate::step::{GetStep, HookKind, StepConfig};

/// A job as declared in a pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobConfig {
    pub name: String,
    pub plan: Vec<StepConfig>,
    /// Shorthand for "one build at a time, in a group named after the job".
    pub serial: bool,
    pub serial_groups: Vec<String>,
    /// Explicit `max-in-flight`; 0 when unset.
    pub raw_max_in_flight: u32,
    pub public: bool,
    pub disable_manual_trigger: bool,
    pub on_success: Option<StepConfig>,
    pub on_failure: Option<StepConfig>,
    pub on_abort: Option<StepConfig>,
    pub on_error: Option<StepConfig>,
    pub ensure: Option<StepConfig>,
}

impl JobConfig {
    /// Maximum number of concurrently running builds across the job's serial
    /// groups; 0 means unlimited.
    pub fn max_in_flight(&self) -> u32 {
        if self.serial || !self.serial_groups.is_empty() {
            return 1;
        }

        self.raw_max_in_flight
    }

    /// Serial groups the job's builds are counted against.
    ///
    /// A job that is serial, or limits its in-flight builds, without naming any
    /// groups forms an implicit group of its own name.
    pub fn serial_groups(&self) -> Vec<String> {
        if !self.serial_groups.is_empty() {
            return self.serial_groups.clone();
        }

        if self.serial || self.raw_max_in_flight > 0 {
            return vec![self.name.clone()];
        }

        Vec::new()
    }

    fn hook(&self, kind: HookKind) -> Option<&StepConfig> {
        match kind {
            HookKind::OnSuccess => self.on_success.as_ref(),
            HookKind::OnFailure => self.on_failure.as_ref(),
            HookKind::OnAbort => self.on_abort.as_ref(),
            HookKind::OnError => self.on_error.as_ref(),
            HookKind::Ensure => self.ensure.as_ref(),
        }
    }

    /// The job's whole plan as one step: its steps in sequence, wrapped in
    /// the job-level hooks.
    pub fn step_config(&self) -> StepConfig {
        let mut step = StepConfig::Do(self.plan.clone());

        for kind in HookKind::ALL {
            if let Some(hook) = self.hook(kind) {
                step = step.with_hook(kind, hook.clone());
            }
        }

        step
    }

    /// Every get step in the job, hooks included.
    pub fn inputs(&self) -> Vec<&GetStep> {
        let mut gets = Vec::new();

        for step in &self.plan {
            collect_gets(step, &mut gets);
        }
        for kind in HookKind::ALL {
            if let Some(hook) = self.hook(kind) {
                collect_gets(hook, &mut gets);
            }
        }

        gets
    }
}

fn collect_gets<'a>(step: &'a StepConfig, gets: &mut Vec<&'a GetStep>) {
    step.each(&mut |s| {
        if let StepConfig::Get(get) = s {
            gets.push(get);
        }
    });
}
