//! Date shifting for timeline drags.
//!
//! Moving a dated task by `delta` days moves every dated task below it by the
//! same amount, so each keeps its duration and its offset from the parent.
//! Undated descendants stay unscheduled. The result is a flat list of
//! patches meant to be applied in a single batch update.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::task::{Task, TaskId, TaskPatch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulePatch {
    pub id: TaskId,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Patches for `task` and all of its dated descendants.
///
/// Fails with `InvalidArgument` when the shift, or any shifted date, falls
/// outside the calendar range chrono can represent.
pub fn cascade(task: &Task, delta_days: i64) -> Result<Vec<SchedulePatch>> {
    let delta = Duration::try_days(delta_days).ok_or_else(|| out_of_range(delta_days))?;
    let mut patches = Vec::new();
    collect(task, delta, &mut patches).ok_or_else(|| out_of_range(delta_days))?;
    Ok(patches)
}

fn collect(task: &Task, delta: Duration, patches: &mut Vec<SchedulePatch>) -> Option<()> {
    if task.is_dated() {
        let shift = |day: Option<NaiveDate>| match day {
            Some(day) => day.checked_add_signed(delta).map(Some),
            None => Some(None),
        };
        patches.push(SchedulePatch {
            id: task.id.clone(),
            start_date: shift(task.start_date)?,
            end_date: shift(task.end_date)?,
        });
    }
    for child in &task.subtasks {
        collect(child, delta, patches)?;
    }
    Some(())
}

fn out_of_range(delta_days: i64) -> Error {
    Error::InvalidArgument(format!("shift out of range: {delta_days} day(s)"))
}

/// Turn schedule patches into the id-keyed form `tree::update_multiple` takes.
pub fn patches_to_updates(patches: &[SchedulePatch]) -> HashMap<TaskId, TaskPatch> {
    patches
        .iter()
        .map(|patch| {
            (
                patch.id.clone(),
                TaskPatch::dates(patch.start_date, patch.end_date),
            )
        })
        .collect()
}
