//! View model for a remote control: which location is shown and the last known level of
//! every group.
//!
//! Levels arrive from two directions. Bus events go through `apply_remote`, which marks the
//! group suspended while the view refreshes so the refresh can't be echoed back as a
//! command. User input goes through `switch_changed` / `slider_changed`, which return the
//! command to send; the level only changes once `command_sent` confirms it went out.

use crate::client::{Command, GroupAddress, Level, SessionEvent};
use crate::project::LocationId;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct LightBoard {
    location: LocationId,
    levels: BTreeMap<GroupAddress, Level>,
    suspended: BTreeSet<GroupAddress>,
}

impl LightBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(&self) -> LocationId {
        self.location
    }

    pub fn set_location(&mut self, location: LocationId) {
        log::debug!("changing to location {}", location);
        self.location = location;
    }

    /// Last known level; `None` until the group has been reported.
    pub fn level(&self, group: GroupAddress) -> Option<Level> {
        self.levels.get(&group).copied()
    }

    /// Switches show On for any level above zero.
    pub fn is_on(&self, group: GroupAddress) -> bool {
        self.level(group).is_some_and(|l| l > 0.0)
    }

    pub fn is_suspended(&self, group: GroupAddress) -> bool {
        self.suspended.contains(&group)
    }

    /// Apply a level reported by the bus. `refresh` redraws the group's widgets; any change
    /// they report back during the refresh is swallowed.
    pub fn apply_remote<F>(&mut self, group: GroupAddress, level: Level, refresh: F)
    where
        F: FnOnce(&mut Self),
    {
        self.suspended.insert(group);
        self.levels.insert(group, level);
        refresh(self);
        self.suspended.remove(&group);
    }

    /// Fold a session event into the board. Returns the groups whose level changed.
    pub fn apply_event(&mut self, event: &SessionEvent) -> Vec<GroupAddress> {
        let updates: Vec<(GroupAddress, Level)> = match event {
            SessionEvent::GroupOn { groups, .. } => groups.iter().map(|g| (*g, 1.0)).collect(),
            SessionEvent::GroupOff { groups, .. } => groups.iter().map(|g| (*g, 0.0)).collect(),
            SessionEvent::GroupRamp { group, level, .. } => vec![(*group, *level)],
            SessionEvent::States(states) => states.iter().map(|(g, l)| (*g, *l)).collect(),
            SessionEvent::Connected | SessionEvent::Disconnected(_) => Vec::new(),
        };
        updates
            .into_iter()
            .map(|(group, level)| {
                self.apply_remote(group, level, |_| {});
                group
            })
            .collect()
    }

    /// The user flipped a switch. Returns the command to send, or `None` while the group is
    /// being refreshed from the bus.
    pub fn switch_changed(&self, group: GroupAddress, on: bool) -> Option<Command> {
        if self.is_suspended(group) {
            return None;
        }
        Some(if on {
            Command::LightingGroupOn(vec![group])
        } else {
            Command::LightingGroupOff(vec![group])
        })
    }

    /// The user moved a slider. Sliders jump straight to the level (zero-second ramp).
    pub fn slider_changed(&self, group: GroupAddress, level: Level) -> Option<Command> {
        if self.is_suspended(group) {
            return None;
        }
        Some(Command::LightingGroupRamp {
            group,
            duration: 0,
            level,
        })
    }

    /// Record the level a command asked for, once it has been handed to the session.
    pub fn command_sent(&mut self, command: &Command) {
        match command {
            Command::LightingGroupOn(groups) => {
                self.levels.extend(groups.iter().map(|g| (*g, 1.0)));
            }
            Command::LightingGroupOff(groups) => {
                self.levels.extend(groups.iter().map(|g| (*g, 0.0)));
            }
            Command::LightingGroupRamp { group, level, .. } => {
                self.levels.insert(*group, *level);
            }
            Command::LightingGroupTerminateRamp(_) | Command::GetLightStates(_) => {}
        }
    }
}
