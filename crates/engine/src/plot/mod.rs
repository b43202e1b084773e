//! Plot values.
//!
//! A `Plot` is an immutable-style value: every `with_*` method consumes the
//! plot and returns the updated one, leaving it untouched when the change is
//! a no-op. `PlotWorld` stores plots behind `Arc`, so a snapshot taken before
//! an update keeps seeing the old value.

pub mod direction;
pub mod flag;
pub mod id;

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

pub use direction::{DirectionSet, MergeDirection, ParseDirectionError};
pub use flag::{PlotFlag, ParseFlagError, format_flag_value, is_reset_keyword, parse_flag_value};
pub use id::{ParsePlotIdError, PlotBounds, PlotId};

/// Label shown for plots nobody owns.
pub const UNKNOWN_OWNER: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plot {
    id: PlotId,
    owner: Option<Uuid>,
    owner_name: Option<String>,
    home: bool,
    trusted: BTreeSet<Uuid>,
    denied: BTreeSet<Uuid>,
    flags: BTreeMap<String, String>,
    merged: DirectionSet,
}

impl Plot {
    /// The unclaimed default plot for `id`.
    pub fn new(id: PlotId) -> Self {
        Self {
            id,
            owner: None,
            owner_name: None,
            home: false,
            trusted: BTreeSet::new(),
            denied: BTreeSet::new(),
            flags: BTreeMap::new(),
            merged: DirectionSet::EMPTY,
        }
    }

    pub fn id(&self) -> PlotId {
        self.id
    }

    pub fn owner(&self) -> Option<Uuid> {
        self.owner
    }

    pub fn owner_name(&self) -> Option<&str> {
        self.owner_name.as_deref()
    }

    /// Display name, falling back to the owner UUID, then to "Unknown".
    pub fn owner_label(&self) -> String {
        match (&self.owner_name, self.owner) {
            (Some(name), Some(_)) => name.clone(),
            (_, Some(owner)) => owner.to_string(),
            (_, None) => UNKNOWN_OWNER.to_string(),
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.owner.is_some()
    }

    pub fn is_owner(&self, player: Uuid) -> bool {
        self.owner == Some(player)
    }

    pub fn is_home(&self) -> bool {
        self.home
    }

    pub fn trusted(&self) -> &BTreeSet<Uuid> {
        &self.trusted
    }

    pub fn denied(&self) -> &BTreeSet<Uuid> {
        &self.denied
    }

    /// Stored flag values, keyed by lower-case flag name. Only non-default
    /// values and unrecognised keys appear here.
    pub fn flags(&self) -> &BTreeMap<String, String> {
        &self.flags
    }

    pub fn merged_directions(&self) -> DirectionSet {
        self.merged
    }

    /// Whether this plot carries the merge bit for `direction`. This is only
    /// one half of a merge; see `PlotWorld::is_merged` for the effective
    /// relation.
    pub fn has_merge_bit(&self, direction: MergeDirection) -> bool {
        self.merged.contains(direction)
    }

    /// Assign an owner. A different owner (or none) wipes all settings, merge
    /// links and the home flag; the same owner only updates the display name.
    #[must_use]
    pub fn with_owner(self, owner: Option<Uuid>, owner_name: Option<String>) -> Self {
        if self.owner != owner {
            let mut fresh = Plot::new(self.id);
            if owner.is_some() {
                fresh.owner = owner;
                fresh.owner_name = owner_name;
            }
            return fresh;
        }
        if owner.is_none() {
            return self;
        }
        self.with_owner_name(owner_name)
    }

    #[must_use]
    pub fn with_owner_name(mut self, owner_name: Option<String>) -> Self {
        if self.owner.is_some() {
            self.owner_name = owner_name;
        }
        self
    }

    #[must_use]
    pub fn with_home(mut self, home: bool) -> Self {
        self.home = home;
        self
    }

    #[must_use]
    pub fn with_merged_direction_added(mut self, direction: MergeDirection) -> Self {
        self.merged = self.merged.with(direction);
        self
    }

    #[must_use]
    pub fn with_merged_direction_removed(mut self, direction: MergeDirection) -> Self {
        self.merged = self.merged.without(direction);
        self
    }

    #[must_use]
    pub fn with_merged_directions_cleared(mut self) -> Self {
        self.merged = DirectionSet::EMPTY;
        self
    }

    /// Effective value of a flag: the stored value if it parses, otherwise
    /// the flag's default.
    pub fn flag(&self, flag: PlotFlag) -> bool {
        self.flags
            .get(flag.key())
            .and_then(|raw| parse_flag_value(raw))
            .unwrap_or(flag.default_value())
    }

    pub fn flag_raw(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }

    /// Store an arbitrary key. A missing or blank value removes it.
    #[must_use]
    pub fn with_flag_raw(mut self, key: &str, value: Option<&str>) -> Self {
        if key.trim().is_empty() {
            return self;
        }
        match value.filter(|v| !v.trim().is_empty()) {
            Some(value) => {
                self.flags.insert(key.to_string(), value.to_string());
            }
            None => {
                self.flags.remove(key);
            }
        }
        self
    }

    /// Set a known flag. Values equal to the default are not stored.
    #[must_use]
    pub fn with_flag(mut self, flag: PlotFlag, value: bool) -> Self {
        if value == flag.default_value() {
            return self.without_flag(flag.key());
        }
        self.flags
            .insert(flag.key().to_string(), format_flag_value(value).to_string());
        self
    }

    #[must_use]
    pub fn without_flag(mut self, key: &str) -> Self {
        self.flags.remove(key);
        self
    }

    #[must_use]
    pub fn with_trusted_added(mut self, player: Uuid) -> Self {
        self.trusted.insert(player);
        self
    }

    #[must_use]
    pub fn with_trusted_removed(mut self, player: Uuid) -> Self {
        self.trusted.remove(&player);
        self
    }

    #[must_use]
    pub fn with_denied_added(mut self, player: Uuid) -> Self {
        self.denied.insert(player);
        self
    }

    #[must_use]
    pub fn with_denied_removed(mut self, player: Uuid) -> Self {
        self.denied.remove(&player);
        self
    }

    /// Copy trusted, denied and flags from `source`. Owner, home and merge
    /// links stay as they are.
    #[must_use]
    pub fn with_settings_from(mut self, source: &Plot) -> Self {
        if self.trusted != source.trusted {
            self.trusted = source.trusted.clone();
        }
        if self.denied != source.denied {
            self.denied = source.denied.clone();
        }
        if self.flags != source.flags {
            self.flags = source.flags.clone();
        }
        self
    }

    pub fn can_enter(&self, player: Uuid) -> bool {
        if self.denied.contains(&player) {
            return false;
        }
        match self.owner {
            None => true,
            Some(owner) => {
                owner == player || self.trusted.contains(&player) || self.flag(PlotFlag::Entry)
            }
        }
    }

    pub fn can_build(&self, player: Uuid) -> bool {
        if self.denied.contains(&player) {
            return false;
        }
        match self.owner {
            None => false,
            Some(owner) => {
                owner == player || self.trusted.contains(&player) || self.flag(PlotFlag::Build)
            }
        }
    }

    /// True for the canonical unclaimed state, which is never stored.
    pub fn is_default(&self) -> bool {
        self.owner.is_none()
            && !self.home
            && self.trusted.is_empty()
            && self.denied.is_empty()
            && self.flags.is_empty()
            && self.merged.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(owner: Uuid) -> Plot {
        Plot::new(PlotId::new(0, 0)).with_owner(Some(owner), Some("alice".into()))
    }

    #[test]
    fn test_new_plot_is_default() {
        let plot = Plot::new(PlotId::new(2, -1));
        assert!(plot.is_default());
        assert!(!plot.is_claimed());
        assert_eq!(plot.owner_label(), UNKNOWN_OWNER);
    }

    #[test]
    fn test_owner_change_resets_settings() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let plot = owned(alice)
            .with_home(true)
            .with_trusted_added(guest)
            .with_denied_added(Uuid::new_v4())
            .with_flag(PlotFlag::Pvp, false)
            .with_merged_direction_added(MergeDirection::East);

        let transferred = plot.clone().with_owner(Some(bob), Some("bob".into()));
        assert_eq!(transferred.owner(), Some(bob));
        assert_eq!(transferred.owner_name(), Some("bob"));
        assert!(!transferred.is_home());
        assert!(transferred.trusted().is_empty());
        assert!(transferred.denied().is_empty());
        assert!(transferred.flags().is_empty());
        assert!(transferred.merged_directions().is_empty());

        let renamed = plot.clone().with_owner(Some(alice), Some("alicia".into()));
        assert_eq!(renamed.owner_name(), Some("alicia"));
        assert!(renamed.is_home());
        assert!(renamed.trusted().contains(&guest));
        assert!(renamed.has_merge_bit(MergeDirection::East));

        assert!(plot.with_owner(None, None).is_default());
    }

    #[test]
    fn test_flag_default_not_stored() {
        let plot = owned(Uuid::new_v4()).with_flag(PlotFlag::Build, true);
        assert_eq!(plot.flag_raw("build"), Some("true"));
        assert!(plot.flag(PlotFlag::Build));

        let plot = plot.with_flag(PlotFlag::Build, false);
        assert!(plot.flags().is_empty());
        assert!(!plot.flag(PlotFlag::Build));

        let plot = plot.with_flag(PlotFlag::Entry, true);
        assert!(plot.flags().is_empty());
    }

    #[test]
    fn test_raw_flags_pass_through() {
        let plot = owned(Uuid::new_v4())
            .with_flag_raw("weather", Some("rain"))
            .with_flag_raw("", Some("ignored"));
        assert_eq!(plot.flag_raw("weather"), Some("rain"));
        assert_eq!(plot.flags().len(), 1);
        let plot = plot.with_flag_raw("weather", Some("  "));
        assert!(plot.flags().is_empty());
    }

    #[test]
    fn test_unparseable_flag_falls_back_to_default() {
        let plot = owned(Uuid::new_v4()).with_flag_raw("entry", Some("sometimes"));
        assert!(plot.flag(PlotFlag::Entry));
    }

    #[test]
    fn test_access_rules() {
        let owner = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let plot = owned(owner).with_trusted_added(friend);

        assert!(plot.can_enter(stranger));
        assert!(!plot.can_build(stranger));
        assert!(plot.can_build(friend));
        assert!(plot.can_build(owner));

        let locked = plot.clone().with_flag(PlotFlag::Entry, false);
        assert!(!locked.can_enter(stranger));
        assert!(locked.can_enter(friend));

        let open = plot.clone().with_flag(PlotFlag::Build, true);
        assert!(open.can_build(stranger));

        // Deny wins over trust and ownership.
        let banned = plot.with_denied_added(friend).with_denied_added(owner);
        assert!(!banned.can_enter(friend));
        assert!(!banned.can_build(friend));
        assert!(!banned.can_enter(owner));
    }

    #[test]
    fn test_unclaimed_access() {
        let plot = Plot::new(PlotId::new(0, 0));
        let someone = Uuid::new_v4();
        assert!(plot.can_enter(someone));
        assert!(!plot.can_build(someone));
    }

    #[test]
    fn test_settings_copy_keeps_identity() {
        let owner = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let source = owned(owner)
            .with_trusted_added(friend)
            .with_flag(PlotFlag::Damage, false);
        let target = Plot::new(PlotId::new(1, 0))
            .with_owner(Some(owner), None)
            .with_home(true)
            .with_merged_direction_added(MergeDirection::West)
            .with_settings_from(&source);

        assert_eq!(target.id(), PlotId::new(1, 0));
        assert!(target.is_home());
        assert!(target.has_merge_bit(MergeDirection::West));
        assert_eq!(target.trusted(), source.trusted());
        assert_eq!(target.flags(), source.flags());
    }

    #[test]
    fn test_owner_label_falls_back_to_uuid() {
        let owner = Uuid::new_v4();
        let plot = Plot::new(PlotId::new(0, 0)).with_owner(Some(owner), None);
        assert_eq!(plot.owner_label(), owner.to_string());
    }

    #[test]
    fn test_owner_name_ignored_when_unclaimed() {
        let plot = Plot::new(PlotId::new(0, 0)).with_owner_name(Some("ghost".into()));
        assert!(plot.is_default());
    }
}
