use crate::model::{GroupId, InclusionStatus, RsvpStatus, Side};
use crate::store::EntityStore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InclusionCounts {
    pub definitely: usize,
    pub maybe: usize,
    pub not_invited: usize,
}

/// RSVP buckets; `none` counts guests without an RSVP status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RsvpCounts {
    pub none: usize,
    pub invited: usize,
    pub attending: usize,
    pub declined: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SideCounts {
    pub bride: usize,
    pub groom: usize,
    pub both: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RosterCounts {
    pub total_guests: usize,
    pub inclusion: InclusionCounts,
    pub rsvp: RsvpCounts,
    pub side: SideCounts,
    /// Member count of every group, including empty groups.
    pub group_members: BTreeMap<GroupId, usize>,
    /// Guests without any group.
    pub solo_guests: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RosterSummary {
    pub version: u64,
    pub counts: RosterCounts,
}

pub fn summarize(store: &EntityStore) -> RosterSummary {
    let mut counts = RosterCounts {
        total_guests: store.guest_count(),
        group_members: store.groups().map(|group| (group.id, 0)).collect(),
        ..RosterCounts::default()
    };

    for guest in store.guests() {
        match guest.inclusion {
            InclusionStatus::Definitely => counts.inclusion.definitely += 1,
            InclusionStatus::Maybe => counts.inclusion.maybe += 1,
            InclusionStatus::NotInvited => counts.inclusion.not_invited += 1,
        }
        match guest.rsvp {
            None => counts.rsvp.none += 1,
            Some(RsvpStatus::Invited) => counts.rsvp.invited += 1,
            Some(RsvpStatus::Attending) => counts.rsvp.attending += 1,
            Some(RsvpStatus::Declined) => counts.rsvp.declined += 1,
        }
        match guest.side {
            Side::Bride => counts.side.bride += 1,
            Side::Groom => counts.side.groom += 1,
            Side::Both => counts.side.both += 1,
        }
    }

    let mut grouped = BTreeSet::new();
    for pair in store.memberships() {
        *counts.group_members.entry(pair.group_id).or_insert(0) += 1;
        grouped.insert(pair.guest_id);
    }
    counts.solo_guests = counts.total_guests - grouped.len();

    RosterSummary {
        version: store.version(),
        counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupType, Membership, NewGroup, NewGuest};
    use uuid::Uuid;

    #[test]
    fn empty_store_has_zero_counts() {
        let summary = summarize(&EntityStore::new());
        assert_eq!(summary, RosterSummary::default());
    }

    #[test]
    fn counts_every_axis_and_solo_guests() {
        let mut store = EntityStore::new();
        let mut ana = NewGuest::new("Ana", "Silva", Side::Bride);
        ana.inclusion = InclusionStatus::Definitely;
        ana.rsvp = Some(RsvpStatus::Attending);
        let ana = ana.into_guest(Uuid::new_v4(), 1);
        let ben = NewGuest::new("Ben", "Silva", Side::Groom).into_guest(Uuid::new_v4(), 1);
        let cal = NewGuest::new("Cal", "Jones", Side::Both).into_guest(Uuid::new_v4(), 1);
        let silvas = NewGroup::new("Silvas", GroupType::Family).to_group(Uuid::new_v4(), 1);
        let empty = NewGroup::new("Book club", GroupType::FriendGroup).to_group(Uuid::new_v4(), 1);
        for guest in [&ana, &ben, &cal] {
            store.upsert_guest(guest.clone(), None).unwrap();
        }
        store.upsert_group(silvas.clone(), None).unwrap();
        store.upsert_group(empty.clone(), None).unwrap();
        store.link(Membership::new(ana.id, silvas.id), None).unwrap();
        store.link(Membership::new(ben.id, silvas.id), None).unwrap();

        let summary = summarize(&store);
        let counts = &summary.counts;
        assert_eq!(summary.version, store.version());
        assert_eq!(counts.total_guests, 3);
        assert_eq!(
            counts.inclusion,
            InclusionCounts {
                definitely: 1,
                maybe: 2,
                not_invited: 0
            }
        );
        assert_eq!(counts.rsvp.none, 2);
        assert_eq!(counts.rsvp.attending, 1);
        assert_eq!(
            counts.side,
            SideCounts {
                bride: 1,
                groom: 1,
                both: 1
            }
        );
        assert_eq!(counts.group_members.get(&silvas.id), Some(&2));
        assert_eq!(counts.group_members.get(&empty.id), Some(&0));
        assert_eq!(counts.solo_guests, 1);
    }
}
