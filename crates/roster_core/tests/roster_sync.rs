mod common;

use common::{backend, created_guests, engine, group_id, guest, guest_id};
use roster_core::{flush, pull, GroupType, NewGroup, RosterEngine};
use std::collections::BTreeSet;

fn guest_names(engine: &RosterEngine) -> BTreeSet<String> {
    engine
        .store()
        .guests()
        .map(|guest| guest.first_name.clone())
        .collect()
}

#[test]
fn two_clients_converge_through_shared_backend() {
    let mut backend = backend();
    let mut planner = engine();
    let mut partner = engine();

    let solo = planner.create_guest(guest("Avery", "Stone"), &[]).unwrap();
    let smiths = planner
        .create_group(
            NewGroup::new("Smiths", GroupType::Family)
                .with_new_guests([guest("Blake", "Smith"), guest("Casey", "Smith")]),
        )
        .unwrap();
    let group = group_id(&smiths);
    let members = created_guests(&smiths);
    assert_eq!(members.len(), 2);

    let outcomes = flush(&mut planner, &mut backend);
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|outcome| outcome.is_confirmed()));

    let summary = planner.summary();
    assert_eq!(summary.counts.total_guests, 3);
    assert_eq!(summary.counts.solo_guests, 1);
    assert_eq!(summary.counts.group_members.get(&group), Some(&2));

    planner.remove_guest_from_group(members[0], group).unwrap();
    assert!(flush(&mut planner, &mut backend)[0].is_confirmed());
    assert_eq!(planner.summary().counts.solo_guests, 2);
    assert_eq!(planner.summary().counts.group_members.get(&group), Some(&1));

    pull(&mut partner, &mut backend).unwrap();
    assert_eq!(guest_names(&partner), guest_names(&planner));
    assert_eq!(partner.store().members_of(group), vec![members[1]]);
    assert_eq!(partner.summary().counts, planner.summary().counts);

    partner.delete_group(group).unwrap();
    assert!(flush(&mut partner, &mut backend)[0].is_confirmed());

    pull(&mut planner, &mut backend).unwrap();
    assert!(planner.store().get_group(group).is_none());
    assert_eq!(planner.store().guest_count(), 3);
    assert_eq!(planner.summary().counts.solo_guests, 3);
    assert!(planner.store().get_guest(guest_id(&solo)).is_some());
    assert_eq!(planner.summary().counts, partner.summary().counts);
}

#[test]
fn pulling_own_echoes_keeps_the_roster_unchanged() {
    let mut backend = backend();
    let mut client = engine();

    client.create_guest(guest("Drew", "Lane"), &[]).unwrap();
    client
        .create_group(NewGroup::new("Lanes", GroupType::Family))
        .unwrap();
    flush(&mut client, &mut backend);
    let confirmed = client.snapshot();

    let read = pull(&mut client, &mut backend).unwrap();
    assert_eq!(read, 2);
    assert_eq!(client.snapshot(), confirmed);

    assert_eq!(pull(&mut client, &mut backend).unwrap(), 0);
}

#[test]
fn pull_pages_through_the_feed() {
    let mut backend = backend();
    let mut writer = engine();
    for index in 0..7 {
        let first_name = format!("Guest {}", ["A", "B", "C", "D", "E", "F", "G"][index]);
        writer.create_guest(guest(&first_name, "Page"), &[]).unwrap();
    }
    flush(&mut writer, &mut backend);

    let mut reader = RosterEngine::new(roster_core::SyncSettings {
        feed_batch_size: 3,
        ..roster_core::SyncSettings::default()
    });
    assert_eq!(pull(&mut reader, &mut backend).unwrap(), 7);
    assert_eq!(reader.store().guest_count(), 7);
    assert_eq!(reader.feed_cursor(), 7);
}

#[test]
fn subscribers_see_summary_changes_from_remote_deletes() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut backend = backend();
    let mut writer = engine();
    let mut reader = engine();

    let ticket = writer.create_guest(guest("Emery", "Fox"), &[]).unwrap();
    flush(&mut writer, &mut backend);
    pull(&mut reader, &mut backend).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    reader.subscribe(move |summary| sink.borrow_mut().push(summary.counts.total_guests));

    writer.delete_guest(guest_id(&ticket)).unwrap();
    flush(&mut writer, &mut backend);
    pull(&mut reader, &mut backend).unwrap();

    assert_eq!(*seen.borrow(), vec![0]);
}
