use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};
use smartdir::watch::change_events;
use smartdir_core::monitor::{ChangeEvent, ChangeKind};
use std::path::PathBuf;

fn event(kind: EventKind, paths: &[&str]) -> Event {
    paths
        .iter()
        .fold(Event::new(kind), |ev, p| ev.add_path(PathBuf::from(p)))
}

#[test]
fn notifier_kinds_map_to_change_kinds() {
    let created = change_events(&event(EventKind::Create(CreateKind::File), &["/w/a.txt"]));
    assert_eq!(created, vec![ChangeEvent::new(ChangeKind::Created, "/w/a.txt")]);

    let written = change_events(&event(
        EventKind::Modify(ModifyKind::Data(DataChange::Content)),
        &["/w/a.txt"],
    ));
    assert_eq!(written[0].kind, ChangeKind::Modified);

    let removed = change_events(&event(EventKind::Remove(RemoveKind::File), &["/w/a.txt"]));
    assert_eq!(removed[0].kind, ChangeKind::Removed);
}

#[test]
fn rename_reports_both_ends() {
    let renamed = change_events(&event(
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
        &["/w/old.txt", "/w/new.txt"],
    ));
    assert_eq!(
        renamed,
        vec![
            ChangeEvent::new(ChangeKind::Renamed, "/w/old.txt"),
            ChangeEvent::new(ChangeKind::Renamed, "/w/new.txt"),
        ]
    );
}

#[test]
fn access_events_are_ignored() {
    let read = change_events(&event(EventKind::Access(AccessKind::Read), &["/w/a.txt"]));
    assert!(read.is_empty());
    assert!(change_events(&event(EventKind::Any, &["/w/a.txt"])).is_empty());
}
