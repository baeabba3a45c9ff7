// SPDX-License-Identifier: GPL-3.0-only

//! Registry reconciliation under device-event traffic.

mod common;

use common::{harness, loop_volume};
use shroud_manager::ManagerEvent;
use shroud_types::VolumeClass;
use shroud_udisks::DeviceEventKind;

#[tokio::test(start_paused = true)]
async fn added_event_registers_a_file_container() {
    let h = harness();
    assert!(h.manager.container_views().is_empty());

    h.devices.add_volume(loop_volume(5, "/tmp/container.img"));
    h.manager.process_pending_events().await;

    let containers = h.manager.container_views();
    assert_eq!(containers.len(), 1);
    let view = &containers[0];
    assert_eq!(view.device_path, "/dev/loop5");
    assert_eq!(view.backing_file.as_deref(), Some("/tmp/container.img"));
    assert_eq!(view.class, VolumeClass::FileContainer);
    assert!(!view.is_unlocked);
    assert!(h.manager.attached_device_views().is_empty());
}

#[tokio::test(start_paused = true)]
async fn repeated_events_for_one_device_keep_a_single_entry() {
    let h = harness();
    h.devices.add_volume(loop_volume(5, "/tmp/container.img"));
    h.devices.announce(DeviceEventKind::Added, "/dev/loop5");
    h.devices.announce(DeviceEventKind::Changed, "/dev/loop5");
    h.devices.announce(DeviceEventKind::Added, "/dev/loop5");
    h.manager.process_pending_events().await;

    assert_eq!(h.manager.container_views().len(), 1);
    assert!(h.manager.attached_device_views().is_empty());
}

#[tokio::test(start_paused = true)]
async fn removal_drops_the_entry_immediately() {
    let mut h = harness();
    h.devices.add_volume(loop_volume(5, "/tmp/container.img"));
    h.manager.process_pending_events().await;
    assert_eq!(h.manager.container_views().len(), 1);

    h.devices.remove_volume("/dev/loop5");
    h.manager.process_pending_events().await;

    assert!(h.manager.container_views().is_empty());
    let removed = std::iter::from_fn(|| h.notifications.try_recv().ok())
        .filter(|event| matches!(event, ManagerEvent::VolumeRemoved { .. }))
        .count();
    assert_eq!(removed, 1);
}

#[tokio::test(start_paused = true)]
async fn seeding_registers_preexisting_volumes() {
    let h = harness();
    {
        let mut state = h.devices.state.lock().expect("state");
        let volume = loop_volume(7, "/tmp/seeded.img");
        state.volumes.insert(volume.device_path.clone(), volume);
    }

    h.manager.seed().await.expect("seed");
    let containers = h.manager.container_views();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].device_path, "/dev/loop7");
}

#[tokio::test(start_paused = true)]
async fn mapper_nodes_are_not_independent_entries() {
    let h = harness();
    h.devices.add_volume(loop_volume(5, "/tmp/container.img"));
    h.manager.process_pending_events().await;

    h.manager
        .unlock_volume("/dev/loop5", "t1", "p")
        .await
        .expect("unlock");
    h.manager.process_pending_events().await;

    // The mapping's own Added event must not grow either collection.
    assert_eq!(h.manager.container_views().len(), 1);
    assert!(h.manager.attached_device_views().is_empty());
}

#[tokio::test(start_paused = true)]
async fn external_mapping_removal_locks_the_volume() {
    let h = harness();
    h.devices.add_volume(loop_volume(5, "/tmp/container.img"));
    h.manager.process_pending_events().await;

    h.manager
        .unlock_volume("/dev/loop5", "t1", "p")
        .await
        .expect("unlock");
    assert!(h.manager.volume_view("/dev/loop5").expect("view").is_unlocked);

    // The mapping disappears behind our back (external dmsetup remove).
    h.devices.remove_volume("/dev/mapper/shroud_t1");
    h.manager.process_pending_events().await;

    let view = h.manager.volume_view("/dev/loop5").expect("view");
    assert!(!view.is_unlocked, "the origin volume reads as locked again");
    assert_eq!(h.manager.container_views().len(), 1);
}
