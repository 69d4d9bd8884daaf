//! Pool behavior: allocation preference order, claim transitions, erase
//! discipline, boot/shutdown timeouts, and bulk deletion.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    fleet_over, iphone_config, simulator_row, device_row, MockBridge, DEVICE_A, SIM_A,
};

use armada_core::error::TargetError;
use armada_core::pool::ClaimState;
use armada_core::target::LifecycleState;

// ---------------------------------------------------------------------------
// 1. Allocation preference: free member, then import, then create
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_allocate_creates_when_nothing_exists() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);

    let target = fleet.allocate(&iphone_config()).await.unwrap();
    assert_eq!(bridge.create_count(), 1);
    assert_eq!(target.state, LifecycleState::Shutdown);

    let members = fleet.pool_members().await;
    assert_eq!(members.len(), 1);
    assert!(members[0].owned, "a created simulator is pool-owned");
    assert_eq!(members[0].claim, ClaimState::Claimed);
}

#[tokio::test]
async fn test_allocate_reuses_freed_member() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);

    let first = fleet.allocate(&iphone_config()).await.unwrap();
    fleet.free(first.udid()).await.unwrap();

    let second = fleet.allocate(&iphone_config()).await.unwrap();
    assert_eq!(first.udid(), second.udid());
    assert_eq!(bridge.create_count(), 1, "reuse must not create");
}

#[tokio::test]
async fn test_allocate_adopts_matching_simulator_on_disk() {
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Shutdown,
    )]);
    let fleet = fleet_over(&bridge);

    let target = fleet.allocate(&iphone_config()).await.unwrap();
    assert_eq!(target.udid(), SIM_A);
    assert_eq!(bridge.create_count(), 0);

    let members = fleet.pool_members().await;
    assert!(!members[0].owned, "an adopted simulator is only referenced");
}

#[tokio::test]
async fn test_allocate_ignores_booted_simulators_on_disk() {
    // Only shut-down simulators are safe to adopt; a booted one may be in use.
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Booted,
    )]);
    let fleet = fleet_over(&bridge);

    let target = fleet.allocate(&iphone_config()).await.unwrap();
    assert_ne!(target.udid(), SIM_A);
    assert_eq!(bridge.create_count(), 1);
}

#[tokio::test]
async fn test_allocations_never_share_a_simulator() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);

    let first = fleet.allocate(&iphone_config()).await.unwrap();
    let second = fleet.allocate(&iphone_config()).await.unwrap();
    assert_ne!(first.udid(), second.udid());
    assert_eq!(bridge.create_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_allocate_drops_vanished_member_and_moves_on() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);

    let first = fleet.allocate(&iphone_config()).await.unwrap();
    fleet.free(first.udid()).await.unwrap();

    // The simulator disappears behind the pool's back.
    bridge.remove(first.udid());
    tokio::time::advance(Duration::from_secs(6)).await;

    let second = fleet.allocate(&iphone_config()).await.unwrap();
    assert_ne!(first.udid(), second.udid());

    let members = fleet.pool_members().await;
    assert_eq!(members.len(), 1, "the vanished member must be dropped");
    assert_eq!(members[0].identifier.as_str(), second.udid());
}

// ---------------------------------------------------------------------------
// 2. Create retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_failure_is_retried_once() {
    let bridge = MockBridge::new();
    bridge.fail_next_creates(1);
    let fleet = fleet_over(&bridge);

    let target = fleet.allocate(&iphone_config()).await.unwrap();
    assert_eq!(bridge.create_count(), 2);
    assert_eq!(target.state, LifecycleState::Shutdown);
}

#[tokio::test]
async fn test_two_create_failures_fail_the_allocation() {
    let bridge = MockBridge::new();
    bridge.fail_next_creates(2);
    let fleet = fleet_over(&bridge);

    let err = fleet.allocate(&iphone_config()).await.unwrap_err();
    assert!(matches!(err, TargetError::AllocationFailed { .. }));
    assert_eq!(bridge.create_count(), 2, "exactly one retry");
}

// ---------------------------------------------------------------------------
// 3. Free transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_free_is_idempotent() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);

    let target = fleet.allocate(&iphone_config()).await.unwrap();
    fleet.free(target.udid()).await.unwrap();
    fleet.free(target.udid()).await.unwrap();
}

#[tokio::test]
async fn test_free_of_unknown_identifier_is_not_found() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);

    let err = fleet.free(SIM_A).await.unwrap_err();
    assert!(matches!(err, TargetError::TargetNotFound { .. }));
}

#[tokio::test]
async fn test_free_after_erase_is_refused() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);

    let target = fleet.allocate(&iphone_config()).await.unwrap();
    fleet.erase(target.udid()).await.unwrap();

    let err = fleet.free(target.udid()).await.unwrap_err();
    assert!(matches!(err, TargetError::Failed { .. }));
}

// ---------------------------------------------------------------------------
// 4. Erase discipline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_erase_shuts_down_a_running_simulator_first() {
    // The mock refuses to erase a booted simulator, so this only passes if
    // the pool performs the shutdown transition before wiping.
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Booted,
    )]);
    let fleet = fleet_over(&bridge);

    fleet.erase(SIM_A).await.unwrap();
    let err = fleet.resolve(SIM_A).await.unwrap_err();
    assert!(matches!(err, TargetError::TargetNotFound { .. }));
}

#[tokio::test]
async fn test_erase_refuses_physical_devices() {
    let bridge = MockBridge::with_targets(vec![device_row(DEVICE_A, "usb device")]);
    let fleet = fleet_over(&bridge);

    let err = fleet.erase(DEVICE_A).await.unwrap_err();
    assert!(matches!(err, TargetError::EraseFailed { .. }));
}

#[tokio::test]
async fn test_erase_refuses_a_simulator_still_creating() {
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Creating,
    )]);
    let fleet = fleet_over(&bridge);

    match fleet.erase(SIM_A).await.unwrap_err() {
        TargetError::EraseFailed { reason } => assert!(reason.contains("Creating")),
        other => panic!("expected EraseFailed, got {other:?}"),
    }

    // Refused before any claim or platform call; the target is untouched.
    assert_eq!(bridge.erase_count(), 0);
    assert!(fleet.pool_members().await.is_empty());
    fleet.resolve(SIM_A).await.unwrap();
}

#[tokio::test]
async fn test_erase_refuses_a_booting_simulator() {
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Booting,
    )]);
    let fleet = fleet_over(&bridge);

    let err = fleet.erase(SIM_A).await.unwrap_err();
    assert!(matches!(err, TargetError::EraseFailed { .. }));

    let target = fleet.resolve(SIM_A).await.unwrap();
    assert_eq!(target.state, LifecycleState::Booting);
}

#[tokio::test(start_paused = true)]
async fn test_erase_shutdown_timeout_restores_the_claim() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);

    let target = fleet.allocate(&iphone_config()).await.unwrap();
    fleet.boot(target.udid()).await.unwrap();

    // Shutdown hangs past the 30s deadline.
    bridge.set_shutdown_delay(Duration::from_secs(300));
    let err = fleet.erase(target.udid()).await.unwrap_err();
    assert!(matches!(err, TargetError::EraseFailed { .. }));

    let members = fleet.pool_members().await;
    assert_eq!(
        members[0].claim,
        ClaimState::Claimed,
        "a failed erase must not leave the member stuck in erasing"
    );
}

#[tokio::test]
async fn test_failed_erase_quarantines_the_member() {
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Shutdown,
    )]);
    let fleet = fleet_over(&bridge);

    fleet.allocate(&iphone_config()).await.unwrap();
    fleet.free(SIM_A).await.unwrap();

    bridge.fail_erase(true);
    let err = fleet.erase(SIM_A).await.unwrap_err();
    assert!(matches!(err, TargetError::EraseFailed { .. }));

    let members = fleet.pool_members().await;
    assert_eq!(members[0].claim, ClaimState::Erasing);

    // The quarantined member is not a reuse candidate.
    bridge.fail_erase(false);
    let next = fleet.allocate(&iphone_config()).await.unwrap();
    assert_ne!(next.udid(), SIM_A);
    assert_eq!(bridge.create_count(), 1);
}

#[tokio::test]
async fn test_erased_member_is_never_handed_out_again() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);

    let first = fleet.allocate(&iphone_config()).await.unwrap();
    fleet.erase(first.udid()).await.unwrap();

    let second = fleet.allocate(&iphone_config()).await.unwrap();
    assert_ne!(first.udid(), second.udid());
    assert_eq!(bridge.create_count(), 2);

    let members = fleet.pool_members().await;
    let erased = members
        .iter()
        .find(|m| m.identifier.as_str() == first.udid())
        .unwrap();
    assert_eq!(erased.claim, ClaimState::Erased);
}

#[tokio::test(start_paused = true)]
async fn test_allocate_never_adopts_a_simulator_mid_erase() {
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Shutdown,
    )]);
    bridge.set_erase_delay(Duration::from_secs(2));
    let fleet = Arc::new(fleet_over(&bridge));

    let erase = {
        let fleet = Arc::clone(&fleet);
        tokio::spawn(async move { fleet.erase(SIM_A).await })
    };
    while bridge.erase_count() == 0 {
        tokio::task::yield_now().await;
    }

    // The wipe is still in flight, so the simulator is off the table even
    // though the platform still lists it as a shut-down match.
    let allocated = fleet.allocate(&iphone_config()).await.unwrap();
    assert_ne!(allocated.udid(), SIM_A);
    assert_eq!(bridge.create_count(), 1);

    erase.await.unwrap().unwrap();
    let err = fleet.resolve(SIM_A).await.unwrap_err();
    assert!(matches!(err, TargetError::TargetNotFound { .. }));
}

// ---------------------------------------------------------------------------
// 5. Boot and shutdown transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_boot_then_shutdown_roundtrip() {
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Shutdown,
    )]);
    let fleet = fleet_over(&bridge);

    let booted = fleet.boot(SIM_A).await.unwrap();
    assert_eq!(booted.state, LifecycleState::Booted);

    let down = fleet.shutdown(SIM_A).await.unwrap();
    assert_eq!(down.state, LifecycleState::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_boot_past_the_deadline_times_out() {
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Shutdown,
    )]);
    bridge.set_boot_delay(Duration::from_secs(600));
    let fleet = fleet_over(&bridge);

    match fleet.boot(SIM_A).await.unwrap_err() {
        TargetError::TimedOut { after } => assert_eq!(after, Duration::from_secs(120)),
        other => panic!("expected TimedOut, got {other:?}"),
    }
}

#[tokio::test]
async fn test_boot_refuses_physical_devices() {
    let bridge = MockBridge::with_targets(vec![device_row(DEVICE_A, "usb device")]);
    let fleet = fleet_over(&bridge);

    let err = fleet.boot(DEVICE_A).await.unwrap_err();
    assert!(matches!(err, TargetError::Failed { .. }));
}

// ---------------------------------------------------------------------------
// 6. Bulk deletion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_delete_all_spares_referenced_members_by_default() {
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Shutdown,
    )]);
    let fleet = fleet_over(&bridge);

    let adopted = fleet.allocate(&iphone_config()).await.unwrap();
    assert_eq!(adopted.udid(), SIM_A);
    let created = fleet.allocate(&iphone_config()).await.unwrap();

    let results = fleet.delete_all(false).await;
    assert_eq!(results.len(), 1);
    assert!(results.get(created.udid()).unwrap().is_ok());

    // The adopted simulator survives on disk and in the member list.
    fleet.refresh_target(SIM_A).await.unwrap().unwrap();
    assert_eq!(fleet.pool_members().await.len(), 1);

    let results = fleet.delete_all(true).await;
    assert_eq!(results.len(), 1);
    assert!(results.get(SIM_A).unwrap().is_ok());
    assert!(fleet.pool_members().await.is_empty());
}

#[tokio::test]
async fn test_delete_all_reports_failures_per_member() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);

    let a = fleet.allocate(&iphone_config()).await.unwrap();
    let b = fleet.allocate(&iphone_config()).await.unwrap();

    bridge.fail_erase(true);
    let results = fleet.delete_all(false).await;
    assert_eq!(results.len(), 2);
    for udid in [a.udid(), b.udid()] {
        assert!(
            matches!(results.get(udid), Some(Err(TargetError::EraseFailed { .. }))),
            "expected a per-member failure for {udid}"
        );
    }
    // Failed members stay tracked for a later retry.
    assert_eq!(fleet.pool_members().await.len(), 2);
}

#[tokio::test]
async fn test_delete_all_with_no_members_is_empty() {
    let bridge = MockBridge::new();
    let fleet = fleet_over(&bridge);
    assert!(fleet.delete_all(true).await.is_empty());
}
