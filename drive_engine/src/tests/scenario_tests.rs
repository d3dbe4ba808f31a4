// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end scenarios against the fake adapter port.

use super::test_helpers::*;
use crate::EngineState;
use crate::RequestError;
use drive_core::CommandResult;
use drive_core::ControlRequest;
use drive_core::DeathReason;
use drive_core::DriveClassId;
use drive_core::PathState;
use drive_core::PortStatus;
use drive_core::SanitizePattern;
use drive_core::SanitizeState;
use drive_core::SpinupGrant;
use drive_defs as defs;
use std::time::Duration;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

const OP_TEST_UNIT_READY: u8 = 0x00;
const OP_INQUIRY: u8 = 0x12;
const OP_START_STOP: u8 = 0x1B;
const OP_SEND_DIAGNOSTIC: u8 = 0x1D;
const OP_WRITE_BUFFER: u8 = 0x3B;
const OP_WRITE_LONG: u8 = 0x3F;
const OP_REASSIGN: u8 = 0x07;
const OP_SANITIZE: u8 = 0x48;
const OP_LOG_SENSE: u8 = 0x4D;
const OP_MODE_SENSE10: u8 = 0x5A;

#[tokio::test(start_paused = true)]
async fn activation_reaches_ready_without_spin_up() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;

    let ops = drive.port.issued_opcodes();
    assert!(ops.contains(&OP_INQUIRY));
    assert!(ops.contains(&OP_TEST_UNIT_READY));
    assert!(ops.contains(&OP_MODE_SENSE10));
    // Already spinning, so no credit was requested and no START UNIT sent.
    assert!(!ops.contains(&OP_START_STOP));
    assert_eq!(drive.arbiter.requests(), 0);

    let (blocks, block_size) = drive.handle.capacity();
    assert_eq!(blocks, 0x10000);
    assert_eq!(block_size, 512);
    assert_eq!(drive.handle.serial_number().unwrap(), b"FAKE0001");
    assert_eq!(drive.handle.drive_class(), DriveClassId::Sas);
}

#[tokio::test(start_paused = true)]
async fn spin_up_uses_credit_and_releases_after_grace() {
    let drive = spawn_drive(|port, _| {
        // First probe: drive parked, waiting for a start command.
        port.script(
            OP_TEST_UNIT_READY,
            not_ready(defs::SCSI_SENSEQ_INIT_COMMAND_REQUIRED),
        );
    });
    wait_for_state(&drive.handle, EngineState::Ready).await;

    assert!(drive.port.issued_opcodes().contains(&OP_START_STOP));
    assert_eq!(drive.arbiter.requests(), 1);

    // Credit returns only after the grace window.
    wait_until(|| drive.arbiter.releases() == 1).await;
    assert!(!drive.handle.edge().attrs().spinup_pending());
}

#[tokio::test(start_paused = true)]
async fn deferred_spin_up_grant_wakes_the_object() {
    let drive = spawn_drive(|port, arbiter| {
        port.script(
            OP_TEST_UNIT_READY,
            not_ready(defs::SCSI_SENSEQ_INIT_COMMAND_REQUIRED),
        );
        arbiter.script_grant(SpinupGrant::Pending);
    });

    // The object parks with the pending attribute until the grant lands.
    wait_until(|| drive.handle.edge().attrs().spinup_pending()).await;
    assert_ne!(drive.handle.state(), EngineState::Ready);

    drive.handle.spinup_granted();
    wait_for_state(&drive.handle, EngineState::Ready).await;
    assert!(drive.port.issued_opcodes().contains(&OP_START_STOP));
}

#[tokio::test(start_paused = true)]
async fn becoming_ready_exhaustion_fails_the_object() {
    let drive = spawn_drive(|port, _| {
        port.script_sticky(OP_TEST_UNIT_READY, || {
            not_ready(defs::SCSI_SENSEQ_BECOMING_READY)
        });
    });
    wait_for_state(&drive.handle, EngineState::Fail).await;
    assert_eq!(
        drive.handle.death_reason(),
        Some(DeathReason::DriveNotSpinning)
    );

    // New requests fail immediately with the recorded reason.
    let err = drive.handle.mode_page(defs::MODE_PAGE_CACHING).await;
    assert_eq!(
        err,
        Err(RequestError::ObjectFailed(DeathReason::DriveNotSpinning))
    );
}

#[tokio::test(start_paused = true)]
async fn parked_drive_that_never_spins_up_fails_the_object() {
    let drive = spawn_drive(|port, _| {
        // The drive keeps demanding a start command no matter how many
        // START UNITs it is given.
        port.script_sticky(OP_TEST_UNIT_READY, || {
            not_ready(defs::SCSI_SENSEQ_INIT_COMMAND_REQUIRED)
        });
    });
    wait_for_state(&drive.handle, EngineState::Fail).await;
    assert_eq!(
        drive.handle.death_reason(),
        Some(DeathReason::DriveNotSpinning)
    );

    // The spin-up protocol did run; it just never converged.
    assert!(drive.port.issued_opcodes().contains(&OP_START_STOP));
    assert!(drive.arbiter.requests() >= 1);
}

#[tokio::test(start_paused = true)]
async fn paddlecard_busy_reschedules_without_burning_retries() {
    let drive = spawn_drive(|port, _| {
        // An ATA vendor id behind a SAS expander classifies as a
        // paddlecard, whose error table maps BUSY to a reschedule.
        let mut inquiry = defs::InquiryData::new_zeroed();
        inquiry.vendor_id = *b"ATA     ";
        inquiry.product_id = *b"UNIT TEST DRIVE ";
        port.script(OP_INQUIRY, good_data(inquiry.as_bytes().to_vec()));
        for _ in 0..3 {
            port.script(
                OP_MODE_SENSE10,
                CommandResult::port_failure(PortStatus::Busy),
            );
        }
    });

    // Three straight reschedules exceed the mode select retry limit, so
    // activation only succeeds if reschedules leave the counter alone.
    wait_for_state(&drive.handle, EngineState::Ready).await;
    assert_eq!(drive.handle.drive_class(), DriveClassId::SataPaddlecard);

    let mode_senses = drive
        .port
        .issued_opcodes()
        .iter()
        .filter(|&&op| op == OP_MODE_SENSE10)
        .count();
    assert!(mode_senses >= 4);
}

#[tokio::test(start_paused = true)]
async fn serves_requests_in_arrival_order() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;
    let before = drive.port.issued_opcodes().len();

    let mode = drive.handle.mode_page(defs::MODE_PAGE_CACHING);
    let vpd = drive.handle.vpd_page(defs::VPD_SERIAL_NUMBER);
    let (mode, vpd) = tokio::join!(mode, vpd);
    assert!(!mode.unwrap().is_empty());
    assert!(!vpd.unwrap().is_empty());

    let ops = drive.port.issued_opcodes();
    assert_eq!(ops[before..], [OP_MODE_SENSE10, OP_INQUIRY]);
}

#[tokio::test(start_paused = true)]
async fn invalid_request_parameters_are_rejected_without_io() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;
    let before = drive.port.issued_opcodes().len();

    let err = drive.handle.write_long(0, Vec::new()).await;
    assert_eq!(err, Err(RequestError::InvalidParameter));
    let err = drive.handle.passthrough(vec![0; 17], None, 0).await;
    assert_eq!(err, Err(RequestError::InvalidParameter));
    assert_eq!(drive.port.issued_opcodes().len(), before);
}

#[tokio::test(start_paused = true)]
async fn perf_counter_reads_require_enablement() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;

    // Collection is off by default; reads are refused without I/O.
    let err = drive.handle.perf_counters().await;
    assert_eq!(err, Err(RequestError::NotEnabled));
    assert!(!drive.port.issued_opcodes().contains(&OP_LOG_SENSE));

    drive.handle.enable_perf_counters().await.unwrap();
    let counters = drive.handle.perf_counters().await.unwrap();
    assert!(!counters.is_empty());
    assert!(drive.port.issued_opcodes().contains(&OP_LOG_SENSE));

    let log_senses = || {
        drive
            .port
            .issued_opcodes()
            .iter()
            .filter(|&&op| op == OP_LOG_SENSE)
            .count()
    };
    drive.handle.disable_perf_counters().await.unwrap();
    let before = log_senses();
    let err = drive.handle.perf_counters().await;
    assert_eq!(err, Err(RequestError::NotEnabled));
    assert_eq!(log_senses(), before);
}

#[tokio::test(start_paused = true)]
async fn health_check_runs_quiesce_diag_reset_cleanup() {
    let drive = spawn_drive(|_, _| {});
    drive.upstream.set_clients(1);
    wait_for_state(&drive.handle, EngineState::Ready).await;

    let handle = drive.handle.clone();
    let check = tokio::spawn(async move { handle.health_check().await });

    // The object raises the request attribute and pokes upstream.
    wait_until(|| drive.handle.edge().attrs().health_check_request()).await;
    assert!(drive.upstream.quiesce_notifications() >= 1);

    // Upstream acknowledges.
    drive
        .handle
        .edge()
        .update_attrs(|a| a.with_health_check_ack(true));
    drive.handle.attrs_changed();

    check.await.unwrap().unwrap();
    assert!(drive.port.issued_opcodes().contains(&OP_SEND_DIAGNOSTIC));
    assert_eq!(
        drive.port.control_requests(),
        vec![ControlRequest::ResetDevice]
    );
    let attrs = drive.handle.edge().attrs();
    assert!(!attrs.health_check_request());
    assert!(!attrs.health_check_ack());
    assert_eq!(drive.handle.state(), EngineState::Ready);
}

#[tokio::test(start_paused = true)]
async fn health_check_deny_aborts_without_touching_the_drive() {
    let drive = spawn_drive(|_, _| {});
    drive.upstream.set_clients(1);
    wait_for_state(&drive.handle, EngineState::Ready).await;
    let before = drive.port.issued_opcodes().len();

    let handle = drive.handle.clone();
    let check = tokio::spawn(async move { handle.health_check().await });

    wait_until(|| drive.handle.edge().attrs().health_check_request()).await;
    drive
        .handle
        .edge()
        .update_attrs(|a| a.with_health_check_deny(true));
    drive.handle.attrs_changed();

    assert_eq!(check.await.unwrap(), Err(RequestError::Denied));
    // No self-test was issued and the object is still healthy.
    assert_eq!(drive.port.issued_opcodes().len(), before);
    assert_eq!(drive.handle.state(), EngineState::Ready);
    assert!(!drive.handle.edge().attrs().health_check_request());
}

#[tokio::test(start_paused = true)]
async fn health_check_retries_transient_self_test_failures() {
    let drive = spawn_drive(|_, _| {});
    drive.upstream.set_clients(1);
    wait_for_state(&drive.handle, EngineState::Ready).await;

    let transient = || {
        check(defs::SenseData::new(
            defs::SenseKey::UNIT_ATTENTION,
            defs::AdditionalSenseCode::BUS_RESET,
            defs::SCSI_SENSEQ_POWER_ON_RESET,
        ))
    };
    let diags = || {
        drive
            .port
            .issued_opcodes()
            .iter()
            .filter(|&&op| op == OP_SEND_DIAGNOSTIC)
            .count()
    };

    // Two checks back to back, each with two transient self-test
    // failures. The second only passes if the retry counter starts
    // fresh per check instead of accumulating.
    for round in 1..=2 {
        drive.port.script(OP_SEND_DIAGNOSTIC, transient());
        drive.port.script(OP_SEND_DIAGNOSTIC, transient());

        let handle = drive.handle.clone();
        let check = tokio::spawn(async move { handle.health_check().await });
        wait_until(|| drive.handle.edge().attrs().health_check_request()).await;
        drive
            .handle
            .edge()
            .update_attrs(|a| a.with_health_check_ack(true));
        drive.handle.attrs_changed();
        check.await.unwrap().unwrap();

        assert_eq!(diags(), round * 3);
        assert_eq!(drive.handle.state(), EngineState::Ready);
    }
    assert_eq!(
        drive.port.control_requests(),
        vec![ControlRequest::ResetDevice, ControlRequest::ResetDevice]
    );
}

#[tokio::test(start_paused = true)]
async fn firmware_download_chunks_and_power_cycles_when_idle() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;

    // 150 KiB image: two full 64 KiB chunks plus a remainder.
    let image = vec![0xA5u8; 150 * 1024];
    drive.handle.download_firmware(image).await.unwrap();

    let cdbs = drive.port.issued_cdbs();
    let writes: Vec<&Vec<u8>> = cdbs.iter().filter(|c| c[0] == OP_WRITE_BUFFER).collect();
    assert_eq!(writes.len(), 3);
    let offsets: Vec<u32> = writes
        .iter()
        .map(|c| u32::from_be_bytes([0, c[3], c[4], c[5]]))
        .collect();
    assert_eq!(offsets, vec![0, 0x10000, 0x20000]);
    assert!(drive.handle.edge().attrs().power_cycle_pending());

    // No clients attached: after the grace window the slot power cycles
    // and the drive re-activates on the new image.
    wait_until(|| {
        drive
            .port
            .control_requests()
            .contains(&ControlRequest::PowerCycle)
    })
    .await;
    wait_until(|| !drive.handle.edge().attrs().power_cycle_pending()).await;
    wait_for_state(&drive.handle, EngineState::Ready).await;
}

#[tokio::test(start_paused = true)]
async fn firmware_power_cycle_waits_for_clients_to_leave() {
    let drive = spawn_drive(|_, _| {});
    drive.upstream.set_clients(2);
    wait_for_state(&drive.handle, EngineState::Ready).await;

    drive
        .handle
        .download_firmware(vec![1u8; 4096])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(drive.port.control_requests().is_empty());
    assert!(drive.handle.edge().attrs().power_cycle_pending());

    drive.upstream.set_clients(0);
    wait_until(|| {
        drive
            .port
            .control_requests()
            .contains(&ControlRequest::PowerCycle)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn abort_cancels_queued_download() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;

    // A hibernating drive does not run the download protocol, so the
    // request stays queued where an abort can still withdraw it.
    drive.handle.power_save(true);
    wait_for_state(&drive.handle, EngineState::Hibernate).await;

    let handle = drive.handle.clone();
    let download = tokio::spawn(async move { handle.download_firmware(vec![1u8; 4096]).await });
    tokio::time::sleep(Duration::from_millis(5)).await;
    drive.handle.abort_download();

    assert_eq!(download.await.unwrap(), Err(RequestError::Canceled));
    assert!(!drive.port.issued_opcodes().contains(&OP_WRITE_BUFFER));

    drive.handle.power_save(false);
    wait_for_state(&drive.handle, EngineState::Ready).await;
}

#[tokio::test(start_paused = true)]
async fn abort_stops_an_active_transfer() {
    let drive = spawn_drive(|port, _| {
        // First chunk lands immediately; the second stalls long enough
        // for the abort to arrive mid-transfer.
        port.script(OP_WRITE_BUFFER, good());
        port.script_delayed(OP_WRITE_BUFFER, Duration::from_secs(10), good());
    });
    wait_for_state(&drive.handle, EngineState::Ready).await;

    let writes = || {
        drive
            .port
            .issued_opcodes()
            .iter()
            .filter(|&&op| op == OP_WRITE_BUFFER)
            .count()
    };

    let handle = drive.handle.clone();
    let download =
        tokio::spawn(async move { handle.download_firmware(vec![0xA5u8; 150 * 1024]).await });
    wait_until(|| writes() == 2).await;

    drive.handle.abort_download();
    assert_eq!(download.await.unwrap(), Err(RequestError::Canceled));
    assert!(!drive.handle.edge().attrs().download_in_progress());

    // The stalled chunk's completion drains without reviving the job:
    // no third chunk, no power cycle, and the object keeps serving.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(writes(), 2);
    assert!(!drive.handle.edge().attrs().power_cycle_pending());
    assert!(drive.port.control_requests().is_empty());
    assert_eq!(drive.handle.state(), EngineState::Ready);
}

#[tokio::test(start_paused = true)]
async fn sanitize_polls_progress_monotonically() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;

    // Progress: 25%, then a dip the engine must hide, then done.
    drive.port.script(OP_SANITIZE, good());
    drive
        .port
        .script(OP_TEST_UNIT_READY, sanitize_in_progress(16384));
    drive
        .port
        .script(OP_TEST_UNIT_READY, sanitize_in_progress(8192));

    drive
        .handle
        .sanitize(SanitizePattern::CryptoErase)
        .await
        .unwrap();
    let (state, percent) = drive.handle.sanitize_status();
    assert_eq!(state, SanitizeState::InProgress);
    assert_eq!(percent, 0);

    wait_until(|| drive.handle.sanitize_status().1 == 25).await;
    // Land between the second and third poll: the dip to 12% has been
    // reported by the drive but must never be surfaced.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(drive.handle.sanitize_status().1, 25);

    // Third poll hits the default GOOD response: sanitize complete, and
    // the object re-activates to reprogram what the sanitize wiped.
    wait_until(|| drive.handle.sanitize_status() == (SanitizeState::Ok, 100)).await;
    wait_for_state(&drive.handle, EngineState::Ready).await;
}

#[tokio::test(start_paused = true)]
async fn requests_are_held_while_sanitize_runs() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;

    drive.port.script(OP_SANITIZE, good());
    drive
        .port
        .script(OP_TEST_UNIT_READY, sanitize_in_progress(32768));
    drive
        .handle
        .sanitize(SanitizePattern::EraseOnly)
        .await
        .unwrap();

    let count_mode_senses = || {
        drive
            .port
            .issued_opcodes()
            .iter()
            .filter(|&&op| op == OP_MODE_SENSE10)
            .count()
    };
    let before = count_mode_senses();
    let handle = drive.handle.clone();
    let request = tokio::spawn(async move { handle.mode_page(defs::MODE_PAGE_CACHING).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    // Still queued; sanitize owns the drive.
    assert_eq!(count_mode_senses(), before);

    // Sanitize finishes on the next poll; the held request then runs.
    request.await.unwrap().unwrap();
    assert_eq!(drive.handle.sanitize_status().0, SanitizeState::Ok);
}

#[tokio::test(start_paused = true)]
async fn disk_collect_remap_exhaustion_flags_proactive_spare() {
    let drive = spawn_drive(|port, _| {
        // Every persist attempt hits a media error on the reserved block;
        // reassignment "succeeds" but the next write fails again.
        port.script_sticky(OP_WRITE_LONG, medium_error);
    });
    wait_for_state(&drive.handle, EngineState::Ready).await;

    wait_until(|| drive.handle.edge().attrs().proactive_spare()).await;

    let reassigns = drive
        .port
        .issued_opcodes()
        .iter()
        .filter(|&&op| op == OP_REASSIGN)
        .count();
    assert_eq!(reassigns, 3);
    // Flagging a spare is advisory; the object keeps serving.
    assert_eq!(drive.handle.state(), EngineState::Ready);
}

#[tokio::test(start_paused = true)]
async fn flash_drives_classify_from_vpd_and_skip_collect() {
    let drive = spawn_drive(|port, _| {
        let mut inquiry = defs::InquiryData::new_zeroed();
        inquiry.vendor_id = *b"FAKEDRIV";
        port.script(OP_INQUIRY, good_data(inquiry.as_bytes().to_vec()));
        // Only the block device characteristics page, reporting a
        // non-rotating medium.
        port.script(
            OP_INQUIRY,
            good_data(vec![0, defs::VPD_SUPPORTED_PAGES, 0, 1, 0xB1]),
        );
        port.script(OP_INQUIRY, good_data(vec![0, 0xB1, 0, 2, 0x00, 0x01]));
    });

    wait_for_state(&drive.handle, EngineState::Ready).await;
    assert_eq!(drive.handle.drive_class(), DriveClassId::Flash);

    // Collect never fires for flash.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!drive.port.issued_opcodes().contains(&OP_WRITE_LONG));
}

#[tokio::test(start_paused = true)]
async fn hibernate_spins_down_and_resumes() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;

    drive.handle.power_save(true);
    wait_for_state(&drive.handle, EngineState::Hibernate).await;
    wait_until(|| drive.handle.edge().attrs().power_save_on()).await;

    // STOP UNIT has the start bit clear.
    let cdbs = drive.port.issued_cdbs();
    let stop = cdbs.iter().filter(|c| c[0] == OP_START_STOP).last().unwrap();
    assert_eq!(stop[4] & 0x01, 0);

    drive.handle.power_save(false);
    wait_for_state(&drive.handle, EngineState::Ready).await;
    assert!(!drive.handle.edge().attrs().power_save_on());
}

#[tokio::test(start_paused = true)]
async fn peer_download_holds_activation() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;

    drive.handle.power_save(true);
    wait_for_state(&drive.handle, EngineState::Hibernate).await;

    // Resume while a peer on the shared bus is downloading firmware: the
    // object must park in activation until the hold clears.
    drive.handle.peer_download_hold(true);
    drive.handle.power_save(false);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(drive.handle.state(), EngineState::Activate);

    drive.handle.peer_download_hold(false);
    wait_for_state(&drive.handle, EngineState::Ready).await;
}

#[tokio::test(start_paused = true)]
async fn destroy_drains_and_detaches() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;

    drive.handle.destroy();
    drive.task.await.unwrap();

    assert_eq!(drive.handle.state(), EngineState::Destroy);
    assert_eq!(drive.handle.death_reason(), Some(DeathReason::Destroyed));
    assert_eq!(drive.handle.edge().path_state(), PathState::Invalid);

    let err = drive.handle.mode_page(defs::MODE_PAGE_CACHING).await;
    assert_eq!(err, Err(RequestError::ObjectFailed(DeathReason::Destroyed)));
}

#[tokio::test(start_paused = true)]
async fn edge_loss_fails_pending_work() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;

    drive.handle.edge().set_path_state(PathState::Gone);
    drive.handle.edge_lost();
    wait_for_state(&drive.handle, EngineState::Fail).await;
    assert_eq!(drive.handle.death_reason(), Some(DeathReason::EdgeGone));

    let err = drive.handle.vpd_page(defs::VPD_SERIAL_NUMBER).await;
    assert_eq!(err, Err(RequestError::ObjectFailed(DeathReason::EdgeGone)));
}

#[tokio::test(start_paused = true)]
async fn reclassify_switches_rotaries() {
    let drive = spawn_drive(|_, _| {});
    wait_for_state(&drive.handle, EngineState::Ready).await;
    assert_eq!(drive.handle.drive_class(), DriveClassId::Sas);

    drive.handle.reclassify(DriveClassId::SataPaddlecard);
    wait_until(|| drive.handle.drive_class() == DriveClassId::SataPaddlecard).await;
    assert_eq!(drive.handle.state(), EngineState::Ready);
}
