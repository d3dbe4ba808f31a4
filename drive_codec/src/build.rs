// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builders for the drive command descriptors. Each builder produces a
//! complete [`CommandRequest`] with the CDB, data-phase buffers, and the
//! timeout class appropriate for the command.

use crate::TIMEOUT_CONTROL;
use crate::TIMEOUT_FIRMWARE;
use crate::TIMEOUT_FORMAT;
use crate::TIMEOUT_STATUS;
use drive_core::CommandRequest;
use drive_core::SanitizePattern;
use drive_defs as defs;
use drive_defs::ScsiOp;
use drive_defs::CDB_SIZE;
use std::time::Duration;
use zerocopy::IntoBytes;

fn request<T: IntoBytes + zerocopy::Immutable>(
    cdb: &T,
    data_out: Option<Vec<u8>>,
    data_in_len: usize,
    timeout: Duration,
) -> CommandRequest {
    let bytes = cdb.as_bytes();
    assert!(bytes.len() <= CDB_SIZE);
    let mut slot = [0u8; CDB_SIZE];
    slot[..bytes.len()].copy_from_slice(bytes);
    CommandRequest {
        cdb: slot,
        cdb_len: bytes.len() as u8,
        data_out,
        data_in_len,
        timeout,
    }
}

/// Standard INQUIRY.
pub fn inquiry() -> CommandRequest {
    let len = size_of::<defs::InquiryData>();
    let cdb = defs::CdbInquiry {
        operation_code: ScsiOp::INQUIRY,
        flags: defs::InquiryFlags::new(),
        page_code: 0,
        allocation_length: (len as u16).into(),
        control: 0,
    };
    request(&cdb, None, len, TIMEOUT_CONTROL)
}

/// VPD INQUIRY for `page_code`, reading up to `allocation_length` bytes.
pub fn vpd_inquiry(page_code: u8, allocation_length: u16) -> CommandRequest {
    let cdb = defs::CdbInquiry {
        operation_code: ScsiOp::INQUIRY,
        flags: defs::InquiryFlags::new().with_vpd(true),
        page_code,
        allocation_length: allocation_length.into(),
        control: 0,
    };
    request(&cdb, None, allocation_length as usize, TIMEOUT_CONTROL)
}

/// TEST UNIT READY.
pub fn test_unit_ready() -> CommandRequest {
    let cdb = defs::Cdb6Generic {
        operation_code: ScsiOp::TEST_UNIT_READY,
        immediate: 0,
        reserved: [0; 2],
        allocation_length: 0,
        control: 0,
    };
    request(&cdb, None, 0, TIMEOUT_STATUS)
}

/// MODE SENSE (10) for a single page, current values.
pub fn mode_sense10(page_code: u8, allocation_length: u16) -> CommandRequest {
    let cdb = defs::ModeSense10 {
        operation_code: ScsiOp::MODE_SENSE10,
        flags1: 0,
        flags2: defs::ModeSenseFlags::new()
            .with_page_code(page_code)
            .with_pc(defs::MODE_SENSE_CURRENT_VALUES),
        sub_page_code: 0,
        reserved2: [0; 3],
        allocation_length: allocation_length.into(),
        control: 0,
    };
    request(&cdb, None, allocation_length as usize, TIMEOUT_CONTROL)
}

/// MODE SELECT (10) carrying `parameter_list` (header + page), with the
/// save-pages bit set so the drive persists the change.
pub fn mode_select10(parameter_list: Vec<u8>) -> CommandRequest {
    let cdb = defs::ModeSelect10 {
        operation_code: ScsiOp::MODE_SELECT10,
        flags: defs::ModeSelectFlags::new().with_pfbit(true).with_spbit(true),
        reserved: [0; 5],
        parameter_list_length: (parameter_list.len() as u16).into(),
        control: 0,
    };
    request(&cdb, Some(parameter_list), 0, TIMEOUT_CONTROL)
}

/// MODE SELECT (10) parameter list that changes the formatted block length
/// via a block descriptor, for use ahead of FORMAT UNIT.
pub fn mode_select_block_size(block_length: u32) -> CommandRequest {
    let header = defs::ModeParameterHeader10 {
        mode_data_length: 0.into(),
        medium_type: 0,
        device_specific_parameter: 0,
        reserved: [0; 2],
        block_descriptor_length: (size_of::<defs::ModeBlockDescriptor>() as u16).into(),
    };
    let be = block_length.to_be_bytes();
    let descriptor = defs::ModeBlockDescriptor {
        density_code: 0,
        number_of_blocks: [0; 3],
        reserved: 0,
        block_length: [be[1], be[2], be[3]],
    };
    let mut list = header.as_bytes().to_vec();
    list.extend_from_slice(descriptor.as_bytes());
    mode_select10(list)
}

/// MODE SELECT (10) setting the control-page busy timeout period, which
/// bounds how long the drive holds queued commands during internal
/// recovery.
pub fn queue_timer(millis: u32) -> CommandRequest {
    let header = defs::ModeParameterHeader10 {
        mode_data_length: 0.into(),
        medium_type: 0,
        device_specific_parameter: 0,
        reserved: [0; 2],
        block_descriptor_length: 0.into(),
    };
    let page = defs::ModeControlPage {
        page_code: defs::MODE_PAGE_CONTROL,
        page_length: defs::MODE_CONTROL_PAGE_LENGTH,
        flags1: 0,
        queue_flags: 0,
        flags2: 0,
        autoload_mode: 0,
        obsolete: [0; 2],
        busy_timeout_period: (u16::try_from(millis / 100).unwrap_or(u16::MAX)).into(),
        extended_self_test_time: 0.into(),
    };
    let mut list = header.as_bytes().to_vec();
    list.extend_from_slice(page.as_bytes());
    mode_select10(list)
}

/// READ CAPACITY (10).
pub fn read_capacity10() -> CommandRequest {
    let len = size_of::<defs::ReadCapacityData>();
    let cdb = defs::CdbReadCapacity {
        operation_code: ScsiOp::READ_CAPACITY,
        reserved1: 0,
        logical_block: 0.into(),
        reserved2: [0; 2],
        pmi: 0,
        control: 0,
    };
    request(&cdb, None, len, TIMEOUT_CONTROL)
}

/// READ CAPACITY (16), for drives past the 32-bit LBA boundary.
pub fn read_capacity16() -> CommandRequest {
    let len = size_of::<defs::ReadCapacity16Data>();
    let cdb = defs::ServiceActionIn16 {
        operation_code: ScsiOp::READ_CAPACITY16,
        service_action: defs::SERVICE_ACTION_READ_CAPACITY16,
        logical_block: [0; 8],
        allocation_length: (len as u32).to_be_bytes(),
        flags: 0,
        control: 0,
    };
    request(&cdb, None, len, TIMEOUT_CONTROL)
}

/// START STOP UNIT with the start bit set (spin up).
pub fn start_unit() -> CommandRequest {
    let cdb = defs::StartStop {
        operation_code: ScsiOp::START_STOP_UNIT,
        immediate: 0,
        reserved2: [0; 2],
        flag: defs::StartStopFlags::new().with_start(true),
        control: 0,
    };
    // Spin-up can take tens of seconds on large rotational media.
    request(&cdb, None, 0, TIMEOUT_FIRMWARE)
}

/// START STOP UNIT with the start bit clear (spin down).
pub fn stop_unit() -> CommandRequest {
    let cdb = defs::StartStop {
        operation_code: ScsiOp::START_STOP_UNIT,
        immediate: 0,
        reserved2: [0; 2],
        flag: defs::StartStopFlags::new(),
        control: 0,
    };
    request(&cdb, None, 0, TIMEOUT_CONTROL)
}

/// WRITE BUFFER carrying one firmware image chunk at `offset`. The final
/// chunk triggers the drive-internal commit, so every chunk gets the long
/// firmware timeout.
pub fn write_buffer(buffer_id: u8, offset: u32, chunk: Vec<u8>) -> CommandRequest {
    let off = offset.to_be_bytes();
    let len = (chunk.len() as u32).to_be_bytes();
    let cdb = defs::WriteBuffer {
        operation_code: ScsiOp::WRITE_DATA_BUFF,
        mode: defs::WRITE_BUFFER_MODE_DOWNLOAD_OFFSETS_SAVE,
        buffer_id,
        buffer_offset: [off[1], off[2], off[3]],
        parameter_list_length: [len[1], len[2], len[3]],
        control: 0,
    };
    request(&cdb, Some(chunk), 0, TIMEOUT_FIRMWARE)
}

/// SANITIZE for the given pattern. All variants are issued immediate; the
/// caller polls progress with TEST UNIT READY.
pub fn sanitize(pattern: SanitizePattern) -> CommandRequest {
    let (service_action, parameter_list): (u8, Option<Vec<u8>>) = match pattern {
        SanitizePattern::EraseOnly => (defs::SANITIZE_ACTION_BLOCK_ERASE, None),
        SanitizePattern::CryptoErase => (defs::SANITIZE_ACTION_CRYPTO_ERASE, None),
        SanitizePattern::Overwrite => {
            (defs::SANITIZE_ACTION_OVERWRITE, Some(overwrite_list(false)))
        }
        SanitizePattern::OverwriteAndErase => {
            (defs::SANITIZE_ACTION_OVERWRITE, Some(overwrite_list(true)))
        }
    };
    let list_len = parameter_list.as_ref().map_or(0, |l| l.len() as u16);
    let cdb = defs::Sanitize {
        operation_code: ScsiOp::SANITIZE,
        flags: defs::SanitizeFlags::new()
            .with_service_action(service_action)
            .with_immediate(true)
            .with_ause(true),
        reserved: [0; 5],
        parameter_list_length: list_len.into(),
        control: 0,
    };
    request(&cdb, parameter_list, 0, TIMEOUT_FORMAT)
}

fn overwrite_list(invert: bool) -> Vec<u8> {
    // Single zero-fill pass; the invert bit adds a complemented second pass
    // for the overwrite-and-erase variant.
    let pattern = [0u8; 4];
    let header = defs::SanitizeOverwriteHeader {
        flags: 0x01 | if invert { 0x80 } else { 0 },
        reserved: 0,
        pattern_length: (pattern.len() as u16).into(),
    };
    let mut list = header.as_bytes().to_vec();
    list.extend_from_slice(&pattern);
    list
}

/// SEND DIAGNOSTIC requesting the short foreground self-test.
pub fn send_diagnostic_self_test() -> CommandRequest {
    let cdb = defs::SendDiagnostic {
        operation_code: ScsiOp::SEND_DIAGNOSTIC,
        flags: defs::SendDiagnosticFlags::new()
            .with_self_test_code(defs::DIAGNOSTIC_SELF_TEST_SHORT_FOREGROUND)
            .with_self_test(true),
        reserved: 0,
        parameter_list_length: 0.into(),
        control: 0,
    };
    request(&cdb, None, 0, TIMEOUT_CONTROL)
}

/// READ LONG of one physical block, including ECC bytes.
pub fn read_long(logical_block: u32, byte_length: u16) -> CommandRequest {
    let cdb = defs::ReadWriteLong {
        operation_code: ScsiOp::READ_LONG,
        flags: 0,
        logical_block: logical_block.into(),
        reserved: 0,
        byte_transfer_length: byte_length.into(),
        control: 0,
    };
    request(&cdb, None, byte_length as usize, TIMEOUT_CONTROL)
}

/// WRITE LONG of one physical block (defect injection/recovery).
pub fn write_long(logical_block: u32, data: Vec<u8>) -> CommandRequest {
    let cdb = defs::ReadWriteLong {
        operation_code: ScsiOp::WRITE_LONG,
        flags: 0,
        logical_block: logical_block.into(),
        reserved: 0,
        byte_transfer_length: (data.len() as u16).into(),
        control: 0,
    };
    request(&cdb, Some(data), 0, TIMEOUT_CONTROL)
}

/// REASSIGN BLOCKS carrying a single-entry defect descriptor, used by the
/// disk-collect remap sub-protocol after a media error.
pub fn reassign_blocks(logical_block: u32) -> CommandRequest {
    let cdb = defs::Cdb6Generic {
        operation_code: ScsiOp::REASSIGN_BLOCKS,
        immediate: 0,
        reserved: [0; 2],
        allocation_length: 0,
        control: 0,
    };
    // Four-byte header (defect list length) + one four-byte LBA entry.
    let mut list = vec![0u8, 0, 0, 4];
    list.extend_from_slice(&logical_block.to_be_bytes());
    request(&cdb, Some(list), 0, TIMEOUT_CONTROL)
}

/// LOG SENSE for `page_code`, current cumulative values.
pub fn log_sense(page_code: u8, allocation_length: u16) -> CommandRequest {
    let cdb = defs::LogSense {
        operation_code: ScsiOp::LOG_SENSE,
        flags: 0,
        page: defs::LogSensePage::new().with_page_code(page_code).with_pc(1),
        sub_page_code: 0,
        reserved: [0; 1],
        parameter_pointer: 0.into(),
        allocation_length: allocation_length.into(),
        control: 0,
    };
    request(&cdb, None, allocation_length as usize, TIMEOUT_CONTROL)
}

/// FORMAT UNIT with default defect handling. The block size is changed
/// beforehand via [`mode_select_block_size`].
pub fn format_unit() -> CommandRequest {
    let cdb = defs::FormatUnit {
        operation_code: ScsiOp::FORMAT_UNIT,
        flags: 0,
        vendor_specific: 0,
        obsolete: [0; 2],
        control: 0,
    };
    request(&cdb, None, 0, TIMEOUT_FORMAT)
}

/// Pass-through of an opaque caller-supplied CDB.
pub fn passthrough(
    cdb_bytes: &[u8],
    data_out: Option<Vec<u8>>,
    data_in_len: usize,
) -> Option<CommandRequest> {
    if cdb_bytes.is_empty() || cdb_bytes.len() > CDB_SIZE {
        return None;
    }
    let mut slot = [0u8; CDB_SIZE];
    slot[..cdb_bytes.len()].copy_from_slice(cdb_bytes);
    Some(CommandRequest {
        cdb: slot,
        cdb_len: cdb_bytes.len() as u8,
        data_out,
        data_in_len,
        timeout: TIMEOUT_CONTROL,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inquiry_cdb_shape() {
        let req = inquiry();
        assert_eq!(req.cdb[0], 0x12);
        assert_eq!(req.cdb_len, 6);
        assert_eq!(req.data_in_len, size_of::<defs::InquiryData>());
        let alloc = u16::from_be_bytes([req.cdb[3], req.cdb[4]]);
        assert_eq!(alloc as usize, req.data_in_len);
    }

    #[test]
    fn vpd_inquiry_sets_evpd() {
        let req = vpd_inquiry(defs::VPD_SERIAL_NUMBER, 0xFF);
        assert_eq!(req.cdb[0], 0x12);
        assert_eq!(req.cdb[1] & 0x01, 0x01);
        assert_eq!(req.cdb[2], 0x80);
    }

    #[test]
    fn tur_is_a_status_probe() {
        let req = test_unit_ready();
        assert_eq!(req.cdb[0], 0x00);
        assert_eq!(req.timeout, TIMEOUT_STATUS);
        assert_eq!(req.data_in_len, 0);
    }

    #[test]
    fn write_buffer_chunk_encoding() {
        let req = write_buffer(0, 0x012345, vec![0xAB; 0x1000]);
        assert_eq!(req.cdb[0], 0x3B);
        assert_eq!(req.cdb[1], defs::WRITE_BUFFER_MODE_DOWNLOAD_OFFSETS_SAVE);
        assert_eq!(&req.cdb[3..6], &[0x01, 0x23, 0x45]);
        assert_eq!(&req.cdb[6..9], &[0x00, 0x10, 0x00]);
        assert_eq!(req.timeout, TIMEOUT_FIRMWARE);
        assert_eq!(req.data_out.as_ref().unwrap().len(), 0x1000);
    }

    #[test]
    fn sanitize_variants_are_distinct() {
        let erase = sanitize(SanitizePattern::EraseOnly);
        let crypto = sanitize(SanitizePattern::CryptoErase);
        let overwrite = sanitize(SanitizePattern::Overwrite);
        let both = sanitize(SanitizePattern::OverwriteAndErase);
        assert_eq!(erase.cdb[1] & 0x1F, defs::SANITIZE_ACTION_BLOCK_ERASE);
        assert_eq!(crypto.cdb[1] & 0x1F, defs::SANITIZE_ACTION_CRYPTO_ERASE);
        assert_eq!(overwrite.cdb[1] & 0x1F, defs::SANITIZE_ACTION_OVERWRITE);
        assert_eq!(both.cdb[1] & 0x1F, defs::SANITIZE_ACTION_OVERWRITE);
        assert!(erase.data_out.is_none());
        assert!(overwrite.data_out.is_some());
        assert_ne!(overwrite.data_out, both.data_out);
        // All variants poll asynchronously.
        for req in [&erase, &crypto, &overwrite, &both] {
            assert_ne!(req.cdb[1] & 0x80, 0, "immediate bit must be set");
        }
    }

    #[test]
    fn mode_select_block_size_descriptor() {
        let req = mode_select_block_size(520);
        let list = req.data_out.as_ref().unwrap();
        assert_eq!(list.len(), 16);
        assert_eq!(&list[13..16], &[0x00, 0x02, 0x08]);
    }

    #[test]
    fn queue_timer_encodes_100ms_units() {
        let req = queue_timer(2500);
        let list = req.data_out.as_ref().unwrap();
        assert_eq!(list.len(), 20);
        assert_eq!(list[8], defs::MODE_PAGE_CONTROL);
        assert_eq!(&list[16..18], &[0x00, 25]);
    }

    #[test]
    fn passthrough_validates_length() {
        assert!(passthrough(&[], None, 0).is_none());
        assert!(passthrough(&[0u8; 17], None, 0).is_none());
        let req = passthrough(&[0x12, 0, 0, 0, 36, 0], None, 36).unwrap();
        assert_eq!(req.cdb_len, 6);
    }
}
