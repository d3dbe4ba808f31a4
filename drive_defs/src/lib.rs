// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire-format definitions for the drive command set: CDB layouts, sense
//! data, inquiry/VPD pages, mode pages, and the status code open-enums.
//!
//! Everything here is a fixed-shape packed structure. Parsing and
//! construction live in `drive_codec`; this crate carries no policy.

#![forbid(unsafe_code)]

use bitfield_struct::bitfield;
use core::fmt::Debug;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

type U16BE = zerocopy::byteorder::U16<zerocopy::byteorder::BigEndian>;
type U32BE = zerocopy::byteorder::U32<zerocopy::byteorder::BigEndian>;
type U64BE = zerocopy::byteorder::U64<zerocopy::byteorder::BigEndian>;

/// Fixed CDB slot size. Shorter CDBs are zero-padded.
pub const CDB_SIZE: usize = 0x10;

/// Command operation codes. An open set: drives report vendor-specific
/// opcodes, so this is a newtype over the wire byte rather than a closed
/// enum.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ScsiOp(pub u8);

impl ScsiOp {
    pub const TEST_UNIT_READY: Self = Self(0x00);
    pub const REQUEST_SENSE: Self = Self(0x03);
    pub const FORMAT_UNIT: Self = Self(0x04);
    pub const REASSIGN_BLOCKS: Self = Self(0x07);
    pub const INQUIRY: Self = Self(0x12);
    pub const MODE_SELECT: Self = Self(0x15);
    pub const MODE_SENSE: Self = Self(0x1A);
    pub const START_STOP_UNIT: Self = Self(0x1B);
    pub const RECEIVE_DIAGNOSTIC: Self = Self(0x1C);
    pub const SEND_DIAGNOSTIC: Self = Self(0x1D);
    pub const READ_CAPACITY: Self = Self(0x25);
    pub const WRITE_DATA_BUFF: Self = Self(0x3B);
    pub const READ_DATA_BUFF: Self = Self(0x3C);
    pub const READ_LONG: Self = Self(0x3E);
    pub const WRITE_LONG: Self = Self(0x3F);
    pub const SANITIZE: Self = Self(0x48); // block device
    pub const LOG_SELECT: Self = Self(0x4C);
    pub const LOG_SENSE: Self = Self(0x4D);
    pub const MODE_SELECT10: Self = Self(0x55);
    pub const MODE_SENSE10: Self = Self(0x5A);
    pub const READ_CAPACITY16: Self = Self(0x9E); // SERVICE ACTION IN (16)
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ScsiStatus(pub u8);

impl ScsiStatus {
    pub const GOOD: Self = Self(0x00);
    pub const CHECK_CONDITION: Self = Self(0x02);
    pub const CONDITION_MET: Self = Self(0x04);
    pub const BUSY: Self = Self(0x08);
    pub const RESERVATION_CONFLICT: Self = Self(0x18);
    pub const QUEUE_FULL: Self = Self(0x28);
    pub const TASK_ABORTED: Self = Self(0x40);
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SenseKey(pub u8);

impl SenseKey {
    pub const NO_SENSE: Self = Self(0x00);
    pub const RECOVERED_ERROR: Self = Self(0x01);
    pub const NOT_READY: Self = Self(0x02);
    pub const MEDIUM_ERROR: Self = Self(0x03);
    pub const HARDWARE_ERROR: Self = Self(0x04);
    pub const ILLEGAL_REQUEST: Self = Self(0x05);
    pub const UNIT_ATTENTION: Self = Self(0x06);
    pub const DATA_PROTECT: Self = Self(0x07);
    pub const ABORTED_COMMAND: Self = Self(0x0B);
    pub const MISCOMPARE: Self = Self(0x0E);
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SenseDataErrorCode(pub u8);

impl SenseDataErrorCode {
    pub const FIXED_CURRENT: Self = Self(0x70);
    pub const FIXED_DEFERRED: Self = Self(0x71);
    pub const DESCRIPTOR_CURRENT: Self = Self(0x72);
    pub const DESCRIPTOR_DEFERRED: Self = Self(0x73);
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct AdditionalSenseCode(pub u8);

impl AdditionalSenseCode {
    pub const NO_SENSE: Self = Self(0x00);
    pub const LUN_NOT_READY: Self = Self(0x04);
    pub const LUN_COMMUNICATION: Self = Self(0x08);
    pub const WRITE_ERROR: Self = Self(0x0C);
    pub const CRC_OR_ECC_ERROR: Self = Self(0x10);
    pub const UNRECOVERED_ERROR: Self = Self(0x11);
    pub const TRACK_ERROR: Self = Self(0x14);
    pub const SEEK_ERROR: Self = Self(0x15);
    pub const DEFECT_LIST_ERROR: Self = Self(0x19);
    pub const PARAMETER_LIST_LENGTH: Self = Self(0x1A);
    pub const ILLEGAL_COMMAND: Self = Self(0x20);
    pub const ILLEGAL_BLOCK: Self = Self(0x21);
    pub const INVALID_CDB: Self = Self(0x24);
    pub const INVALID_LUN: Self = Self(0x25);
    pub const INVALID_FIELD_PARAMETER_LIST: Self = Self(0x26);
    pub const WRITE_PROTECT: Self = Self(0x27);
    pub const BUS_RESET: Self = Self(0x29);
    pub const PARAMETERS_CHANGED: Self = Self(0x2A);
    pub const INSUFFICIENT_TIME_FOR_OPERATION: Self = Self(0x2E);
    pub const MEDIUM_FORMAT_CORRUPTED: Self = Self(0x31);
    pub const NO_MEDIA_IN_DEVICE: Self = Self(0x3A);
    pub const OPERATING_CONDITIONS_CHANGED: Self = Self(0x3F);
    pub const INTERNAL_TARGET_FAILURE: Self = Self(0x44);
    pub const SELF_TEST_FAILURE: Self = Self(0x4C);
    pub const FAILURE_PREDICTION_THRESHOLD_EXCEEDED: Self = Self(0x5D);
    pub const POWER_STATE_CHANGE: Self = Self(0x5E);
}

// ASCQ values for AdditionalSenseCode::LUN_NOT_READY.
pub const SCSI_SENSEQ_CAUSE_NOT_REPORTABLE: u8 = 0x00;
pub const SCSI_SENSEQ_BECOMING_READY: u8 = 0x01;
pub const SCSI_SENSEQ_INIT_COMMAND_REQUIRED: u8 = 0x02;
pub const SCSI_SENSEQ_MANUAL_INTERVENTION_REQUIRED: u8 = 0x03;
pub const SCSI_SENSEQ_FORMAT_IN_PROGRESS: u8 = 0x04;
pub const SCSI_SENSEQ_SELF_TEST_IN_PROGRESS: u8 = 0x09;
pub const SCSI_SENSEQ_SANITIZE_IN_PROGRESS: u8 = 0x1B;

// ASCQ values for AdditionalSenseCode::MEDIUM_FORMAT_CORRUPTED.
pub const SCSI_SENSEQ_FORMAT_COMMAND_FAILED: u8 = 0x01;
pub const SCSI_SENSEQ_SANITIZE_COMMAND_FAILED: u8 = 0x03;

// ASCQ values for AdditionalSenseCode::BUS_RESET.
pub const SCSI_SENSEQ_POWER_ON_RESET: u8 = 0x01;

// ASCQ for FAILURE_PREDICTION_THRESHOLD_EXCEEDED reported by the drive
// itself (end-of-life indication).
pub const SCSI_SENSEQ_FAILURE_PREDICTION_DRIVE: u8 = 0x00;

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SenseDataHeader {
    /*
    UCHAR ErrorCode:7;
    UCHAR Valid:1;
     */
    pub error_code: SenseDataErrorCode,
    pub segment_number: u8,
    /*
    UCHAR SenseKey:4;
    UCHAR Reserved:1;
    UCHAR IncorrectLength:1;
    UCHAR EndOfMedia:1;
    UCHAR FileMark:1;
     */
    pub sense_key: SenseKey,
    pub information: [u8; 4],
    pub additional_sense_length: u8,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SenseData {
    pub header: SenseDataHeader,
    pub command_specific_information: [u8; 4],
    pub additional_sense_code: AdditionalSenseCode,
    pub additional_sense_code_qualifier: u8,
    pub field_replaceable_unit_code: u8,
    /// Byte 0: SKSV in the high bit. For NOT READY progress indications,
    /// bytes 1..3 carry progress as a fraction of 65536.
    pub sense_key_specific: [u8; 3],
}

impl SenseData {
    pub const fn new(
        sense_key: SenseKey,
        additional_sense_code: AdditionalSenseCode,
        additional_sense_code_qualifier: u8,
    ) -> Self {
        SenseData {
            header: SenseDataHeader {
                error_code: SenseDataErrorCode::FIXED_CURRENT,
                segment_number: 0,
                sense_key,
                information: [0; 4],
                additional_sense_length: (size_of::<SenseData>() - size_of::<SenseDataHeader>())
                    as u8,
            },
            command_specific_information: [0; 4],
            additional_sense_code,
            additional_sense_code_qualifier,
            field_replaceable_unit_code: 0,
            sense_key_specific: [0; 3],
        }
    }

    /// Attaches a progress indication (numerator of 65536) in the
    /// sense-key-specific bytes.
    pub const fn with_progress(mut self, progress: u16) -> Self {
        let be = progress.to_be_bytes();
        self.sense_key_specific = [SENSE_KEY_SPECIFIC_VALID, be[0], be[1]];
        self
    }
}

pub const SENSE_KEY_SPECIFIC_VALID: u8 = 0x80;

//
// INQUIRY
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CdbInquiry {
    pub operation_code: ScsiOp, // 0x12 - SCSIOP_INQUIRY
    pub flags: InquiryFlags,
    pub page_code: u8,
    pub allocation_length: U16BE,
    pub control: u8,
}

#[bitfield(u8)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct InquiryFlags {
    #[bits(1)]
    pub vpd: bool,
    #[bits(1)]
    pub csd: bool,
    #[bits(6)]
    pub reserved: u8,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct InquiryDataHeader {
    /*
    UCHAR DeviceType : 5;
    UCHAR DeviceTypeQualifier : 3;
    */
    pub device_type: u8,
    pub flags2: InquiryDataFlag2,
    pub versions: u8,
    pub flags3: InquiryDataFlag3,
    pub additional_length: u8,
}

#[bitfield(u8)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct InquiryDataFlag2 {
    #[bits(7)]
    pub device_type_modifier: u8,
    #[bits(1)]
    pub removable_media: bool,
}

#[bitfield(u8)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct InquiryDataFlag3 {
    #[bits(4)]
    pub response_data_format: u8,
    #[bits(1)]
    pub hi_support: bool,
    #[bits(1)]
    pub norm_aca: bool,
    #[bits(1)]
    pub reserved_bit: bool,
    #[bits(1)]
    pub aerc: bool,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct InquiryData {
    pub header: InquiryDataHeader,
    pub reserved: [u8; 2],
    /*
    UCHAR SoftReset : 1;
    UCHAR CommandQueue : 1;
    UCHAR TransferDisable : 1;
    UCHAR LinkedCommands : 1;
    UCHAR Synchronous : 1;
    UCHAR Wide16Bit : 1;
    UCHAR Wide32Bit : 1;
    UCHAR RelativeAddressing : 1;
     */
    pub misc: u8,
    pub vendor_id: [u8; 8],
    pub product_id: [u8; 16],
    pub product_revision_level: [u8; 4],
    pub vendor_specific: [u8; 20],
    pub reserved3: [u8; 2],
    pub version_descriptors: [u16; 8],
    pub reserved4: [u8; 30],
}

pub const INQUIRY_DATA_CMDQUE: u8 = 0x02;

pub const DIRECT_ACCESS_DEVICE: u8 = 0x00;
pub const DEVICE_QUALIFIER_ACTIVE: u8 = 0x00;
pub const DEVICE_QUALIFIER_NOT_ACTIVE: u8 = 0x01;
pub const DEVICE_QUALIFIER_NOT_SUPPORTED: u8 = 0x03;

//
// VPD pages
//

pub const VPD_SUPPORTED_PAGES: u8 = 0x00;
pub const VPD_SERIAL_NUMBER: u8 = 0x80;
pub const VPD_DEVICE_IDENTIFIERS: u8 = 0x83;
pub const VPD_BLOCK_DEVICE_CHARACTERISTICS: u8 = 0xB1;

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VpdPageHeader {
    /*
    UCHAR DeviceType : 5;
    UCHAR DeviceTypeQualifier : 3;
     */
    pub device_type: u8,
    pub page_code: u8,
    pub reserved: u8,
    pub page_length: u8,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VpdIdentificationDescriptor {
    pub code_set: u8,
    pub identifiertype: u8,
    pub reserved3: u8,
    pub identifier_length: u8,
}

/// VPD Page 0xB1, Block Device Characteristics.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VpdBlockDeviceCharacteristicsPage {
    pub medium_rotation_rate: U16BE,
    pub data: [u8; 58],
}

/// Rotation rate reported by solid-state media.
pub const MEDIUM_NON_ROTATING: u16 = 0x0001;

//
// TEST UNIT READY / REQUEST SENSE and other 6-byte CDBs
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Cdb6Generic {
    pub operation_code: ScsiOp,
    pub immediate: u8,
    pub reserved: [u8; 2],
    pub allocation_length: u8,
    pub control: u8,
}

//
// MODE SENSE / MODE SELECT (10)
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ModeSense10 {
    pub operation_code: ScsiOp,
    pub flags1: u8,
    pub flags2: ModeSenseFlags,
    pub sub_page_code: u8,
    pub reserved2: [u8; 3],
    pub allocation_length: U16BE,
    pub control: u8,
}

#[bitfield(u8)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ModeSenseFlags {
    #[bits(6)]
    pub page_code: u8,
    #[bits(2)]
    pub pc: u8,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ModeSelect10 {
    pub operation_code: ScsiOp,
    pub flags: ModeSelectFlags,
    pub reserved: [u8; 5],
    pub parameter_list_length: U16BE,
    pub control: u8,
}

#[bitfield(u8)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ModeSelectFlags {
    #[bits(1)]
    pub spbit: bool,
    #[bits(3)]
    pub reserved: u8,
    #[bits(1)]
    pub pfbit: bool,
    #[bits(3)]
    pub reserved2: u8,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ModeParameterHeader10 {
    pub mode_data_length: U16BE,
    pub medium_type: u8,
    pub device_specific_parameter: u8,
    pub reserved: [u8; 2],
    pub block_descriptor_length: U16BE,
}

pub const MODE_PAGE_CACHING: u8 = 0x08;
pub const MODE_PAGE_CONTROL: u8 = 0x0A;
pub const MODE_PAGE_POWER_CONDITION: u8 = 0x1A;
pub const MODE_PAGE_INFORMATIONAL_EXCEPTIONS: u8 = 0x1C;
pub const MODE_PAGE_ALL: u8 = 0x3F;

pub const MODE_SENSE_CURRENT_VALUES: u8 = 0x00;
pub const MODE_SENSE_CHANGEABLE_VALUES: u8 = 0x01;
pub const MODE_SENSE_DEFAULT_VALUES: u8 = 0x02;
pub const MODE_SENSE_SAVED_VALUES: u8 = 0x03;

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ModeCachingPage {
    /*
    UCHAR PageCode : 6;
    UCHAR Reserved : 1;
    UCHAR PageSavable : 1;
    */
    pub page_code: u8,
    pub page_length: u8,
    /*
    UCHAR ReadDisableCache : 1;
    UCHAR MultiplicationFactor : 1;
    UCHAR WriteCacheEnable : 1;
    UCHAR Reserved2 : 5;
    */
    pub flags: u8,
    pub retention: u8,
    pub disable_prefetch_transfer: [u8; 2],
    pub minimum_prefetch: [u8; 2],
    pub maximum_prefetch: [u8; 2],
    pub maximum_prefetch_ceiling: [u8; 2],
    pub flags2: u8,
    pub number_of_cache_segments: u8,
    pub cache_segment_size: [u8; 2],
    pub reserved3: [u8; 4],
}

pub const MODE_CACHING_WRITE_CACHE_ENABLE: u8 = 0x04;

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ModeControlPage {
    /*
    UCHAR PageCode : 6;
    UCHAR Reserved : 1;
    UCHAR PageSavable : 1;
    */
    pub page_code: u8,
    pub page_length: u8,
    /*
    UCHAR RLEC : 1;
    UCHAR GLTSD : 1;
    UCHAR D_SENSE : 1;
    UCHAR TMFOnly : 1;
    UCHAR Reserved2 : 1;
    UCHAR TST : 3;
    */
    pub flags1: u8,
    /*
    UCHAR Obsolete : 1;
    UCHAR QErr : 2;
    UCHAR Reserved3 : 1;
    UCHAR QueueAlgorithmModifier : 4;
    */
    pub queue_flags: u8,
    pub flags2: u8,
    pub autoload_mode: u8,
    pub obsolete: [u8; 2],
    /// In 100 ms units.
    pub busy_timeout_period: U16BE,
    pub extended_self_test_time: U16BE,
}

pub const MODE_CONTROL_PAGE_LENGTH: u8 = 0x0A;

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct PowerConditionPage {
    /*
    UCHAR PageCode : 6;
    UCHAR Reserved1 : 1;
    UCHAR PSBit : 1;
    */
    pub page_code: u8,
    pub page_length: u8,
    pub reserved: u8,
    /*
    UCHAR Standby : 1;
    UCHAR Idle : 1;
    UCHAR Reserved3 : 6;
    */
    pub flags: u8,
    pub idle_timer: U32BE,
    pub standby_timer: U32BE,
}

//
// READ CAPACITY (10/16)
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CdbReadCapacity {
    pub operation_code: ScsiOp,
    pub reserved1: u8,
    pub logical_block: U32BE,
    pub reserved2: [u8; 2],
    pub pmi: u8,
    pub control: u8,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ServiceActionIn16 {
    pub operation_code: ScsiOp,
    pub service_action: u8,
    pub logical_block: [u8; 8],
    pub allocation_length: [u8; 4],
    pub flags: u8,
    pub control: u8,
}

pub const SERVICE_ACTION_READ_CAPACITY16: u8 = 0x10;

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ReadCapacityData {
    pub logical_block_address: U32BE,
    pub bytes_per_block: U32BE,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ReadCapacityDataEx {
    pub logical_block_address: U64BE,
    pub bytes_per_block: U32BE,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ReadCapacity16Data {
    pub ex: ReadCapacityDataEx,
    /*
    UCHAR ProtectionEnable : 1;
    UCHAR ProtectionType : 3;
    UCHAR RcBasis  : 2;
    UCHAR Reserved : 2;
    */
    pub flags: u8,
    pub exponents: u8,
    pub lowest_aligned_block_msb: u8,
    pub lowest_aligned_block_lsb: u8,
    pub reserved: [u8; 16],
}

//
// START STOP UNIT
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct StartStop {
    pub operation_code: ScsiOp,
    /*
    UCHAR Immediate: 1;
    UCHAR Reserved1 : 4;
    UCHAR LogicalUnitNumber : 3;
     */
    pub immediate: u8,
    pub reserved2: [u8; 2],
    pub flag: StartStopFlags,
    pub control: u8,
}

#[bitfield(u8)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct StartStopFlags {
    #[bits(1)]
    pub start: bool,
    #[bits(1)]
    pub load_eject: bool,
    #[bits(2)]
    pub reserved: u8,
    #[bits(4)]
    pub power_condition: u8,
}

//
// WRITE BUFFER (firmware download)
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct WriteBuffer {
    pub operation_code: ScsiOp,
    /*
    UCHAR Mode : 5;
    UCHAR ModeSpecific : 3;
    */
    pub mode: u8,
    pub buffer_id: u8,
    pub buffer_offset: [u8; 3],
    pub parameter_list_length: [u8; 3],
    pub control: u8,
}

pub const WRITE_BUFFER_MODE_DATA: u8 = 0x02;
pub const WRITE_BUFFER_MODE_DOWNLOAD_SAVE: u8 = 0x05;
pub const WRITE_BUFFER_MODE_DOWNLOAD_OFFSETS_SAVE: u8 = 0x07;

//
// SANITIZE
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Sanitize {
    pub operation_code: ScsiOp,
    pub flags: SanitizeFlags,
    pub reserved: [u8; 5],
    pub parameter_list_length: U16BE,
    pub control: u8,
}

#[bitfield(u8)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SanitizeFlags {
    #[bits(5)]
    pub service_action: u8,
    #[bits(1)]
    pub ause: bool,
    #[bits(1)]
    pub znr: bool,
    #[bits(1)]
    pub immediate: bool,
}

pub const SANITIZE_ACTION_OVERWRITE: u8 = 0x01;
pub const SANITIZE_ACTION_BLOCK_ERASE: u8 = 0x02;
pub const SANITIZE_ACTION_CRYPTO_ERASE: u8 = 0x03;
pub const SANITIZE_ACTION_EXIT_FAILURE_MODE: u8 = 0x1F;

/// Parameter list for the overwrite service action. The initialization
/// pattern follows this header.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SanitizeOverwriteHeader {
    /*
    UCHAR OverwriteCount : 5;
    UCHAR Test : 2;
    UCHAR Invert : 1;
    */
    pub flags: u8,
    pub reserved: u8,
    pub pattern_length: U16BE,
}

//
// SEND / RECEIVE DIAGNOSTIC
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SendDiagnostic {
    pub operation_code: ScsiOp,
    pub flags: SendDiagnosticFlags,
    pub reserved: u8,
    pub parameter_list_length: U16BE,
    pub control: u8,
}

#[bitfield(u8)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SendDiagnosticFlags {
    #[bits(1)]
    pub unit_offline: bool,
    #[bits(1)]
    pub device_offline: bool,
    #[bits(1)]
    pub self_test: bool,
    #[bits(1)]
    pub reserved: bool,
    #[bits(1)]
    pub page_format: bool,
    #[bits(3)]
    pub self_test_code: u8,
}

pub const DIAGNOSTIC_SELF_TEST_SHORT_BACKGROUND: u8 = 0x01;
pub const DIAGNOSTIC_SELF_TEST_SHORT_FOREGROUND: u8 = 0x05;

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ReceiveDiagnostic {
    pub operation_code: ScsiOp,
    /*
    UCHAR PageCodeValid : 1;
    UCHAR Reserved : 7;
    */
    pub pcv: u8,
    pub page_code: u8,
    pub allocation_length: U16BE,
    pub control: u8,
}

//
// READ LONG / WRITE LONG
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ReadWriteLong {
    pub operation_code: ScsiOp,
    /*
    UCHAR Correct : 1;    (READ LONG)
    UCHAR PhysicalBlock : 1;
    UCHAR Reserved : 6;
    */
    pub flags: u8,
    pub logical_block: U32BE,
    pub reserved: u8,
    pub byte_transfer_length: U16BE,
    pub control: u8,
}

//
// LOG SENSE
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct LogSense {
    pub operation_code: ScsiOp,
    /*
    UCHAR SPBit : 1;
    UCHAR PPCBit : 1;
    UCHAR Reserved : 6;
    */
    pub flags: u8,
    /*
    UCHAR PageCode : 6;
    UCHAR PCBit : 2;
    */
    pub page: LogSensePage,
    pub sub_page_code: u8,
    pub reserved: [u8; 1],
    pub parameter_pointer: U16BE,
    pub allocation_length: U16BE,
    pub control: u8,
}

#[bitfield(u8)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct LogSensePage {
    #[bits(6)]
    pub page_code: u8,
    #[bits(2)]
    pub pc: u8,
}

pub const LOG_PAGE_SUPPORTED_PAGES: u8 = 0x00;
pub const LOG_PAGE_READ_ERROR_COUNTERS: u8 = 0x03;
pub const LOG_PAGE_WRITE_ERROR_COUNTERS: u8 = 0x02;
pub const LOG_PAGE_TEMPERATURE: u8 = 0x0D;
pub const LOG_PAGE_SELF_TEST_RESULTS: u8 = 0x10;
pub const LOG_PAGE_INFORMATIONAL_EXCEPTIONS: u8 = 0x2F;

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct LogPageHeader {
    /*
    UCHAR PageCode : 6;
    UCHAR SubPageFormat : 1;
    UCHAR DisableSave : 1;
    */
    pub page_code: u8,
    pub sub_page_code: u8,
    pub page_length: U16BE,
}

//
// FORMAT UNIT
//

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct FormatUnit {
    pub operation_code: ScsiOp,
    /*
    UCHAR DefectListFormat : 3;
    UCHAR CmpList : 1;
    UCHAR FmtData : 1;
    UCHAR LongList : 1;
    UCHAR FmtPInfo : 2;
    */
    pub flags: u8,
    pub vendor_specific: u8,
    pub obsolete: [u8; 2],
    pub control: u8,
}

/// Mode parameter block descriptor carried by MODE SELECT when changing the
/// formatted block size.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ModeBlockDescriptor {
    pub density_code: u8,
    pub number_of_blocks: [u8; 3],
    pub reserved: u8,
    pub block_length: [u8; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdb_layout_sizes() {
        assert_eq!(size_of::<CdbInquiry>(), 6);
        assert_eq!(size_of::<Cdb6Generic>(), 6);
        assert_eq!(size_of::<ModeSense10>(), 10);
        assert_eq!(size_of::<ModeSelect10>(), 10);
        assert_eq!(size_of::<CdbReadCapacity>(), 10);
        assert_eq!(size_of::<ServiceActionIn16>(), 16);
        assert_eq!(size_of::<StartStop>(), 6);
        assert_eq!(size_of::<WriteBuffer>(), 10);
        assert_eq!(size_of::<Sanitize>(), 10);
        assert_eq!(size_of::<SendDiagnostic>(), 6);
        assert_eq!(size_of::<ReceiveDiagnostic>(), 6);
        assert_eq!(size_of::<ReadWriteLong>(), 10);
        assert_eq!(size_of::<LogSense>(), 10);
        assert_eq!(size_of::<FormatUnit>(), 6);
    }

    #[test]
    fn payload_layout_sizes() {
        assert_eq!(size_of::<InquiryData>(), 104);
        assert_eq!(size_of::<SenseData>(), 18);
        assert_eq!(size_of::<ReadCapacityData>(), 8);
        assert_eq!(size_of::<ReadCapacity16Data>(), 32);
        assert_eq!(size_of::<ModeParameterHeader10>(), 8);
        assert_eq!(size_of::<ModeCachingPage>(), 20);
        assert_eq!(size_of::<ModeControlPage>(), 12);
        assert_eq!(size_of::<VpdPageHeader>(), 4);
    }

    #[test]
    fn status_codes_admit_unknown_values() {
        // Vendor-specific values outside the named constants are
        // representable and comparable; the wire size stays one byte.
        let vendor = SenseKey(0x09);
        assert_ne!(vendor, SenseKey::ABORTED_COMMAND);
        assert_eq!(ScsiOp::INQUIRY.0, 0x12);
        assert_eq!(size_of::<ScsiOp>(), 1);
        assert_eq!(size_of::<ScsiStatus>(), 1);
        assert_eq!(size_of::<AdditionalSenseCode>(), 1);
    }

    #[test]
    fn sense_progress_roundtrip() {
        let sense = SenseData::new(
            SenseKey::NOT_READY,
            AdditionalSenseCode::LUN_NOT_READY,
            SCSI_SENSEQ_SANITIZE_IN_PROGRESS,
        )
        .with_progress(0x8000);
        assert_eq!(sense.sense_key_specific[0] & SENSE_KEY_SPECIFIC_VALID, 0x80);
        assert_eq!(
            u16::from_be_bytes([sense.sense_key_specific[1], sense.sense_key_specific[2]]),
            0x8000
        );
    }
}
