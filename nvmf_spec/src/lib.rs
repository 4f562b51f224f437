// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! NVMe and NVMe over Fabrics wire-format definitions.
//!
//! Everything in this crate is a bit-exact rendering of a structure defined
//! by the NVMe 1.2 or NVMe-oF 1.0 specifications: command and completion
//! capsules, fabrics command capsules, the Connect data payload, SGL
//! descriptors, the Identify Controller data structure, the discovery log
//! page, and the controller property registers. There is no behavior here
//! beyond field access and capsule classification.

use bitfield_struct::bitfield;
use core::mem::offset_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Declares a wire-format enum as a newtype over its raw representation plus
/// named constants, so unrecognized values survive a round trip.
macro_rules! open_enum {
    (
        $(#[$attr:meta])*
        pub enum $name:ident : $ty:ty {
            $( $(#[$vattr:meta])* $variant:ident = $value:expr, )*
        }
    ) => {
        $(#[$attr])*
        #[repr(transparent)]
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, IntoBytes, FromBytes, Immutable, KnownLayout)]
        pub struct $name(pub $ty);

        #[allow(missing_docs)] // self-explanatory variants
        impl $name {
            $( $(#[$vattr])* pub const $variant: $name = $name($value); )*
        }

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                match *self {
                    $( Self::$variant => f.pad(stringify!($variant)), )*
                    _ => write!(f, concat!(stringify!($name), "({:#x})"), self.0),
                }
            }
        }
    };
}

pub mod fabrics;

open_enum! {
    /// Admin command set opcodes.
    pub enum AdminOpcode: u8 {
        DELETE_IO_SQ = 0x00,
        CREATE_IO_SQ = 0x01,
        GET_LOG_PAGE = 0x02,
        DELETE_IO_CQ = 0x04,
        CREATE_IO_CQ = 0x05,
        IDENTIFY = 0x06,
        ABORT = 0x08,
        SET_FEATURES = 0x09,
        GET_FEATURES = 0x0a,
        ASYNCHRONOUS_EVENT_REQUEST = 0x0c,
        KEEP_ALIVE = 0x18,
        /// NVMe-oF fabrics command; the capsule carries an `fctype` selector.
        FABRICS = 0x7f,
    }
}

open_enum! {
    /// NVM command set opcodes.
    pub enum NvmOpcode: u8 {
        FLUSH = 0x00,
        WRITE = 0x01,
        READ = 0x02,
        WRITE_UNCORRECTABLE = 0x04,
        COMPARE = 0x05,
        WRITE_ZEROES = 0x08,
        DATASET_MANAGEMENT = 0x09,
    }
}

open_enum! {
    /// CNS selector for the Identify command (CDW10 bits 7:0).
    pub enum Cns: u8 {
        NAMESPACE = 0x00,
        CONTROLLER = 0x01,
        ACTIVE_NAMESPACES = 0x02,
    }
}

open_enum! {
    /// Feature identifier for Get/Set Features (CDW10 bits 7:0).
    pub enum Feature: u8 {
        ARBITRATION = 0x01,
        POWER_MANAGEMENT = 0x02,
        TEMPERATURE_THRESHOLD = 0x04,
        ERROR_RECOVERY = 0x05,
        VOLATILE_WRITE_CACHE = 0x06,
        NUMBER_OF_QUEUES = 0x07,
        INTERRUPT_COALESCING = 0x08,
        ASYNC_EVENT_CONFIGURATION = 0x0b,
        KEEP_ALIVE_TIMER = 0x0f,
    }
}

open_enum! {
    /// Log page identifier for Get Log Page (CDW10 bits 7:0).
    pub enum LogPageIdentifier: u8 {
        ERROR_INFORMATION = 0x01,
        HEALTH_INFORMATION = 0x02,
        FIRMWARE_SLOT_INFORMATION = 0x03,
        /// NVMe-oF discovery service log page.
        DISCOVERY = 0x70,
    }
}

open_enum! {
    /// PRP or SGL data transfer selector (CDW0 bits 15:14).
    pub enum Psdt: u8 {
        PRP = 0x00,
        SGL_MPTR_CONTIG = 0x01,
        SGL_MPTR_SGL = 0x02,
    }
}

/// Command dword 0: opcode, fused-operation bits, PRP/SGL selector, and
/// command identifier.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct Cdw0 {
    pub opcode: u8,
    #[bits(2)]
    pub fuse: u8,
    #[bits(4)]
    _rsvd: u8,
    #[bits(2)]
    pub psdt: u8,
    pub cid: u16,
}

/// A 64-byte NVMe submission queue entry.
#[expect(missing_docs)] // dword fields are named by the NVMe specification
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Command {
    pub cdw0: Cdw0,
    pub nsid: u32,
    pub cdw2: u32,
    pub cdw3: u32,
    pub mptr: u64,
    pub dptr: SglDescriptor,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
}

const_assert_eq!(size_of::<Command>(), 64);

open_enum! {
    /// SGL descriptor type (byte 15, bits 7:4).
    pub enum SglDescriptorType: u8 {
        DATA_BLOCK = 0x0,
        BIT_BUCKET = 0x1,
        SEGMENT = 0x2,
        LAST_SEGMENT = 0x3,
        KEYED_DATA_BLOCK = 0x4,
    }
}

open_enum! {
    /// SGL descriptor subtype (byte 15, bits 3:0).
    pub enum SglDescriptorSubtype: u8 {
        ADDRESS = 0x0,
        OFFSET = 0x1,
        INVALIDATE_KEY = 0xf,
    }
}

/// The 16-byte data pointer region of a command, interpreted as an SGL
/// descriptor.
///
/// The trailing eight bytes are type-dependent; the accessors decode the
/// keyed and unkeyed data block layouts.
#[expect(missing_docs)]
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SglDescriptor {
    pub address: u64,
    pub control: [u8; 8],
}

const_assert_eq!(size_of::<SglDescriptor>(), 16);

impl SglDescriptor {
    /// Returns the descriptor type from the identifier byte.
    pub fn descriptor_type(&self) -> SglDescriptorType {
        SglDescriptorType(self.control[7] >> 4)
    }

    /// Returns the descriptor subtype from the identifier byte.
    pub fn subtype(&self) -> SglDescriptorSubtype {
        SglDescriptorSubtype(self.control[7] & 0xf)
    }

    /// Length of an unkeyed data block descriptor.
    pub fn unkeyed_length(&self) -> u32 {
        u32::from_le_bytes(self.control[0..4].try_into().unwrap())
    }

    /// 24-bit length of a keyed data block descriptor.
    pub fn keyed_length(&self) -> u32 {
        u32::from_le_bytes([self.control[0], self.control[1], self.control[2], 0])
    }

    /// Remote key of a keyed data block descriptor.
    pub fn key(&self) -> u32 {
        u32::from_le_bytes(self.control[3..7].try_into().unwrap())
    }
}

open_enum! {
    /// Completion status code type (status bits 11:9).
    pub enum StatusCodeType: u8 {
        GENERIC = 0x0,
        COMMAND_SPECIFIC = 0x1,
        MEDIA_ERROR = 0x2,
        VENDOR_SPECIFIC = 0x7,
    }
}

open_enum! {
    /// Combined completion status: `(status code type << 8) | status code`.
    pub enum Status: u16 {
        SUCCESS = 0x00,
        INVALID_COMMAND_OPCODE = 0x01,
        INVALID_FIELD_IN_COMMAND = 0x02,
        COMMAND_ID_CONFLICT = 0x03,
        DATA_TRANSFER_ERROR = 0x04,
        INTERNAL_DEVICE_ERROR = 0x06,
        ABORTED_BY_REQUEST = 0x07,
        ABORTED_SQ_DELETION = 0x08,
        INVALID_NAMESPACE_OR_FORMAT = 0x0b,
        COMMAND_SEQUENCE_ERROR = 0x0c,
        COMPLETION_QUEUE_INVALID = 0x100,
        ASYNC_EVENT_REQUEST_LIMIT_EXCEEDED = 0x105,
        /// Connect capsule format not supported.
        FABRICS_INCOMPATIBLE_FORMAT = 0x180,
        /// Controller cannot accept the queue connection right now.
        FABRICS_CONTROLLER_BUSY = 0x181,
        /// Connect parameters invalid; the response points at the field.
        FABRICS_CONNECT_INVALID_PARAMETERS = 0x182,
        FABRICS_CONNECT_RESTART_DISCOVERY = 0x190,
        FABRICS_CONNECT_INVALID_HOST = 0x191,
    }
}

impl Status {
    /// The status code (low byte).
    pub fn status_code(&self) -> u8 {
        self.0 as u8
    }

    /// The status code type (bits 10:8).
    pub fn status_code_type(&self) -> StatusCodeType {
        StatusCodeType(((self.0 >> 8) & 0x7) as u8)
    }
}

/// Completion dword 3 bits 31:16: phase tag plus the 15-bit status field.
#[bitfield(u16)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct CompletionStatus {
    pub phase: bool,
    #[bits(15)]
    pub status: u16,
}

impl CompletionStatus {
    /// Returns the combined status value.
    pub fn nvme_status(&self) -> Status {
        Status(self.status())
    }
}

/// A 16-byte NVMe completion queue entry.
#[expect(missing_docs)] // dword fields are named by the NVMe specification
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct Completion {
    pub dw0: u32,
    pub dw1: u32,
    pub sqhd: u16,
    pub sqid: u16,
    pub cid: u16,
    pub status: CompletionStatus,
}

const_assert_eq!(size_of::<Completion>(), 16);

/// CDW10 of the Identify command.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Cdw10Identify {
    pub cns: u8,
    _rsvd: u8,
    pub cntid: u16,
}

/// CDW10 of the Get Log Page command.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Cdw10GetLogPage {
    pub lid: u8,
    #[bits(4)]
    pub lsp: u8,
    #[bits(3)]
    _rsvd: u8,
    pub rae: bool,
    pub numdl: u16,
}

/// CDW10 of the Get Features command.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Cdw10GetFeatures {
    pub fid: u8,
    #[bits(3)]
    pub sel: u8,
    #[bits(21)]
    _rsvd: u32,
}

/// CDW10 of the Set Features command.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Cdw10SetFeatures {
    pub fid: u8,
    #[bits(23)]
    _rsvd: u32,
    pub sv: bool,
}

/// CDW11 of the Number of Queues feature, and completion DW0 of both the Get
/// and Set forms. Counts are zero's based.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct Cdw11FeatureNumberOfQueues {
    pub nsq: u16,
    pub ncq: u16,
}

/// The Identify Controller data structure (CNS 01h), 4096 bytes.
///
/// Only the fields the target reads or rewrites are named; the remainder is
/// carried as reserved padding.
#[expect(missing_docs)] // field names match the NVMe specification
#[repr(C)]
#[derive(Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct IdentifyController {
    pub vid: u16,
    pub ssvid: u16,
    pub sn: [u8; 20],
    pub mn: [u8; 40],
    pub fr: [u8; 8],
    pub rab: u8,
    pub ieee: [u8; 3],
    pub cmic: u8,
    pub mdts: u8,
    pub cntlid: u16,
    pub ver: u32,
    pub rtd3r: u32,
    pub rtd3e: u32,
    pub oaes: u32,
    pub ctratt: u32,
    _rsvd100: [u8; 156],
    pub oacs: u16,
    pub acl: u8,
    pub aerl: u8,
    pub frmw: u8,
    pub lpa: u8,
    pub elpe: u8,
    pub npss: u8,
    pub avscc: u8,
    pub apsta: u8,
    pub wctemp: u16,
    pub cctemp: u16,
    pub mtfa: u16,
    pub hmpre: u32,
    pub hmmin: u32,
    pub tnvmcap: [u8; 16],
    pub unvmcap: [u8; 16],
    pub rpmbs: u32,
    pub edstt: u16,
    pub dsto: u8,
    pub fwug: u8,
    pub kas: u16,
    _rsvd322: [u8; 190],
    pub sqes: u8,
    pub cqes: u8,
    pub maxcmd: u16,
    pub nn: u32,
    pub oncs: u16,
    pub fuses: u16,
    pub fna: u8,
    pub vwc: u8,
    pub awun: u16,
    pub awupf: u16,
    pub nvscc: u8,
    _rsvd531: u8,
    pub acwu: u16,
    _rsvd534: u16,
    pub sgls: u32,
    _rsvd540: [u8; 228],
    pub subnqn: [u8; 256],
    _rsvd1024: [u8; 1024],
    pub psd: [u8; 1024],
    pub vs: [u8; 1024],
}

const_assert_eq!(size_of::<IdentifyController>(), 4096);
const_assert_eq!(offset_of!(IdentifyController, oacs), 256);
const_assert_eq!(offset_of!(IdentifyController, kas), 320);
const_assert_eq!(offset_of!(IdentifyController, sqes), 512);
const_assert_eq!(offset_of!(IdentifyController, sgls), 536);
const_assert_eq!(offset_of!(IdentifyController, subnqn), 768);

open_enum! {
    /// Controller property (register) offsets, as addressed by the fabrics
    /// Property Get/Set commands.
    pub enum PropertyOffset: u32 {
        CAP = 0x00,
        VS = 0x08,
        INTMS = 0x0c,
        INTMC = 0x10,
        CC = 0x14,
        CSTS = 0x1c,
        NSSR = 0x20,
        AQA = 0x24,
        ASQ = 0x28,
        ACQ = 0x30,
    }
}

/// The CAP (Controller Capabilities) property.
#[bitfield(u64)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct Cap {
    pub mqes: u16,
    pub cqr: bool,
    #[bits(2)]
    pub ams: u8,
    #[bits(5)]
    _rsvd: u8,
    pub to: u8,
    #[bits(4)]
    pub dstrd: u8,
    pub nssrs: bool,
    pub css: u8,
    pub bps: bool,
    #[bits(2)]
    _rsvd2: u8,
    #[bits(4)]
    pub mpsmin: u8,
    #[bits(4)]
    pub mpsmax: u8,
    _rsvd3: u8,
}

/// The CC (Controller Configuration) property.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct Cc {
    pub en: bool,
    #[bits(3)]
    _rsvd: u8,
    #[bits(3)]
    pub css: u8,
    #[bits(4)]
    pub mps: u8,
    #[bits(3)]
    pub ams: u8,
    #[bits(2)]
    pub shn: u8,
    #[bits(4)]
    pub iosqes: u8,
    #[bits(4)]
    pub iocqes: u8,
    _rsvd2: u8,
}

/// The CSTS (Controller Status) property.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct Csts {
    pub rdy: bool,
    pub cfs: bool,
    #[bits(2)]
    pub shst: u8,
    pub nssro: bool,
    pub pp: bool,
    #[bits(26)]
    _rsvd: u32,
}

/// A received 64-byte command capsule.
///
/// This is the single backing store for the tagged union over NVMe and
/// fabrics command shapes. All reinterpretation happens through the typed
/// accessors on this type; nothing outside it aliases the raw bytes.
#[repr(C)]
#[derive(Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Capsule(Command);

const_assert_eq!(size_of::<Capsule>(), 64);

/// A classified view of a command capsule.
#[derive(Debug, Copy, Clone)]
pub enum CapsuleView<'a> {
    /// A fabrics command (`opc == 0x7f`); dispatch on the capsule `fctype`.
    Fabrics(&'a fabrics::CapsuleCmd),
    /// A regular NVMe admin or I/O command.
    Nvme(&'a Command),
}

impl Capsule {
    /// Classifies the capsule by its opcode byte.
    pub fn view(&self) -> CapsuleView<'_> {
        if self.0.cdw0.opcode() == AdminOpcode::FABRICS.0 {
            CapsuleView::Fabrics(self.fabrics())
        } else {
            CapsuleView::Nvme(self.nvme())
        }
    }

    /// The capsule as a plain NVMe command.
    pub fn nvme(&self) -> &Command {
        &self.0
    }

    /// The capsule as a generic fabrics command header.
    pub fn fabrics(&self) -> &fabrics::CapsuleCmd {
        zerocopy::transmute_ref!(&self.0)
    }

    /// The capsule as a fabrics Connect command.
    pub fn connect(&self) -> &fabrics::ConnectCommand {
        zerocopy::transmute_ref!(&self.0)
    }

    /// The capsule as a fabrics Property Get command.
    pub fn property_get(&self) -> &fabrics::PropertyGetCommand {
        zerocopy::transmute_ref!(&self.0)
    }

    /// The capsule as a fabrics Property Set command.
    pub fn property_set(&self) -> &fabrics::PropertySetCommand {
        zerocopy::transmute_ref!(&self.0)
    }

    /// The command identifier, common to every capsule shape.
    pub fn cid(&self) -> u16 {
        self.0.cdw0.cid()
    }
}

impl From<Command> for Capsule {
    fn from(cmd: Command) -> Self {
        Self(cmd)
    }
}

impl From<fabrics::CapsuleCmd> for Capsule {
    fn from(cmd: fabrics::CapsuleCmd) -> Self {
        Self(zerocopy::transmute!(cmd))
    }
}

impl From<fabrics::ConnectCommand> for Capsule {
    fn from(cmd: fabrics::ConnectCommand) -> Self {
        Self(zerocopy::transmute!(cmd))
    }
}

impl From<fabrics::PropertyGetCommand> for Capsule {
    fn from(cmd: fabrics::PropertyGetCommand) -> Self {
        Self(zerocopy::transmute!(cmd))
    }
}

impl From<fabrics::PropertySetCommand> for Capsule {
    fn from(cmd: fabrics::PropertySetCommand) -> Self {
        Self(zerocopy::transmute!(cmd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    #[test]
    fn cdw0_packing() {
        let cdw0 = Cdw0::new()
            .with_opcode(AdminOpcode::IDENTIFY.0)
            .with_psdt(Psdt::SGL_MPTR_CONTIG.0)
            .with_cid(0xabcd);
        let raw: u32 = cdw0.into();
        assert_eq!(raw & 0xff, 0x06);
        assert_eq!((raw >> 14) & 0x3, 0x01);
        assert_eq!(raw >> 16, 0xabcd);
    }

    #[test]
    fn completion_status_packing() {
        let status = CompletionStatus::new()
            .with_phase(true)
            .with_status(Status::COMMAND_SEQUENCE_ERROR.0);
        let raw: u16 = status.into();
        assert_eq!(raw, (0x0c << 1) | 1);
        assert_eq!(status.nvme_status(), Status::COMMAND_SEQUENCE_ERROR);
    }

    #[test]
    fn status_decomposition() {
        let status = Status::ASYNC_EVENT_REQUEST_LIMIT_EXCEEDED;
        assert_eq!(status.status_code(), 0x05);
        assert_eq!(status.status_code_type(), StatusCodeType::COMMAND_SPECIFIC);

        let status = Status::FABRICS_CONNECT_INVALID_PARAMETERS;
        assert_eq!(status.status_code(), 0x82);
        assert_eq!(status.status_code_type(), StatusCodeType::COMMAND_SPECIFIC);
    }

    #[test]
    fn sgl_keyed_descriptor() {
        let mut sgl = SglDescriptor::new_zeroed();
        sgl.address = 0x1000_2000_3000;
        sgl.control[0..3].copy_from_slice(&0x123456u32.to_le_bytes()[..3]);
        sgl.control[3..7].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
        sgl.control[7] = (SglDescriptorType::KEYED_DATA_BLOCK.0 << 4)
            | SglDescriptorSubtype::INVALIDATE_KEY.0;

        assert_eq!(sgl.descriptor_type(), SglDescriptorType::KEYED_DATA_BLOCK);
        assert_eq!(sgl.subtype(), SglDescriptorSubtype::INVALIDATE_KEY);
        assert_eq!(sgl.keyed_length(), 0x123456);
        assert_eq!(sgl.key(), 0xdeadbeef);
    }

    #[test]
    fn sgl_unkeyed_descriptor() {
        let mut sgl = SglDescriptor::new_zeroed();
        sgl.control[0..4].copy_from_slice(&0x8000u32.to_le_bytes());
        sgl.control[7] = SglDescriptorType::DATA_BLOCK.0 << 4;

        assert_eq!(sgl.descriptor_type(), SglDescriptorType::DATA_BLOCK);
        assert_eq!(sgl.subtype(), SglDescriptorSubtype::ADDRESS);
        assert_eq!(sgl.unkeyed_length(), 0x8000);
    }

    #[test]
    fn capsule_classification() {
        let cmd = Command {
            cdw0: Cdw0::new().with_opcode(AdminOpcode::IDENTIFY.0),
            ..FromZeros::new_zeroed()
        };
        assert!(matches!(Capsule::from(cmd).view(), CapsuleView::Nvme(_)));

        let mut cmd = fabrics::CapsuleCmd::new_zeroed();
        cmd.opcode = AdminOpcode::FABRICS.0;
        cmd.fctype = fabrics::FabricsCommandType::CONNECT;
        match Capsule::from(cmd).view() {
            CapsuleView::Fabrics(hdr) => {
                assert_eq!(hdr.fctype, fabrics::FabricsCommandType::CONNECT)
            }
            CapsuleView::Nvme(_) => panic!("misclassified fabrics capsule"),
        }
    }

    #[test]
    fn number_of_queues_dword() {
        let dw = Cdw11FeatureNumberOfQueues::new().with_nsq(3).with_ncq(3);
        assert_eq!(u32::from(dw), 0x0003_0003);
    }
}
