// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! NVMe over Fabrics command capsules, the Connect data payload, and the
//! discovery service log page.

use bitfield_struct::bitfield;
use core::mem::offset_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Well-known NQN of the discovery service subsystem.
pub const DISCOVERY_NQN: &str = "nqn.2014-08.org.nvmexpress.discovery";

/// Queue identifier of the admin queue.
pub const ADMIN_QUEUE_ID: u16 = 0;

open_enum! {
    /// Fabrics command type (`fctype`, capsule byte 4).
    pub enum FabricsCommandType: u8 {
        PROPERTY_SET = 0x00,
        CONNECT = 0x01,
        PROPERTY_GET = 0x04,
        AUTHENTICATION_SEND = 0x05,
        AUTHENTICATION_RECV = 0x06,
    }
}

/// The generic fabrics command capsule header.
#[expect(missing_docs)] // field names match the fabrics specification
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct CapsuleCmd {
    pub opcode: u8,
    _rsvd1: u8,
    pub cid: u16,
    pub fctype: FabricsCommandType,
    _rsvd2: [u8; 35],
    pub fabric_specific: [u8; 24],
}

const_assert_eq!(size_of::<CapsuleCmd>(), 64);

/// The fabrics Connect command capsule.
#[expect(missing_docs)] // field names match the fabrics specification
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ConnectCommand {
    pub opcode: u8,
    _rsvd1: u8,
    pub cid: u16,
    pub fctype: FabricsCommandType,
    _rsvd2: [u8; 19],
    pub sgl1: crate::SglDescriptor,
    /// Record format; only format 0 is defined.
    pub recfmt: u16,
    /// Queue identifier; zero connects the admin queue.
    pub qid: u16,
    /// Requested submission queue size, zero's based.
    pub sqsize: u16,
    pub cattr: u8,
    _rsvd3: u8,
    /// Keep-alive timeout in milliseconds.
    pub kato: u32,
    _rsvd4: [u8; 12],
}

const_assert_eq!(size_of::<ConnectCommand>(), 64);

/// The 1024-byte Connect data payload carried in the Connect capsule's data
/// buffer.
#[repr(C)]
#[derive(Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ConnectData {
    /// Host identifier.
    pub hostid: [u8; 16],
    /// Controller ID to connect to; 0xffff requests dynamic allocation.
    pub cntlid: u16,
    _rsvd: [u8; 238],
    /// NQN of the subsystem to connect to, NUL padded.
    pub subnqn: [u8; 256],
    /// NQN of the connecting host, NUL padded.
    pub hostnqn: [u8; 256],
    _rsvd2: [u8; 256],
}

const_assert_eq!(size_of::<ConnectData>(), 1024);
const_assert_eq!(offset_of!(ConnectData, cntlid), 16);
const_assert_eq!(offset_of!(ConnectData, subnqn), 256);
const_assert_eq!(offset_of!(ConnectData, hostnqn), 512);

/// Controller ID value requesting dynamic allocation.
pub const CNTLID_DYNAMIC: u16 = 0xffff;

impl ConnectData {
    /// The subsystem NQN with NUL padding trimmed.
    pub fn subnqn_bytes(&self) -> &[u8] {
        trim_nul(&self.subnqn)
    }

    /// The host NQN with NUL padding trimmed.
    pub fn hostnqn_bytes(&self) -> &[u8] {
        trim_nul(&self.hostnqn)
    }
}

fn trim_nul(field: &[u8]) -> &[u8] {
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..len]
}

/// Completion DW0 of a successful Connect response.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct ConnectResponseSuccess {
    /// Controller ID allocated or matched by the target.
    pub cntlid: u16,
    /// Authentication requirements.
    pub authreq: u16,
}

/// Completion DW0 of a Connect response with status
/// [`Status::FABRICS_CONNECT_INVALID_PARAMETERS`](crate::Status).
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct ConnectResponseInvalid {
    /// Byte offset of the offending field.
    pub ipo: u16,
    /// Invalid parameter attributes; bit 0 set when `ipo` addresses the data
    /// payload rather than the capsule.
    pub iattr: u8,
    _rsvd: u8,
}

open_enum! {
    /// Property access size encoded in the attrib byte.
    pub enum PropertySize: u8 {
        FOUR_BYTES = 0x0,
        EIGHT_BYTES = 0x1,
    }
}

/// The attrib byte of the Property Get/Set commands.
#[bitfield(u8)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct PropertyAttribute {
    #[bits(3)]
    pub size: u8,
    #[bits(5)]
    _rsvd: u8,
}

/// The fabrics Property Get command capsule.
#[expect(missing_docs)] // field names match the fabrics specification
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct PropertyGetCommand {
    pub opcode: u8,
    _rsvd1: u8,
    pub cid: u16,
    pub fctype: FabricsCommandType,
    _rsvd2: [u8; 35],
    pub attrib: PropertyAttribute,
    _rsvd3: [u8; 3],
    /// Property (register) offset.
    pub ofst: u32,
    _rsvd4: [u8; 16],
}

const_assert_eq!(size_of::<PropertyGetCommand>(), 64);

/// The fabrics Property Set command capsule.
#[expect(missing_docs)] // field names match the fabrics specification
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct PropertySetCommand {
    pub opcode: u8,
    _rsvd1: u8,
    pub cid: u16,
    pub fctype: FabricsCommandType,
    _rsvd2: [u8; 35],
    pub attrib: PropertyAttribute,
    _rsvd3: [u8; 3],
    /// Property (register) offset.
    pub ofst: u32,
    /// Value to write; the low dword only for 4-byte properties.
    pub value: u64,
    _rsvd4: [u8; 8],
}

const_assert_eq!(size_of::<PropertySetCommand>(), 64);
const_assert_eq!(offset_of!(PropertySetCommand, value), 48);

/// Header of the discovery service log page.
#[repr(C)]
#[derive(Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct DiscoveryLogPageHeader {
    /// Generation counter, incremented on every change to the log.
    pub genctr: u64,
    /// Number of entry records.
    pub numrec: u64,
    /// Record format; only format 0 is defined.
    pub recfmt: u16,
    _rsvd: [u8; 1006],
}

const_assert_eq!(size_of::<DiscoveryLogPageHeader>(), 1024);

/// One 1024-byte discovery log page entry.
#[expect(missing_docs)] // field names match the fabrics specification
#[repr(C)]
#[derive(Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct DiscoveryLogPageEntry {
    pub trtype: u8,
    pub adrfam: u8,
    pub subtype: u8,
    pub treq: u8,
    pub portid: u16,
    pub cntlid: u16,
    pub asqsz: u16,
    _rsvd: [u8; 22],
    pub trsvcid: [u8; 32],
    _rsvd2: [u8; 192],
    pub subnqn: [u8; 256],
    pub traddr: [u8; 256],
    pub tsas: [u8; 256],
}

const_assert_eq!(size_of::<DiscoveryLogPageEntry>(), 1024);
