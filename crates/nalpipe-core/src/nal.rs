//! # NAL Header Classification
//!
//! Reads the one-byte H.264 NAL unit header at the front of a demuxed unit:
//! `forbidden_zero_bit(1) | nal_ref_idc(2) | nal_unit_type(5)`.
//!
//! The demuxer never depends on this for framing; it is used for logging,
//! counters, and format-change detection in the loopback decoder.

use std::fmt;

/// H.264 `nal_unit_type`, with the values this pipeline cares about named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalKind {
    /// Coded slice of a non-IDR picture (1).
    Slice,
    /// Slice data partitions A, B, C (2..=4).
    Partition(u8),
    /// Coded slice of an IDR picture (5).
    IdrSlice,
    /// Supplemental enhancement information (6).
    Sei,
    /// Sequence parameter set (7).
    Sps,
    /// Picture parameter set (8).
    Pps,
    /// Access unit delimiter (9).
    AccessUnitDelimiter,
    /// End of sequence (10).
    EndOfSequence,
    /// End of stream (11).
    EndOfStream,
    /// Filler data (12).
    Filler,
    /// SPS extension (13).
    SpsExtension,
    Other(u8),
}

impl NalKind {
    pub fn from_type(nal_unit_type: u8) -> Self {
        match nal_unit_type & 0x1F {
            1 => NalKind::Slice,
            t @ 2..=4 => NalKind::Partition(t),
            5 => NalKind::IdrSlice,
            6 => NalKind::Sei,
            7 => NalKind::Sps,
            8 => NalKind::Pps,
            9 => NalKind::AccessUnitDelimiter,
            10 => NalKind::EndOfSequence,
            11 => NalKind::EndOfStream,
            12 => NalKind::Filler,
            13 => NalKind::SpsExtension,
            t => NalKind::Other(t),
        }
    }

    pub fn nal_unit_type(self) -> u8 {
        match self {
            NalKind::Slice => 1,
            NalKind::Partition(t) => t,
            NalKind::IdrSlice => 5,
            NalKind::Sei => 6,
            NalKind::Sps => 7,
            NalKind::Pps => 8,
            NalKind::AccessUnitDelimiter => 9,
            NalKind::EndOfSequence => 10,
            NalKind::EndOfStream => 11,
            NalKind::Filler => 12,
            NalKind::SpsExtension => 13,
            NalKind::Other(t) => t,
        }
    }
}

impl fmt::Display for NalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NalKind::Slice => f.write_str("slice"),
            NalKind::Partition(t) => write!(f, "partition-{}", (b'A' + t - 2) as char),
            NalKind::IdrSlice => f.write_str("idr"),
            NalKind::Sei => f.write_str("sei"),
            NalKind::Sps => f.write_str("sps"),
            NalKind::Pps => f.write_str("pps"),
            NalKind::AccessUnitDelimiter => f.write_str("aud"),
            NalKind::EndOfSequence => f.write_str("end-of-seq"),
            NalKind::EndOfStream => f.write_str("end-of-stream"),
            NalKind::Filler => f.write_str("filler"),
            NalKind::SpsExtension => f.write_str("sps-ext"),
            NalKind::Other(t) => write!(f, "type-{t}"),
        }
    }
}

/// Coarse importance class of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalClass {
    /// SPS, PPS, SPS extension. The decoder cannot start without them.
    ParameterSet,
    /// IDR slice; decoding can (re)start here.
    Keyframe,
    /// Referenced by later pictures.
    Reference,
    /// Droppable without affecting other pictures.
    NonReference,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub forbidden_zero_bit: bool,
    pub nal_ref_idc: u8,
    pub kind: NalKind,
}

impl NalHeader {
    /// Parse the header byte at the front of `unit`. `None` if empty.
    pub fn parse(unit: &[u8]) -> Option<Self> {
        let &header = unit.first()?;
        Some(NalHeader {
            forbidden_zero_bit: header & 0x80 != 0,
            nal_ref_idc: (header >> 5) & 0x03,
            kind: NalKind::from_type(header & 0x1F),
        })
    }

    pub fn class(&self) -> NalClass {
        match self.kind {
            NalKind::Sps | NalKind::Pps | NalKind::SpsExtension => NalClass::ParameterSet,
            NalKind::IdrSlice => NalClass::Keyframe,
            NalKind::Slice if self.nal_ref_idc == 0 => NalClass::NonReference,
            NalKind::Slice | NalKind::Partition(_) => NalClass::Reference,
            NalKind::Sei | NalKind::AccessUnitDelimiter | NalKind::Filler => {
                NalClass::NonReference
            }
            _ => NalClass::Unknown,
        }
    }

    pub fn is_parameter_set(&self) -> bool {
        self.class() == NalClass::ParameterSet
    }

    pub fn is_idr(&self) -> bool {
        self.kind == NalKind::IdrSlice
    }
}
