//! Shader binary trailer (`OrbShdr` info record) and the input usage slots that precede it.

use tracing::trace;

use crate::error::{Result, ShaderError};
use crate::guest_memory::{read_u32s, GuestMemory};

pub const SIGNATURE: &[u8; 7] = b"OrbShdr";
pub const BINARY_INFO_SIZE: u64 = 28;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderBinaryInfo {
    /// Guest address of the record itself.
    pub addr: u64,
    pub version: u8,
    /// Length of the program in bytes.
    pub length: u32,
    pub chunk_usage_base_offset_in_dw: u8,
    pub num_input_usage_slots: u8,
    pub flags: u8,
    pub shader_hash0: u32,
    pub shader_hash1: u32,
    pub crc32: u32,
}

impl ShaderBinaryInfo {
    pub fn parse(addr: u64, bytes: &[u8; BINARY_INFO_SIZE as usize]) -> Option<Self> {
        if &bytes[..7] != SIGNATURE {
            return None;
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Some(Self {
            addr,
            version: bytes[7],
            length: word(8) >> 8,
            chunk_usage_base_offset_in_dw: bytes[12],
            num_input_usage_slots: bytes[13],
            flags: bytes[14],
            shader_hash0: word(16),
            shader_hash1: word(20),
            crc32: word(24),
        })
    }

    /// Scans forward from `program_addr` (dword aligned) for the info record.
    pub fn find(mem: &dyn GuestMemory, program_addr: u64, search_limit_dwords: usize) -> Result<Self> {
        let mut bytes = [0u8; BINARY_INFO_SIZE as usize];
        for i in 0..search_limit_dwords as u64 {
            let addr = program_addr + i * 4;
            let mut head = [0u8; 4];
            if mem.read(addr, &mut head).is_err() {
                break;
            }
            if head != SIGNATURE[..4] {
                continue;
            }
            mem.read(addr, &mut bytes)?;
            if let Some(info) = Self::parse(addr, &bytes) {
                trace!(program_addr, info_addr = addr, length = info.length, "found shader binary info");
                return Ok(info);
            }
        }
        Err(ShaderError::malformed(
            program_addr as u32,
            format!("no binary info within {search_limit_dwords} dwords of 0x{program_addr:x}"),
        ))
    }

    /// Disabled-shader key.
    pub fn hash_key(&self) -> u64 {
        (u64::from(self.shader_hash0) << 32) | u64::from(self.crc32)
    }

    fn slots_addr(&self) -> Result<u64> {
        let back = u64::from(self.chunk_usage_base_offset_in_dw) * 4 + u64::from(self.num_input_usage_slots) * 4;
        self.addr.checked_sub(back).ok_or_else(|| {
            ShaderError::malformed(
                self.addr as u32,
                format!(
                    "usage slots start {back} bytes before binary info at 0x{:x}",
                    self.addr
                ),
            )
        })
    }

    pub fn usage_slots(&self, mem: &dyn GuestMemory) -> Result<Vec<ShaderUsageSlot>> {
        let words = read_u32s(mem, self.slots_addr()?, usize::from(self.num_input_usage_slots))?;
        Ok(words.into_iter().map(ShaderUsageSlot::from_raw).collect())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UsageType {
    ImmResource,
    ImmSampler,
    ImmConstBuffer,
    ImmRwResource,
    ImmGdsCounterRange,
    ImmGdsMemoryRange,
    SubPtrFetchShader,
    PtrVertexBufferTable,
    PtrExtendedUserData,
    Other(u8),
}

impl UsageType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Self::ImmResource,
            0x01 => Self::ImmSampler,
            0x02 => Self::ImmConstBuffer,
            0x04 => Self::ImmRwResource,
            0x07 => Self::ImmGdsCounterRange,
            0x08 => Self::ImmGdsMemoryRange,
            0x12 => Self::SubPtrFetchShader,
            0x17 => Self::PtrVertexBufferTable,
            0x1b => Self::PtrExtendedUserData,
            other => Self::Other(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            Self::ImmResource => 0x00,
            Self::ImmSampler => 0x01,
            Self::ImmConstBuffer => 0x02,
            Self::ImmRwResource => 0x04,
            Self::ImmGdsCounterRange => 0x07,
            Self::ImmGdsMemoryRange => 0x08,
            Self::SubPtrFetchShader => 0x12,
            Self::PtrVertexBufferTable => 0x17,
            Self::PtrExtendedUserData => 0x1b,
            Self::Other(raw) => raw,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderUsageSlot {
    pub usage_type: UsageType,
    pub slot: u8,
    pub start_register: u8,
    /// Bit 0 of the flags byte: 0 = 4 dwords, 1 = 8 dwords.
    pub register_count: u8,
}

impl ShaderUsageSlot {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            usage_type: UsageType::from_raw((raw & 0xff) as u8),
            slot: ((raw >> 8) & 0xff) as u8,
            start_register: ((raw >> 16) & 0xff) as u8,
            register_count: ((raw >> 24) & 0x1) as u8,
        }
    }

    pub fn to_raw(&self) -> u32 {
        u32::from(self.usage_type.to_raw())
            | (u32::from(self.slot) << 8)
            | (u32::from(self.start_register) << 16)
            | (u32::from(self.register_count & 0x1) << 24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest_memory::VecGuestMemory;

    fn info_bytes(length: u32, slots: u8, hash0: u32, crc: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(SIGNATURE);
        out.push(1);
        out.extend_from_slice(&(length << 8).to_le_bytes());
        out.extend_from_slice(&[0, slots, 0, 0]);
        out.extend_from_slice(&hash0.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    #[test]
    fn finds_info_and_reads_slots_before_it() {
        let mem = VecGuestMemory::new(0x1000, 0x100);
        let slot = ShaderUsageSlot {
            usage_type: UsageType::ImmResource,
            slot: 0,
            start_register: 4,
            register_count: 1,
        };
        mem.write_u32s(0x1000, &[0xbf81_0000, slot.to_raw()]).unwrap();
        mem.write(0x1008, &info_bytes(4, 1, 0xaabb_ccdd, 0x1234)).unwrap();

        let info = ShaderBinaryInfo::find(&mem, 0x1000, 64).unwrap();
        assert_eq!(info.addr, 0x1008);
        assert_eq!(info.length, 4);
        assert_eq!(info.hash_key(), 0xaabb_ccdd_0000_1234);
        assert_eq!(info.usage_slots(&mem).unwrap(), vec![slot]);
    }

    #[test]
    fn missing_info_is_malformed() {
        let mem = VecGuestMemory::new(0, 0x40);
        let err = ShaderBinaryInfo::find(&mem, 0, 8).unwrap_err();
        assert!(matches!(err, ShaderError::Malformed { .. }));
    }

    #[test]
    fn slots_before_address_zero_are_malformed() {
        let mem = VecGuestMemory::new(0, 0x40);
        let info = ShaderBinaryInfo {
            addr: 4,
            chunk_usage_base_offset_in_dw: 1,
            num_input_usage_slots: 2,
            ..Default::default()
        };
        let err = info.usage_slots(&mem).unwrap_err();
        assert!(matches!(err, ShaderError::Malformed { pc: 4, .. }));
    }

    #[test]
    fn unknown_usage_type_is_preserved() {
        let slot = ShaderUsageSlot::from_raw(0x0000_0510);
        assert_eq!(slot.usage_type, UsageType::Other(0x10));
        assert_eq!(slot.slot, 5);
    }
}
