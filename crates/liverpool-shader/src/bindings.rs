//! Resource binding layout (`ShaderResources`) and its extraction from usage slots.

use std::fmt::Write as _;

use tracing::trace;

use crate::binary::{ShaderUsageSlot, UsageType};
use crate::descriptors::{
    BufferResource, ExtendedResource, GdsResource, SamplerResource, TextureResource, TEXTURE_TYPE_2D,
};
use crate::error::{Result, ShaderError};
use crate::guest_memory::{read_u32s, GuestMemory};
use crate::ir::ShaderType;
use crate::regs::{ShaderUserData, USER_SGPR_COUNT};

pub const BUFFERS_MAX: usize = 16;
pub const TEXTURES_MAX: usize = 16;
pub const SAMPLERS_MAX: usize = 16;
pub const GDS_POINTERS_MAX: usize = 1;

/// Push-constant block: the 16 user SGPRs.
pub const PUSH_CONSTANT_SIZE: u32 = (USER_SGPR_COUNT * 4) as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStorageUsage {
    Constant,
    ReadOnly,
    ReadWrite,
}

impl ShaderStorageUsage {
    pub fn tag(self) -> u32 {
        match self {
            Self::Constant => 1,
            Self::ReadOnly => 2,
            Self::ReadWrite => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StorageBufferBinding {
    pub buffer: BufferResource,
    pub usage: ShaderStorageUsage,
    pub slot: u8,
    pub start_register: u8,
    pub extended: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    pub texture: TextureResource,
    pub start_register: u8,
    pub extended: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerBinding {
    pub sampler: SamplerResource,
    pub start_register: u8,
    pub extended: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GdsBinding {
    pub pointer: GdsResource,
    pub slot: u8,
    pub start_register: u8,
    pub extended: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExtendedBinding {
    pub slot: u8,
    pub start_register: u8,
    pub data: ExtendedResource,
}

/// Binding layout of one shader. Descriptor-set binding indices are assigned in order: storage
/// buffers, then textures, then samplers, then GDS pointers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderResources {
    pub push_constant_offset: u32,
    pub push_constant_size: u32,
    pub descriptor_set_slot: u32,
    pub storage_buffers: Vec<StorageBufferBinding>,
    pub textures2d: Vec<TextureBinding>,
    pub samplers: Vec<SamplerBinding>,
    pub gds_pointers: Vec<GdsBinding>,
    pub extended: Option<ExtendedBinding>,
}

impl ShaderResources {
    pub fn storage_binding_index(&self) -> u32 {
        0
    }

    pub fn textures_binding_index(&self) -> u32 {
        self.storage_binding_index() + self.storage_buffers.len() as u32
    }

    pub fn samplers_binding_index(&self) -> u32 {
        self.textures_binding_index() + self.textures2d.len() as u32
    }

    pub fn gds_binding_index(&self) -> u32 {
        self.samplers_binding_index() + self.samplers.len() as u32
    }

    pub fn binding_count(&self) -> u32 {
        self.gds_binding_index() + self.gds_pointers.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.binding_count() == 0 && self.extended.is_none()
    }

    /// Register of the extended user-data pointer, if the shader uses one.
    pub fn extended_register(&self) -> Option<u8> {
        self.extended.map(|e| e.start_register)
    }

    pub fn dbg_dump(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "  push constants: offset {} size {}, set {}",
            self.push_constant_offset, self.push_constant_size, self.descriptor_set_slot
        );
        for (i, b) in self.storage_buffers.iter().enumerate() {
            let _ = writeln!(
                out,
                "  buffer[{i}]: {:?} slot {} reg {}{} base 0x{:x} stride {} records {} dfmt {} nfmt {}",
                b.usage,
                b.slot,
                b.start_register,
                if b.extended { " (ext)" } else { "" },
                b.buffer.base(),
                b.buffer.stride(),
                b.buffer.num_records(),
                b.buffer.dfmt(),
                b.buffer.nfmt()
            );
        }
        for (i, t) in self.textures2d.iter().enumerate() {
            let _ = writeln!(
                out,
                "  texture[{i}]: reg {}{} base 0x{:x} {}x{} dfmt {} nfmt {} tiling {}",
                t.start_register,
                if t.extended { " (ext)" } else { "" },
                t.texture.base(),
                u32::from(t.texture.width()) + 1,
                u32::from(t.texture.height()) + 1,
                t.texture.dfmt(),
                t.texture.nfmt(),
                t.texture.tiling_idx()
            );
        }
        for (i, s) in self.samplers.iter().enumerate() {
            let _ = writeln!(
                out,
                "  sampler[{i}]: reg {}{} fields {:08x?}",
                s.start_register,
                if s.extended { " (ext)" } else { "" },
                s.sampler.fields
            );
        }
        for (i, g) in self.gds_pointers.iter().enumerate() {
            let _ = writeln!(
                out,
                "  gds[{i}]: slot {} reg {} base {} size {}",
                g.slot,
                g.start_register,
                g.pointer.base(),
                g.pointer.size()
            );
        }
        if let Some(ext) = &self.extended {
            let _ = writeln!(
                out,
                "  extended: slot {} reg {} base 0x{:x}",
                ext.slot,
                ext.start_register,
                ext.data.base()
            );
        }
    }
}

/// Usage-slot extraction result: the binding layout plus the VS-only pointers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedBindings {
    pub bind: ShaderResources,
    /// User SGPR holding the fetch subroutine address.
    pub fetch_register: Option<u8>,
    /// User SGPR holding the vertex buffer table address.
    pub vertex_buffer_table_register: Option<u8>,
}

fn user_pointer(user_data: &ShaderUserData, reg: u8) -> Result<u64> {
    let r = usize::from(reg);
    if r + 1 >= USER_SGPR_COUNT {
        return Err(ShaderError::not_implemented(
            "user pointer",
            format!("64-bit pointer at s{reg} exceeds the user SGPRs"),
        ));
    }
    Ok(u64::from(user_data.sgpr[r]) | (u64::from(user_data.sgpr[r + 1]) << 32))
}

struct DescriptorSource<'a> {
    mem: &'a dyn GuestMemory,
    user_data: &'a ShaderUserData,
    extended: Option<ExtendedResource>,
}

impl DescriptorSource<'_> {
    /// Returns the words and whether they came from the extended table.
    fn words(&self, start_register: u8, count: usize) -> Result<(Vec<u32>, bool)> {
        let start = usize::from(start_register);
        if start + count <= USER_SGPR_COUNT {
            return Ok((self.user_data.sgpr[start..start + count].to_vec(), false));
        }
        if start < USER_SGPR_COUNT {
            return Err(ShaderError::not_implemented(
                "descriptor placement",
                format!("{count} dwords at s{start} straddle the user SGPRs and the extended table"),
            ));
        }
        let ext = self.extended.ok_or_else(|| {
            ShaderError::not_implemented(
                "descriptor placement",
                format!("register {start} needs extended user data but the shader has none"),
            )
        })?;
        let addr = ext.base() + ((start - USER_SGPR_COUNT) as u64) * 4;
        Ok((read_u32s(self.mem, addr, count)?, true))
    }
}

/// Walks the usage slots and resolves every descriptor against the current user data.
pub fn extract_bindings(
    mem: &dyn GuestMemory,
    slots: &[ShaderUsageSlot],
    user_data: &ShaderUserData,
    stage: ShaderType,
) -> Result<ExtractedBindings> {
    let mut out = ExtractedBindings::default();

    for slot in slots.iter().filter(|s| s.usage_type == UsageType::PtrExtendedUserData) {
        if out.bind.extended.is_some() {
            return Err(ShaderError::not_implemented(
                "extended user data",
                "more than one extended user-data pointer",
            ));
        }
        let base = user_pointer(user_data, slot.start_register)?;
        let mut data = ExtendedResource::default();
        data.update_address(base);
        out.bind.extended = Some(ExtendedBinding {
            slot: slot.slot,
            start_register: slot.start_register,
            data,
        });
    }

    let source = DescriptorSource {
        mem,
        user_data,
        extended: out.bind.extended.map(|e| e.data),
    };

    for slot in slots {
        trace!(?slot, "usage slot");
        match slot.usage_type {
            UsageType::ImmResource | UsageType::ImmConstBuffer | UsageType::ImmRwResource
                if slot.register_count == 0 =>
            {
                let usage = match slot.usage_type {
                    UsageType::ImmConstBuffer => ShaderStorageUsage::Constant,
                    UsageType::ImmRwResource => ShaderStorageUsage::ReadWrite,
                    _ => ShaderStorageUsage::ReadOnly,
                };
                if out.bind.storage_buffers.len() >= BUFFERS_MAX {
                    return Err(ShaderError::not_implemented("storage buffers", "more than 16"));
                }
                let (words, extended) = source.words(slot.start_register, BufferResource::DWORDS)?;
                out.bind.storage_buffers.push(StorageBufferBinding {
                    buffer: BufferResource::from_words(&words),
                    usage,
                    slot: slot.slot,
                    start_register: slot.start_register,
                    extended,
                });
            }
            UsageType::ImmResource => {
                if out.bind.textures2d.len() >= TEXTURES_MAX {
                    return Err(ShaderError::not_implemented("textures", "more than 16"));
                }
                let (words, extended) = source.words(slot.start_register, TextureResource::DWORDS)?;
                let texture = TextureResource::from_words(&words);
                if texture.type_() != TEXTURE_TYPE_2D {
                    return Err(ShaderError::not_implemented(
                        "texture type",
                        format!("slot {} has image type {}", slot.slot, texture.type_()),
                    ));
                }
                out.bind.textures2d.push(TextureBinding {
                    texture,
                    start_register: slot.start_register,
                    extended,
                });
            }
            UsageType::ImmSampler => {
                if out.bind.samplers.len() >= SAMPLERS_MAX {
                    return Err(ShaderError::not_implemented("samplers", "more than 16"));
                }
                let (words, extended) = source.words(slot.start_register, SamplerResource::DWORDS)?;
                out.bind.samplers.push(SamplerBinding {
                    sampler: SamplerResource::from_words(&words),
                    start_register: slot.start_register,
                    extended,
                });
            }
            UsageType::ImmGdsCounterRange | UsageType::ImmGdsMemoryRange => {
                if out.bind.gds_pointers.len() >= GDS_POINTERS_MAX {
                    return Err(ShaderError::not_implemented("GDS pointers", "more than 1"));
                }
                let (words, extended) = source.words(slot.start_register, 1)?;
                out.bind.gds_pointers.push(GdsBinding {
                    pointer: GdsResource { field: words[0] },
                    slot: slot.slot,
                    start_register: slot.start_register,
                    extended,
                });
            }
            UsageType::SubPtrFetchShader if stage == ShaderType::Vertex => {
                out.fetch_register = Some(slot.start_register);
            }
            UsageType::PtrVertexBufferTable if stage == ShaderType::Vertex => {
                out.vertex_buffer_table_register = Some(slot.start_register);
            }
            UsageType::PtrExtendedUserData => {}
            UsageType::ImmRwResource => {
                return Err(ShaderError::not_implemented(
                    "usage slot",
                    format!("read-write texture at slot {}", slot.slot),
                ))
            }
            other => {
                return Err(ShaderError::not_implemented(
                    "usage slot",
                    format!("{other:?} in a {stage:?} shader (slot {})", slot.slot),
                ))
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest_memory::VecGuestMemory;

    fn slot(usage_type: UsageType, start_register: u8, register_count: u8) -> ShaderUsageSlot {
        ShaderUsageSlot {
            usage_type,
            slot: 0,
            start_register,
            register_count,
        }
    }

    #[test]
    fn binding_indices_follow_group_order() {
        let mut user = [0u32; 16];
        user[4 + 3] = u32::from(TEXTURE_TYPE_2D) << 28;
        let user_data = ShaderUserData::new(&user);
        let mem = VecGuestMemory::new(0, 16);
        let slots = [
            slot(UsageType::ImmConstBuffer, 0, 0),
            slot(UsageType::ImmResource, 4, 1),
            slot(UsageType::ImmSampler, 12, 0),
        ];
        let out = extract_bindings(&mem, &slots, &user_data, ShaderType::Pixel).unwrap();
        assert_eq!(out.bind.storage_buffers.len(), 1);
        assert_eq!(out.bind.storage_buffers[0].usage, ShaderStorageUsage::Constant);
        assert_eq!(out.bind.textures_binding_index(), 1);
        assert_eq!(out.bind.samplers_binding_index(), 2);
        assert_eq!(out.bind.gds_binding_index(), 3);
        assert_eq!(out.bind.binding_count(), 3);
    }

    #[test]
    fn extended_registers_read_through_table() {
        let mem = VecGuestMemory::new(0x1000, 0x100);
        mem.write_u32s(0x1000 + 8, &[0x2000, 0x0010_0000, 7, 0]).unwrap();
        let mut user = [0u32; 16];
        user[2] = 0x1000;
        let user_data = ShaderUserData::new(&user);
        let slots = [
            slot(UsageType::PtrExtendedUserData, 2, 0),
            slot(UsageType::ImmResource, 18, 0),
        ];
        let out = extract_bindings(&mem, &slots, &user_data, ShaderType::Compute).unwrap();
        let buffer = out.bind.storage_buffers[0];
        assert!(buffer.extended);
        assert_eq!(buffer.start_register, 18);
        assert_eq!(buffer.buffer.base(), 0x2000);
        assert_eq!(buffer.buffer.stride(), 0x10);
        assert_eq!(buffer.buffer.num_records(), 7);
        assert_eq!(out.bind.extended_register(), Some(2));
    }

    #[test]
    fn extended_register_without_table_is_not_implemented() {
        let mem = VecGuestMemory::new(0, 16);
        let slots = [slot(UsageType::ImmResource, 20, 0)];
        let err = extract_bindings(&mem, &slots, &ShaderUserData::default(), ShaderType::Pixel).unwrap_err();
        assert!(matches!(err, ShaderError::NotImplemented { .. }));
    }

    #[test]
    fn fetch_slot_outside_vertex_stage_is_rejected() {
        let mem = VecGuestMemory::new(0, 16);
        let slots = [slot(UsageType::SubPtrFetchShader, 0, 0)];
        assert!(extract_bindings(&mem, &slots, &ShaderUserData::default(), ShaderType::Pixel).is_err());
        let vs = extract_bindings(&mem, &slots, &ShaderUserData::default(), ShaderType::Vertex).unwrap();
        assert_eq!(vs.fetch_register, Some(0));
    }
}
