//! Hardware resource descriptors (V#, T#, S#, GDS and extended user data).
//!
//! Each descriptor is a fixed array of 32-bit words copied verbatim from user SGPRs or guest
//! memory. Accessors extract one bit range; the only mutators rewrite the embedded base address
//! (or sampler index) and leave every other bit untouched.

/// Buffer descriptor (V#), 4 dwords.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferResource {
    pub fields: [u32; 4],
}

impl BufferResource {
    pub const DWORDS: usize = 4;

    pub fn from_words(words: &[u32]) -> Self {
        let mut fields = [0u32; 4];
        fields.copy_from_slice(&words[..4]);
        Self { fields }
    }

    /// Stores a 44-bit byte address; bits above 43 are dropped.
    pub fn update_address(&mut self, gpu_addr: u64) {
        let lo = (gpu_addr & 0xffff_ffff) as u32;
        let hi = (gpu_addr >> 32) as u32;
        self.fields[0] = lo;
        self.fields[1] = (self.fields[1] & 0xffff_f000) | (hi & 0xfff);
    }

    pub fn base(&self) -> u64 {
        (u64::from(self.fields[0]) | (u64::from(self.fields[1]) << 32)) & 0xfff_ffff_ffff
    }

    pub fn stride(&self) -> u16 {
        ((self.fields[1] >> 16) & 0x3fff) as u16
    }

    pub fn swizzle_enabled(&self) -> bool {
        (self.fields[1] >> 31) & 0x1 == 1
    }

    pub fn num_records(&self) -> u32 {
        self.fields[2]
    }

    pub fn dst_sel_x(&self) -> u8 {
        (self.fields[3] & 0x7) as u8
    }

    pub fn dst_sel_y(&self) -> u8 {
        ((self.fields[3] >> 3) & 0x7) as u8
    }

    pub fn dst_sel_z(&self) -> u8 {
        ((self.fields[3] >> 6) & 0x7) as u8
    }

    pub fn dst_sel_w(&self) -> u8 {
        ((self.fields[3] >> 9) & 0x7) as u8
    }

    pub fn nfmt(&self) -> u8 {
        ((self.fields[3] >> 12) & 0x7) as u8
    }

    pub fn dfmt(&self) -> u8 {
        ((self.fields[3] >> 15) & 0xf) as u8
    }

    pub fn add_tid(&self) -> bool {
        (self.fields[3] >> 23) & 0x1 == 1
    }

    pub fn memory_type(&self) -> u8 {
        (((self.fields[1] >> 7) & 0x60) | ((self.fields[3] >> 25) & 0x1c) | ((self.fields[1] >> 14) & 0x3))
            as u8
    }

    /// The destination selects packed as they appear in word 3 (12 bits).
    pub fn dst_sel(&self) -> u32 {
        self.fields[3] & 0xfff
    }
}

/// Texture descriptor (T#), 8 dwords. The base address is stored in 256-byte units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureResource {
    pub fields: [u32; 8],
}

impl TextureResource {
    pub const DWORDS: usize = 8;

    pub fn from_words(words: &[u32]) -> Self {
        let mut fields = [0u32; 8];
        fields.copy_from_slice(&words[..8]);
        Self { fields }
    }

    /// Stores a 256-byte aligned byte address; the low 8 bits are not representable.
    pub fn update_address(&mut self, gpu_addr: u64) {
        let units = gpu_addr >> 8;
        let lo = (units & 0xffff_ffff) as u32;
        let hi = (units >> 32) as u32;
        self.fields[0] = lo;
        self.fields[1] = (self.fields[1] & 0xffff_ffc0) | (hi & 0x3f);
    }

    pub fn base(&self) -> u64 {
        ((u64::from(self.fields[0]) | (u64::from(self.fields[1]) << 32)) & 0x3f_ffff_ffff) << 8
    }

    pub fn min_lod(&self) -> u16 {
        ((self.fields[1] >> 8) & 0xfff) as u16
    }

    pub fn dfmt(&self) -> u8 {
        ((self.fields[1] >> 20) & 0x3f) as u8
    }

    pub fn nfmt(&self) -> u8 {
        ((self.fields[1] >> 26) & 0xf) as u8
    }

    /// Width minus one, as encoded.
    pub fn width(&self) -> u16 {
        (self.fields[2] & 0x3fff) as u16
    }

    /// Height minus one, as encoded.
    pub fn height(&self) -> u16 {
        ((self.fields[2] >> 14) & 0x3fff) as u16
    }

    pub fn perf_mod(&self) -> u8 {
        ((self.fields[2] >> 28) & 0x7) as u8
    }

    pub fn interlaced(&self) -> bool {
        (self.fields[2] >> 31) & 0x1 == 1
    }

    pub fn dst_sel_x(&self) -> u8 {
        (self.fields[3] & 0x7) as u8
    }

    pub fn dst_sel_y(&self) -> u8 {
        ((self.fields[3] >> 3) & 0x7) as u8
    }

    pub fn dst_sel_z(&self) -> u8 {
        ((self.fields[3] >> 6) & 0x7) as u8
    }

    pub fn dst_sel_w(&self) -> u8 {
        ((self.fields[3] >> 9) & 0x7) as u8
    }

    pub fn base_level(&self) -> u8 {
        ((self.fields[3] >> 12) & 0xf) as u8
    }

    pub fn last_level(&self) -> u8 {
        ((self.fields[3] >> 16) & 0xf) as u8
    }

    pub fn tiling_idx(&self) -> u8 {
        ((self.fields[3] >> 20) & 0x1f) as u8
    }

    pub fn pow2_pad(&self) -> bool {
        (self.fields[3] >> 25) & 0x1 == 1
    }

    pub fn type_(&self) -> u8 {
        ((self.fields[3] >> 28) & 0xf) as u8
    }

    pub fn depth(&self) -> u16 {
        (self.fields[4] & 0x1fff) as u16
    }

    /// Pitch minus one, as encoded.
    pub fn pitch(&self) -> u16 {
        ((self.fields[4] >> 13) & 0x3fff) as u16
    }

    pub fn base_array(&self) -> u16 {
        (self.fields[5] & 0x1fff) as u16
    }

    pub fn last_array(&self) -> u16 {
        ((self.fields[5] >> 13) & 0x1fff) as u16
    }

    pub fn min_lod_warn(&self) -> u16 {
        (self.fields[6] & 0xfff) as u16
    }

    pub fn counter_bank_id(&self) -> u8 {
        ((self.fields[6] >> 12) & 0xff) as u8
    }

    pub fn lod_hdw_cnt_en(&self) -> bool {
        (self.fields[6] >> 20) & 0x1 == 1
    }

    pub fn memory_type(&self) -> u8 {
        let cached = if self.fields[3] & 0x0400_0000 == 0 {
            0x60
        } else {
            0x10
        };
        (((self.fields[1] >> 6) & 0x3) | ((self.fields[1] >> 30) << 2) | cached) as u8
    }
}

/// `SQ_RSRC_IMG_2D`, the only image type the recompiler binds.
pub const TEXTURE_TYPE_2D: u8 = 9;

/// Sampler descriptor (S#), 4 dwords.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SamplerResource {
    pub fields: [u32; 4],
}

impl SamplerResource {
    pub const DWORDS: usize = 4;

    pub fn from_words(words: &[u32]) -> Self {
        let mut fields = [0u32; 4];
        fields.copy_from_slice(&words[..4]);
        Self { fields }
    }

    /// Replaces word 0 with a host-side sampler index.
    pub fn update_index(&mut self, index: u32) {
        self.fields[0] = index;
    }

    pub fn clamp_x(&self) -> u8 {
        (self.fields[0] & 0x7) as u8
    }

    pub fn clamp_y(&self) -> u8 {
        ((self.fields[0] >> 3) & 0x7) as u8
    }

    pub fn clamp_z(&self) -> u8 {
        ((self.fields[0] >> 6) & 0x7) as u8
    }

    pub fn max_aniso_ratio(&self) -> u8 {
        ((self.fields[0] >> 9) & 0x7) as u8
    }

    pub fn depth_compare_func(&self) -> u8 {
        ((self.fields[0] >> 12) & 0x7) as u8
    }

    pub fn force_unorm_coords(&self) -> bool {
        (self.fields[0] >> 15) & 0x1 == 1
    }

    pub fn aniso_threshold(&self) -> u8 {
        ((self.fields[0] >> 16) & 0x7) as u8
    }

    pub fn mc_coord_trunc(&self) -> bool {
        (self.fields[0] >> 19) & 0x1 == 1
    }

    pub fn force_degamma(&self) -> bool {
        (self.fields[0] >> 20) & 0x1 == 1
    }

    pub fn aniso_bias(&self) -> u8 {
        ((self.fields[0] >> 21) & 0x3f) as u8
    }

    pub fn trunc_coord(&self) -> bool {
        (self.fields[0] >> 27) & 0x1 == 1
    }

    pub fn disable_cube_wrap(&self) -> bool {
        (self.fields[0] >> 28) & 0x1 == 1
    }

    pub fn filter_mode(&self) -> u8 {
        ((self.fields[0] >> 29) & 0x3) as u8
    }

    pub fn min_lod(&self) -> u16 {
        (self.fields[1] & 0xfff) as u16
    }

    pub fn max_lod(&self) -> u16 {
        ((self.fields[1] >> 12) & 0xfff) as u16
    }

    pub fn perf_mip(&self) -> u8 {
        ((self.fields[1] >> 24) & 0xf) as u8
    }

    pub fn perf_z(&self) -> u8 {
        ((self.fields[1] >> 28) & 0xf) as u8
    }

    pub fn lod_bias(&self) -> u16 {
        (self.fields[2] & 0x3fff) as u16
    }

    pub fn lod_bias_sec(&self) -> u8 {
        ((self.fields[2] >> 14) & 0x3f) as u8
    }

    pub fn xy_mag_filter(&self) -> u8 {
        ((self.fields[2] >> 20) & 0x3) as u8
    }

    pub fn xy_min_filter(&self) -> u8 {
        ((self.fields[2] >> 22) & 0x3) as u8
    }

    pub fn z_filter(&self) -> u8 {
        ((self.fields[2] >> 24) & 0x3) as u8
    }

    pub fn mip_filter(&self) -> u8 {
        ((self.fields[2] >> 26) & 0x3) as u8
    }

    pub fn border_color_ptr(&self) -> u16 {
        (self.fields[3] & 0xfff) as u16
    }

    pub fn border_color_type(&self) -> u8 {
        ((self.fields[3] >> 30) & 0x3) as u8
    }
}

/// Global data share range, 1 dword: base in the high half, size in the low half.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GdsResource {
    pub field: u32,
}

impl GdsResource {
    pub fn base(&self) -> u16 {
        ((self.field >> 16) & 0xffff) as u16
    }

    pub fn size(&self) -> u16 {
        (self.field & 0xffff) as u16
    }
}

/// Pointer to the extended user-data table, 2 dwords.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExtendedResource {
    pub fields: [u32; 2],
}

impl ExtendedResource {
    pub fn update_address(&mut self, gpu_addr: u64) {
        self.fields[0] = (gpu_addr & 0xffff_ffff) as u32;
        self.fields[1] = (gpu_addr >> 32) as u32;
    }

    pub fn base(&self) -> u64 {
        u64::from(self.fields[0]) | (u64::from(self.fields[1]) << 32)
    }
}
