use liverpool_memory::backend::LiveHandles;
use liverpool_memory::objects::VIDEO_OUT_FORMAT_B8G8R8A8_SRGB;
use liverpool_memory::{
    GpuMemory, GpuMemoryConfig, GpuMemoryError, GpuObject, GpuObjectType, GraphicContext, HostResource,
    IndexBufferObject, IndexType, LabelObject, ObjectId, ObjectState, SoftwareBackend, StorageBufferObject,
    TextureObject, VertexBufferObject, VideoOutBufferObject,
};
use liverpool_shader::{GuestMemory, GuestRange, VecGuestMemory};
use liverpool_tile::{convert_linear_to_tiled, tiled_size, TileMode, TileParams, TILING_INDEX_THIN_1D_THIN};
use pretty_assertions::assert_eq;

struct Harness {
    backend: SoftwareBackend,
    guest: VecGuestMemory,
    mem: GpuMemory,
}

impl Harness {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Self {
            backend: SoftwareBackend::new(),
            guest: VecGuestMemory::new(0, 0x10_0000),
            mem: GpuMemory::new(GpuMemoryConfig {
                check_allocated_ranges: false,
                verify_invariants: true,
            }),
        }
    }

    fn get(&mut self, ranges: &[GuestRange], object: &dyn GpuObject) -> Result<ObjectId, GpuMemoryError> {
        let mut ctx = GraphicContext::new(&mut self.backend, &self.guest);
        self.mem.get_object(&mut ctx, ranges, object)
    }

    fn flush(&mut self) -> usize {
        let mut ctx = GraphicContext::new(&mut self.backend, &self.guest);
        self.mem.flush(&mut ctx).unwrap()
    }

    fn free(&mut self, vaddr: u64, size: u64) -> usize {
        let mut ctx = GraphicContext::new(&mut self.backend, &self.guest);
        self.mem.free(&mut ctx, vaddr, size).unwrap()
    }

    fn buffer_mut(&mut self, id: ObjectId) -> &mut [u8] {
        let HostResource::Buffer(buffer) = self.mem.resource(id).unwrap() else {
            panic!("not a buffer");
        };
        self.backend.buffer_contents_mut(buffer.buffer).unwrap()
    }

    fn buffer(&self, id: ObjectId) -> Vec<u8> {
        let buffer = *self.mem.resource(id).unwrap().as_buffer().unwrap();
        self.backend.buffer_contents(buffer.buffer).unwrap().to_vec()
    }

    fn image(&self, id: ObjectId, level: u32) -> Vec<u8> {
        let image = *self.mem.resource(id).unwrap().as_image().unwrap();
        self.backend.image_level(image.image, level).unwrap().to_vec()
    }

    fn guest_bytes(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.guest.read(addr, &mut out).unwrap();
        out
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn video_out(width: u32, height: u32) -> VideoOutBufferObject {
    VideoOutBufferObject::new(VIDEO_OUT_FORMAT_B8G8R8A8_SRGB, width, height, true, false)
}

/// Writes `linear` into guest memory in the scan-out layout and returns the guest range.
fn store_tiled_surface(h: &Harness, vaddr: u64, object: &VideoOutBufferObject, linear: &[u8]) -> GuestRange {
    let params = TileParams::video_out(object.width, object.height, object.neo);
    let size = tiled_size(&params).unwrap() as usize;
    let mut src = linear.to_vec();
    src.resize(size, 0);
    let mut tiled = vec![0u8; size];
    convert_linear_to_tiled(&mut tiled, &src, &params).unwrap();
    h.guest.write(vaddr, &tiled).unwrap();
    GuestRange::new(vaddr, size as u64)
}

#[test]
fn same_request_is_served_from_the_cache() {
    let mut h = Harness::new();
    let object = video_out(64, 64);
    let linear = pattern(64 * 64 * 4, 3);
    let range = store_tiled_surface(&h, 0x1_0000, &object, &linear);

    let first = h.get(&[range], &object).unwrap();
    let second = h.get(&[range], &object).unwrap();
    assert_eq!(first, second);

    let stats = h.mem.stats();
    assert_eq!((stats.creates, stats.reuses, stats.deletes), (1, 1, 0));
    assert_eq!(h.backend.live_handles().images, 1);
    assert_eq!(h.image(first, 0), linear);
}

#[test]
fn changed_parameters_replace_the_object() {
    let mut h = Harness::new();
    let range = GuestRange::new(0x1_0000, 0x8000);

    let small = h.get(&[range], &video_out(64, 32)).unwrap();
    let large = h.get(&[range], &video_out(64, 64)).unwrap();
    assert_ne!(small, large);
    assert!(matches!(
        h.mem.resource(small),
        Err(GpuMemoryError::UnknownObject(id)) if id == small
    ));

    let stats = h.mem.stats();
    assert_eq!((stats.creates, stats.deletes), (2, 1));
    assert_eq!(h.backend.live_handles().images, 1);
    assert_eq!(h.mem.len(), 1);
}

#[test]
fn video_out_equality_ignores_neo() {
    // Only format, width, height and tiling decide reuse; the pipe configuration does not.
    let mut h = Harness::new();
    let range = GuestRange::new(0x1_0000, 0x10000);
    let base = video_out(64, 64);
    let a = h.get(&[range], &base).unwrap();
    let b = h.get(&[range], &VideoOutBufferObject { neo: true, ..base }).unwrap();
    assert_eq!(a, b);
}

#[test]
fn cleared_surface_is_uploaded_without_detiling() {
    let mut h = Harness::new();
    let object = video_out(64, 64);
    h.guest.write(0x1_0000, &[0x7f; 0x8000]).unwrap();
    let id = h.get(&[GuestRange::new(0x1_0000, 0x8000)], &object).unwrap();
    assert_eq!(h.image(id, 0), vec![0x7f; 64 * 64 * 4]);
}

#[test]
fn video_out_rejects_unknown_formats_and_small_allocations() {
    let mut h = Harness::new();
    let bad_format = VideoOutBufferObject::new(0x8000_0001, 64, 64, false, false);
    assert!(matches!(
        h.get(&[GuestRange::new(0, 0x8000)], &bad_format),
        Err(GpuMemoryError::NotImplemented {
            object: GpuObjectType::VideoOutBuffer,
            what: "pixel format",
            ..
        })
    ));
    assert!(matches!(
        h.get(&[GuestRange::new(0, 0x100)], &video_out(64, 64)),
        Err(GpuMemoryError::NotImplemented { .. })
    ));
    assert_eq!(h.backend.live_handles(), LiveHandles::default());
    assert!(h.mem.is_empty());
}

#[test]
fn allocation_failure_is_fatal_and_leaks_nothing() {
    let mut h = Harness::new();
    h.backend.fail_next_allocations(1);
    let err = h
        .get(&[GuestRange::new(0x1000, 0x10000)], &video_out(64, 64))
        .unwrap_err();
    assert!(matches!(
        err,
        GpuMemoryError::Allocation {
            object: GpuObjectType::VideoOutBuffer,
            ..
        }
    ));
    assert!(h.backend.live_handles().is_empty());
    assert_eq!(h.mem.stats().creates, 0);
}

#[test]
fn flush_writes_labels_back_to_guest() {
    let mut h = Harness::new();
    h.guest.write(0x200, &1u64.to_le_bytes()).unwrap();
    let label = h.get(&[GuestRange::new(0x200, 8)], &LabelObject).unwrap();
    assert_eq!(h.buffer(label), 1u64.to_le_bytes());

    h.buffer_mut(label).copy_from_slice(&0xfeed_u64.to_le_bytes());
    assert_eq!(h.flush(), 1);
    assert_eq!(h.guest_bytes(0x200, 8), 0xfeed_u64.to_le_bytes());

    // Nothing new was written since the last flush.
    assert_eq!(h.flush(), 0);
    h.mem.frame_done();
    assert_eq!(h.flush(), 0);
}

#[test]
fn unaligned_labels_are_rejected() {
    let mut h = Harness::new();
    assert!(matches!(
        h.get(&[GuestRange::new(0x204, 8)], &LabelObject),
        Err(GpuMemoryError::NotImplemented {
            object: GpuObjectType::Label,
            ..
        })
    ));
}

#[test]
fn storage_buffer_spans_several_ranges() {
    let mut h = Harness::new();
    h.guest.write(0x1000, &[1; 16]).unwrap();
    h.guest.write(0x3000, &[2; 8]).unwrap();
    let ranges = [GuestRange::new(0x1000, 16), GuestRange::new(0x3000, 8)];
    let id = h.get(&ranges, &StorageBufferObject { read_only: false }).unwrap();

    let mut expected = vec![1u8; 16];
    expected.extend_from_slice(&[2; 8]);
    assert_eq!(h.buffer(id), expected);

    h.buffer_mut(id).fill(9);
    // Freeing any part of the object writes the whole thing back first.
    assert_eq!(h.free(0x3000, 4), 1);
    assert_eq!(h.guest_bytes(0x1000, 16), vec![9; 16]);
    assert_eq!(h.guest_bytes(0x3000, 8), vec![9; 8]);
    assert!(h.mem.is_empty());
    assert!(h.backend.live_handles().is_empty());
}

#[test]
fn read_only_storage_is_never_written_back() {
    let mut h = Harness::new();
    let id = h
        .get(&[GuestRange::new(0x1000, 32)], &StorageBufferObject { read_only: true })
        .unwrap();
    h.buffer_mut(id).fill(0xaa);
    assert_eq!(h.flush(), 0);
    assert_eq!(h.free(0x1000, 32), 1);
    assert_eq!(h.guest_bytes(0x1000, 32), vec![0; 32]);
    assert_eq!(h.mem.stats().write_backs, 0);
}

#[test]
fn replacing_a_written_object_writes_it_back_first() {
    let mut h = Harness::new();
    let range = GuestRange::new(0x1000, 16);
    let writable = h.get(&[range], &StorageBufferObject { read_only: false }).unwrap();
    h.buffer_mut(writable).fill(5);

    let read_only = h.get(&[range], &StorageBufferObject { read_only: true }).unwrap();
    assert_ne!(writable, read_only);
    assert_eq!(h.guest_bytes(0x1000, 16), vec![5; 16]);
    assert_eq!(h.buffer(read_only), vec![5; 16]);
}

#[test]
fn reset_hash_forces_a_refresh() {
    let mut h = Harness::new();
    let range = GuestRange::new(0x400, 8);
    h.guest.write(0x400, &[1; 8]).unwrap();
    let id = h.get(&[range], &LabelObject).unwrap();
    h.flush();

    // Labels do not hash their content, so a guest write goes unnoticed...
    h.guest.write(0x400, &[2; 8]).unwrap();
    h.get(&[range], &LabelObject).unwrap();
    assert_eq!(h.buffer(id), vec![1; 8]);

    // ...until the range is reset.
    assert_eq!(h.mem.reset_hash(0x400, 8, GpuObjectType::VertexBuffer), 0);
    assert_eq!(h.mem.reset_hash(0x400, 8, GpuObjectType::Label), 1);
    assert_eq!(h.mem.state(id).unwrap(), ObjectState::Stale);
    assert_eq!(h.get(&[range], &LabelObject).unwrap(), id);
    assert_eq!(h.mem.state(id).unwrap(), ObjectState::Fresh);
    assert_eq!(h.buffer(id), vec![2; 8]);
}

#[test]
fn hashed_objects_pick_up_guest_writes() {
    let mut h = Harness::new();
    let range = GuestRange::new(0x800, 32);
    h.guest.write(0x800, &pattern(32, 1)).unwrap();
    let id = h.get(&[range], &VertexBufferObject).unwrap();
    h.get(&[range], &VertexBufferObject).unwrap();
    assert_eq!(h.mem.stats().updates, 1);

    h.guest.write(0x800, &pattern(32, 2)).unwrap();
    assert_eq!(h.get(&[range], &VertexBufferObject).unwrap(), id);
    assert_eq!(h.mem.stats().updates, 2);
    assert_eq!(h.buffer(id), pattern(32, 2));
}

#[test]
fn overlapping_request_evicts_the_old_object() {
    let mut h = Harness::new();
    let vertices = h
        .get(&[GuestRange::new(0x100, 0x40)], &VertexBufferObject)
        .unwrap();
    let indices = h
        .get(
            &[GuestRange::new(0x120, 0x40)],
            &IndexBufferObject {
                index_type: IndexType::U16,
            },
        )
        .unwrap();
    assert!(h.mem.resource(vertices).is_err());
    assert!(h.mem.resource(indices).is_ok());
    assert_eq!(h.mem.len(), 1);
    h.mem.verify_invariants().unwrap();
}

#[test]
fn textures_are_detiled_per_level() {
    let mut h = Harness::new();
    let texture = TextureObject {
        dfmt: 10,
        nfmt: 0,
        width: 8,
        height: 8,
        levels: 2,
        tiling_index: TILING_INDEX_THIN_1D_THIN,
        neo: false,
        pitch: 8,
    };
    let level0 = pattern(8 * 8 * 4, 7);
    let level1 = pattern(4 * 4 * 4, 9);

    let tile0 = TileParams {
        mode: TileMode::TextureTiled,
        width: 8,
        height: 8,
        element_size: 4,
        neo: false,
    };
    let tile1 = TileParams {
        width: 4,
        height: 4,
        ..tile0
    };
    let mut tiled0 = vec![0u8; 256];
    convert_linear_to_tiled(&mut tiled0, &level0, &tile0).unwrap();
    // The 4x4 level pads to one 8x8 micro tile.
    let mut src1 = level1.clone();
    src1.resize(256, 0);
    let mut tiled1 = vec![0u8; 256];
    convert_linear_to_tiled(&mut tiled1, &src1, &tile1).unwrap();
    h.guest.write(0x2000, &tiled0).unwrap();
    h.guest.write(0x2100, &tiled1).unwrap();

    let id = h.get(&[GuestRange::new(0x2000, 0x200)], &texture).unwrap();
    assert_eq!(h.image(id, 0), level0);
    assert_eq!(h.image(id, 1), level1);

    // A guest write to the texel data is detected by hashing on the next lookup.
    h.guest.write(0x2000, &[0; 4]).unwrap();
    h.get(&[GuestRange::new(0x2000, 0x200)], &texture).unwrap();
    assert_eq!(&h.image(id, 0)[..4], &[0, 0, 0, 0]);
}

#[test]
fn texture_with_unknown_tiling_is_rejected() {
    let mut h = Harness::new();
    let texture = TextureObject {
        dfmt: 10,
        nfmt: 9,
        width: 8,
        height: 8,
        levels: 1,
        tiling_index: 2,
        neo: false,
        pitch: 8,
    };
    assert!(matches!(
        h.get(&[GuestRange::new(0x2000, 0x100)], &texture),
        Err(GpuMemoryError::Tile(_))
    ));
    assert!(h.backend.live_handles().is_empty());
}

#[test]
fn destroy_all_releases_every_host_object() {
    let mut h = Harness::new();
    h.get(&[GuestRange::new(0x100, 8)], &LabelObject).unwrap();
    h.get(&[GuestRange::new(0x1_0000, 0x8000)], &video_out(64, 32)).unwrap();
    h.get(
        &[GuestRange::new(0x2_0000, 0x1000)],
        &liverpool_memory::DepthStencilBufferObject {
            format: 3,
            stencil: false,
            width: 64,
            height: 64,
            htile: false,
            neo: false,
        },
    )
    .unwrap();
    assert_eq!(h.mem.len(), 3);

    let mut ctx = GraphicContext::new(&mut h.backend, &h.guest);
    h.mem.destroy_all(&mut ctx).unwrap();
    assert!(h.mem.is_empty());
    assert!(h.backend.live_handles().is_empty());
    assert_eq!(h.backend.allocated_bytes(), 0);
}
