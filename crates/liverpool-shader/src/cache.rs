//! Recompiled-shader cache and the disabled-shader list.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashSet;
use lru::LruCache;
use tracing::{debug, warn};

use crate::binary::ShaderBinaryInfo;
use crate::error::{Result, ShaderError};
use crate::guest_memory::GuestMemory;
use crate::recompile::RecompiledShader;
use crate::shader_id::ShaderId;
use crate::ShaderOptions;

pub const DEFAULT_SHADER_CACHE_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderCacheConfig {
    pub capacity: usize,
}

impl Default for ShaderCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SHADER_CACHE_CAPACITY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderCacheLookupSource {
    Memory,
    Recompiled,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// LRU of recompiled shaders keyed by [`ShaderId`].
pub struct ShaderCache {
    shaders: LruCache<ShaderId, Arc<RecompiledShader>>,
    stats: ShaderCacheStats,
}

impl ShaderCache {
    pub fn new(config: ShaderCacheConfig) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.capacity)
            .ok_or_else(|| ShaderError::not_implemented("shader cache", "capacity must be > 0"))?;
        Ok(Self {
            shaders: LruCache::new(capacity),
            stats: ShaderCacheStats::default(),
        })
    }

    pub fn stats(&self) -> ShaderCacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    pub fn contains(&self, id: &ShaderId) -> bool {
        self.shaders.contains(id)
    }

    /// Returns the cached shader for `id`, running `recompile` on a miss.
    ///
    /// A failed recompile leaves the cache untouched.
    pub fn get_or_recompile<F>(
        &mut self,
        id: &ShaderId,
        recompile: F,
    ) -> Result<(Arc<RecompiledShader>, ShaderCacheLookupSource)>
    where
        F: FnOnce() -> Result<RecompiledShader>,
    {
        if let Some(shader) = self.shaders.get(id) {
            self.stats.hits += 1;
            return Ok((Arc::clone(shader), ShaderCacheLookupSource::Memory));
        }
        self.stats.misses += 1;

        let shader = Arc::new(recompile()?);
        if let Some((evicted, _)) = self.shaders.push(id.clone(), Arc::clone(&shader)) {
            if evicted != *id {
                self.stats.evictions += 1;
            }
        }
        debug!(
            stage = ?shader.stage,
            id_len = id.ids.len(),
            cached = self.shaders.len(),
            "shader cache miss"
        );
        Ok((shader, ShaderCacheLookupSource::Recompiled))
    }

    pub fn clear(&mut self) {
        self.shaders.clear();
    }
}

/// Shaders the embedder asked to skip, keyed by [`ShaderBinaryInfo::hash_key`].
#[derive(Debug, Default)]
pub struct ShaderDisableList {
    hashes: Mutex<HashSet<u64>>,
}

impl ShaderDisableList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u64>> {
        match self.hashes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn disable(&self, hash_key: u64) {
        if self.lock().insert(hash_key) {
            debug!(hash_key = format_args!("0x{hash_key:016x}"), "shader disabled");
        }
    }

    pub fn enable(&self, hash_key: u64) -> bool {
        self.lock().remove(&hash_key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Looks up the binary info of the program at `program_address` and checks its hash.
    pub fn is_disabled(&self, mem: &dyn GuestMemory, program_address: u64, options: &ShaderOptions) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }
        let info = ShaderBinaryInfo::find(mem, program_address, options.binary_info_search_limit_dwords)?;
        let disabled = self.lock().contains(&info.hash_key());
        if disabled {
            warn!(
                program_address = format_args!("0x{program_address:x}"),
                hash_key = format_args!("0x{:016x}", info.hash_key()),
                "skipping disabled shader"
            );
        }
        Ok(disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ShaderType;

    fn shader(tag: u32) -> RecompiledShader {
        RecompiledShader {
            stage: ShaderType::Compute,
            wgsl: format!("// {tag}"),
            entry_point: "cs_main",
            spirv: vec![tag],
        }
    }

    fn id(values: &[u32]) -> ShaderId {
        ShaderId { ids: values.to_vec() }
    }

    #[test]
    fn second_lookup_is_a_hit() {
        let mut cache = ShaderCache::new(ShaderCacheConfig::default()).unwrap();
        let (a, src) = cache.get_or_recompile(&id(&[1, 2]), || Ok(shader(1))).unwrap();
        assert_eq!(src, ShaderCacheLookupSource::Recompiled);
        let (b, src) = cache
            .get_or_recompile(&id(&[1, 2]), || panic!("must not recompile"))
            .unwrap();
        assert_eq!(src, ShaderCacheLookupSource::Memory);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats(), ShaderCacheStats { hits: 1, misses: 1, evictions: 0 });
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ShaderCache::new(ShaderCacheConfig { capacity: 2 }).unwrap();
        for n in 0..3 {
            cache.get_or_recompile(&id(&[n]), || Ok(shader(n))).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&id(&[0])));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn failed_recompile_is_not_cached() {
        let mut cache = ShaderCache::new(ShaderCacheConfig::default()).unwrap();
        let err = cache
            .get_or_recompile(&id(&[7]), || Err(ShaderError::not_implemented("test", "nope")))
            .unwrap_err();
        assert!(matches!(err, ShaderError::NotImplemented { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(ShaderCache::new(ShaderCacheConfig { capacity: 0 }).is_err());
    }
}
